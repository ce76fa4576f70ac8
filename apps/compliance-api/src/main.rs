//! Compliance API Server
//!
//! REST surface over the compliance engine:
//!
//! - Rule catalog administration
//! - Document ingestion (classification, risk scoring, action items)
//! - Batch classification and single-rule deep evaluation
//! - Action item assignment and completion
//!
//! Upload and text extraction happen upstream; callers submit extracted text.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use clap::Parser;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod handlers;
mod state;
mod store;

use state::AppState;

/// Command-line arguments for the compliance API server
#[derive(Parser, Debug)]
#[command(name = "compliance-api")]
#[command(about = "Compliance rule evaluation and risk scoring API")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:compliance.db?mode=rwc")]
    database_url: String,

    /// Rate limit: requests per second per IP
    #[arg(long, default_value = "10")]
    rate_limit: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

/// All routes, without the per-IP limiter
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Rule catalog
        .route("/rules", post(handlers::create_rule).get(handlers::list_rules))
        .route("/rules/by-names", post(handlers::rules_by_names))
        // Documents
        .route("/documents", post(handlers::ingest_document))
        .route("/documents/:id/rules/evaluate", post(handlers::evaluate_rule))
        .route("/dashboard", get(handlers::dashboard))
        .route("/classify/batch", post(handlers::classify_batch))
        // Action items
        .route("/action-items", get(handlers::pending_action_items))
        .route("/action-update/:id", post(handlers::assign_action_item))
        .route("/action-items/:id/complete", put(handlers::complete_action_item))
        .with_state(state)
}

fn init_tracing(verbose: bool, json_logs: bool) -> anyhow::Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env()
        .add_directive(log_level.into())
        .add_directive("compliance_api=info".parse()?)
        .add_directive("compliance_engine=info".parse()?)
        .add_directive("tower_http=debug".parse()?);

    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.verbose, args.json_logs)?;

    info!("Starting compliance API on {}:{}", args.host, args.port);

    // Create rate limiter configuration
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(args.rate_limit.max(1).into())
            .burst_size(args.rate_limit.max(1) * 2)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let state = Arc::new(AppState::new(&args.database_url).await?);

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(state)
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Rate limit: {} requests/second per IP", args.rate_limit);

    // The limiter keys on the peer address
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
