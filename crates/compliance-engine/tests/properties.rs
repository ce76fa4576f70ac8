//! Property-based tests for the compliance engine
//!
//! Classification here always runs on the keyword fallback: the classifier
//! budget is zero, so no network is involved.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use compliance_engine::scoring::risk_score;
use compliance_engine::{
    BudgetConfig, ChatClient, ClassifierConfig, FallbackMatcher, ManualClock, RateGate, RateGates,
    RuleClassifier,
};
use proptest::prelude::*;
use shared_types::{ComplianceRule, OutcomeStatus, RuleOutcome, Severity};

fn rule(name: String, severity: Severity) -> ComplianceRule {
    ComplianceRule {
        id: name.clone(),
        name,
        description: String::new(),
        pattern: String::new(),
        severity,
        created_at: Utc::now(),
    }
}

fn offline_classifier() -> RuleClassifier {
    let config = ClassifierConfig {
        api_key: Some("test-key".to_string()),
        base_url: "http://127.0.0.1:9".to_string(),
        ..ClassifierConfig::default()
    };
    let budgets = BudgetConfig {
        classifier_calls: 0,
        ..BudgetConfig::default()
    };
    RuleClassifier::new(
        Arc::new(ChatClient::new(&config).unwrap()),
        Arc::new(RateGates::new(&budgets, Arc::new(ManualClock::new()))),
        FallbackMatcher::new(),
        config,
    )
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

// ============================================================
// Strategies
// ============================================================

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Low),
        Just(Severity::Medium),
        Just(Severity::High),
        "[a-z]{3,8}".prop_map(|s| Severity::Unrecognized(format!("x-{s}"))),
    ]
}

/// Catalog mixing fallback table names with made-up ones
fn catalog() -> impl Strategy<Value = Vec<ComplianceRule>> {
    let name = prop_oneof![
        Just("NDA Check".to_string()),
        Just("Signature Requirement".to_string()),
        Just("Payment Terms Specification".to_string()),
        "[A-Z][a-z]{3,10} Rule",
    ];
    prop::collection::vec((name, severity()), 1..6).prop_map(|entries| {
        let mut seen = std::collections::HashSet::new();
        entries
            .into_iter()
            .filter(|(name, _)| seen.insert(name.clone()))
            .map(|(name, severity)| rule(name, severity))
            .collect()
    })
}

fn document_text() -> impl Strategy<Value = String> {
    let word = prop_oneof![
        Just("nda"),
        Just("non-disclosure"),
        Just("signature"),
        Just("payment"),
        Just("invoice"),
        Just("tenant"),
        Just("premises"),
        Just("the"),
    ];
    prop::collection::vec(word, 0..20).prop_map(|words| words.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // ============================================================
    // Classification
    // ============================================================

    #[test]
    fn classify_only_returns_catalog_names(catalog in catalog(), text in document_text()) {
        let classifier = offline_classifier();
        let names = block_on(classifier.violated_rules(&text, &catalog)).unwrap();
        for name in &names {
            prop_assert!(catalog.iter().any(|r| &r.name == name));
        }
    }

    #[test]
    fn classify_yields_one_outcome_per_rule(catalog in catalog(), text in document_text()) {
        let classifier = offline_classifier();
        let outcomes = block_on(classifier.classify(&text, &catalog)).unwrap();
        prop_assert_eq!(outcomes.len(), catalog.len());
        for (outcome, rule) in outcomes.iter().zip(&catalog) {
            prop_assert_eq!(&outcome.rule_name, &rule.name);
        }
    }

    #[test]
    fn blank_text_has_no_fallback_violations(text in "[ \t\n]{0,10}") {
        prop_assert!(FallbackMatcher::new().violations(&text).is_empty());
    }

    // ============================================================
    // Risk scoring
    // ============================================================

    #[test]
    fn score_is_order_independent(
        (catalog, outcomes, shuffled) in catalog().prop_flat_map(|catalog| {
            let outcome = (0..catalog.len(), any::<bool>());
            let outcomes = prop::collection::vec(outcome, 0..12);
            (Just(catalog), outcomes)
        }).prop_flat_map(|(catalog, picks)| {
            let outcomes: Vec<RuleOutcome> = picks
                .iter()
                .map(|(index, failed)| RuleOutcome {
                    rule_name: catalog[*index].name.clone(),
                    status: if *failed { OutcomeStatus::Fail } else { OutcomeStatus::Pass },
                    severity: Severity::Low,
                    explanation: String::new(),
                })
                .collect();
            (Just(catalog), Just(outcomes.clone()), Just(outcomes).prop_shuffle())
        })
    ) {
        prop_assert_eq!(risk_score(&outcomes, &catalog), risk_score(&shuffled, &catalog));
    }

    #[test]
    fn score_is_non_negative_and_zero_when_all_pass(catalog in catalog()) {
        let passes: Vec<RuleOutcome> = catalog.iter().map(RuleOutcome::pass).collect();
        prop_assert_eq!(risk_score(&passes, &catalog), 0.0);

        let fails: Vec<RuleOutcome> = catalog.iter().map(RuleOutcome::fail).collect();
        prop_assert!(risk_score(&fails, &catalog) >= catalog.len() as f64);
    }

    // ============================================================
    // Rate gate
    // ============================================================

    #[test]
    fn gate_denies_call_past_limit_and_resets(limit in 0u32..50, key in "[a-z_]{1,12}") {
        let clock = Arc::new(ManualClock::new());
        let gate = RateGate::with_clock(limit, Duration::from_secs(60), clock.clone());

        for _ in 0..limit {
            prop_assert!(gate.allow(&key));
        }
        prop_assert!(!gate.allow(&key));

        clock.advance(Duration::from_secs(60));
        prop_assert_eq!(gate.allow(&key), limit > 0);
    }
}
