//! Fixed-window admission control
//!
//! A [`RateGate`] counts calls per key and resets a key's count once its
//! window has elapsed. It is a fixed-window counter, not a token bucket:
//! up to `2 * limit` calls can be admitted around a window boundary.
//! Counts live in memory only and are empty again after a restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::BudgetConfig;

/// Source of monotonic time for a gate
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Keys beyond this many trigger a sweep of expired windows
const SWEEP_THRESHOLD: usize = 1024;

/// Per-key fixed-window counter
#[derive(Debug)]
pub struct RateGate {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateGate {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_clock(limit, window, Arc::new(SystemClock))
    }

    pub fn with_clock(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count one call against `key`; true if the count is still within the limit.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() > SWEEP_THRESHOLD {
            let span = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < span);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        entry.count = entry.count.saturating_add(1);
        entry.count <= self.limit
    }
}

/// Logical budgets and the gate each one is charged against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Budget {
    /// Catalog-wide remote classification of one document
    ClassifierCall,
    /// One batch classification request (all chunks together)
    BatchClassification,
    /// Single-rule deep evaluation
    RuleCheck,
    RuleAddition,
    RuleRead,
    RuleReadByNames,
    RiskScore,
}

impl Budget {
    pub fn key(&self) -> &'static str {
        match self {
            Budget::ClassifierCall => "classifier_call",
            Budget::BatchClassification => "batch_rule_determination",
            Budget::RuleCheck => "rule_compliance_check",
            Budget::RuleAddition => "rule_addition",
            Budget::RuleRead => "rule_retrieval",
            Budget::RuleReadByNames => "rule_retrieval_by_names",
            Budget::RiskScore => "risk_score_calculation",
        }
    }

    fn uses_remote_gate(&self) -> bool {
        matches!(self, Budget::ClassifierCall | Budget::BatchClassification)
    }
}

impl std::fmt::Display for Budget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// The two gate instances the engine charges its budgets against
#[derive(Debug)]
pub struct RateGates {
    remote: RateGate,
    rules: RateGate,
}

impl RateGates {
    pub fn new(config: &BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote: RateGate::with_clock(config.classifier_calls, config.window, clock.clone()),
            rules: RateGate::with_clock(config.rule_operations, config.window, clock),
        }
    }

    pub fn allow(&self, budget: Budget) -> bool {
        let gate = if budget.uses_remote_gate() {
            &self.remote
        } else {
            &self.rules
        };
        gate.allow(budget.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(limit: u32) -> (RateGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let gate = RateGate::with_clock(limit, Duration::from_secs(60), clock.clone());
        (gate, clock)
    }

    #[test]
    fn test_denies_call_past_limit() {
        let (gate, _) = gate(3);
        assert!(gate.allow("k"));
        assert!(gate.allow("k"));
        assert!(gate.allow("k"));
        assert!(!gate.allow("k"));
        assert!(!gate.allow("k"));
    }

    #[test]
    fn test_window_elapse_resets_count() {
        let (gate, clock) = gate(1);
        assert!(gate.allow("k"));
        assert!(!gate.allow("k"));

        clock.advance(Duration::from_secs(59));
        assert!(!gate.allow("k"));

        clock.advance(Duration::from_secs(1));
        assert!(gate.allow("k"));
        assert!(!gate.allow("k"));
    }

    #[test]
    fn test_keys_are_independent() {
        let (gate, _) = gate(1);
        assert!(gate.allow("a"));
        assert!(gate.allow("b"));
        assert!(!gate.allow("a"));
    }

    #[test]
    fn test_zero_limit_denies_everything() {
        let (gate, _) = gate(0);
        assert!(!gate.allow("k"));
    }

    #[test]
    fn test_concurrent_callers_never_exceed_limit() {
        let gate = RateGate::new(100, Duration::from_secs(3600));
        let admitted = std::sync::atomic::AtomicU32::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..50 {
                        if gate.allow("shared") {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.into_inner(), 100);
    }

    #[test]
    fn test_budgets_route_to_separate_gates() {
        let config = BudgetConfig {
            classifier_calls: 1,
            rule_operations: 2,
            window: Duration::from_secs(60),
        };
        let gates = RateGates::new(&config, Arc::new(ManualClock::new()));

        assert!(gates.allow(Budget::ClassifierCall));
        assert!(!gates.allow(Budget::ClassifierCall));
        // Separate key on the same remote gate
        assert!(gates.allow(Budget::BatchClassification));

        assert!(gates.allow(Budget::RiskScore));
        assert!(gates.allow(Budget::RiskScore));
        assert!(!gates.allow(Budget::RiskScore));
        assert!(gates.allow(Budget::RuleRead));
    }
}
