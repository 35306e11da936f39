//! Usage counters
//!
//! Lightweight counter registry backing the `stats` command and the
//! statistics sink. Counters are cheap atomics; the registry hands out
//! shared handles by name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

/// Well-known counter names used across the crate.
pub mod names {
    pub const COMMANDS_RECEIVED: &str = "commands_received";
    pub const COMMANDS_EXECUTED: &str = "commands_executed";
    pub const COMMANDS_REJECTED: &str = "commands_rejected";
    pub const COMMANDS_FAILED: &str = "commands_failed";
    pub const FUN_LOOPS_STARTED: &str = "fun_loops_started";
    pub const FUN_LOOPS_STOPPED: &str = "fun_loops_stopped";
    pub const FUN_LOOPS_EXPIRED: &str = "fun_loops_expired";
    pub const TRANSPORT_SEND_ERRORS: &str = "transport_send_errors";
}

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `amount`.
    pub fn add(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of named counters.
///
/// Constructed once at startup and injected into the services that report
/// usage; `snapshot` feeds the `stats` command.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a counter by name.
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(counter) = self.counters.read().get(name) {
            return counter.clone();
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Counter::new()))
            .clone()
    }

    /// Snapshot of all counter values, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let counters = self.counters.read();
        let mut values: Vec<(String, u64)> = counters
            .iter()
            .map(|(name, counter)| (name.clone(), counter.get()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<MetricsRegistry>> = OnceLock::new();

/// Process-wide registry for callers that do not thread their own handle.
pub fn global_registry() -> Arc<MetricsRegistry> {
    GLOBAL_REGISTRY
        .get_or_init(|| Arc::new(MetricsRegistry::new()))
        .clone()
}
