use std::time::Duration;

use mockall::automock;
use tracing::{debug, warn};

/// Receives one record per finished ledger operation. `outcome` is `"ok"` or an error code.
#[automock]
pub trait LedgerObserver: Send + Sync + 'static {
    fn record(&self, operation: &'static str, outcome: &'static str, elapsed: Duration);
}

pub struct TracingLedgerObserver {
    slow_threshold: Duration,
}

impl TracingLedgerObserver {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }
}

impl Default for TracingLedgerObserver {
    fn default() -> Self {
        Self::new(super::slow_operation_threshold())
    }
}

impl LedgerObserver for TracingLedgerObserver {
    fn record(&self, operation: &'static str, outcome: &'static str, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;

        if elapsed >= self.slow_threshold || outcome == "timeout" {
            warn!(operation, outcome, elapsed_ms, "ledger: slow operation");
        } else {
            debug!(operation, outcome, elapsed_ms, "ledger: operation finished");
        }
    }
}
