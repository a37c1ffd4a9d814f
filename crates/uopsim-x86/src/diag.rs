//! Legacy x87 usage diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

/// Slow-path x87 instructions seen before the one-time warning is logged.
pub const X87_WARNING_THRESHOLD: u64 = 16;

/// Observer notified whenever an x87 instruction is handed to a microcode
/// assist.
pub trait LegacyFpuObserver: Sync {
    fn record_slow_x87(&self, rip: u64);
}

/// Counts slow-path x87 instructions and warns once at the threshold.
#[derive(Debug)]
pub struct X87UsageMonitor {
    count: AtomicU64,
    threshold: u64,
}

impl X87UsageMonitor {
    #[must_use]
    pub const fn new(threshold: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            threshold,
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Records one event; returns true for the event that crossed the threshold.
    pub fn record(&self) -> bool {
        self.count.fetch_add(1, Ordering::Relaxed) + 1 == self.threshold
    }
}

impl Default for X87UsageMonitor {
    fn default() -> Self {
        Self::new(X87_WARNING_THRESHOLD)
    }
}

impl LegacyFpuObserver for X87UsageMonitor {
    fn record_slow_x87(&self, rip: u64) {
        if self.record() {
            warn!(
                rip,
                count = self.threshold,
                "program makes heavy use of legacy x87 floating point; recompile with SSE2 for better performance"
            );
        }
    }
}

/// Process-wide monitor used by decoders built without an explicit observer.
pub static X87_USAGE: X87UsageMonitor = X87UsageMonitor::new(X87_WARNING_THRESHOLD);
