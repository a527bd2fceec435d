use std::time::Duration;

use tokio::time::Instant;

/// Monotonic time source shared by the event source and the dwell timer.
///
/// Pointer samples and timer fires must be stamped by the same clock, otherwise elapsed-time
/// comparisons in the state machine are meaningless.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Time elapsed since construction, measured with tokio's clock so paused-time tests drive it.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}
