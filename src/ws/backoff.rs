use std::time::Duration;

/// Default delay before the first reconnect after a drop.
pub const RECONNECT_BASE: Duration = Duration::from_secs(3);

/// Reconnect delays never exceed this.
pub const RECONNECT_CEILING: Duration = Duration::from_secs(30);

/// Exponential reconnect delay.
///
/// The first delay after a drop is `base`; every attempt that fails to open
/// doubles the next one, up to `ceiling`. A successful open resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        let ceiling = ceiling.max(base);
        Self {
            base,
            ceiling,
            current: base,
        }
    }

    /// Delay to wait now; the following call returns double (capped).
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        delay
    }

    /// Delay the next call to `next_delay` would return.
    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RECONNECT_BASE, RECONNECT_CEILING)
    }
}
