use serde::{Deserialize, Serialize};

/// Bounded exponential retry used for transient lookups (e.g. waiting for a
/// freshly cloned VM to obtain a DHCP lease).
///
/// The n-th delay (0-based) is `first_ms * factor^n`, capped at `max_ms`.
/// The operation is tried at most `attempts` times.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryStrategy {
    pub attempts: u32,
    pub first_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            attempts: 10,
            first_ms: 100,
            max_ms: 10_000,
            factor: 2.0,
        }
    }
}

impl RetryStrategy {
    /// Delay in milliseconds to sleep after the given failed attempt (0-based).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.first_ms as f64 * self.factor.max(1.0).powi(exp);
        if raw.is_finite() {
            (raw as u64).min(self.max_ms)
        } else {
            self.max_ms
        }
    }
}
