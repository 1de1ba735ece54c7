use std::time::Duration;

/// Exponential reconnect delays: `base * 2^(attempt-1)`, capped, then
/// jittered by `+/- jitter` of the nominal value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 20,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay for a 1-based attempt number.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// `sample` is clamped to `[-1, 1]` and scales the jitter window.
    pub fn delay(&self, attempt: u32, sample: f64) -> Duration {
        let sample = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        let factor = 1.0 + self.jitter * sample;
        self.nominal(attempt).mul_f64(factor.max(0.0))
    }

    pub fn jittered(&self, attempt: u32, rng: &mut fastrand::Rng) -> Duration {
        self.delay(attempt, rng.f64() * 2.0 - 1.0)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
