use rand::Rng;
use std::time::Duration;

/// Doubling retry delay with a ceiling and a little positive jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    base: Duration,
    max: Duration,
    jitter_percent: u32,
}

impl RetryBackoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter_percent: 10,
        }
    }

    pub fn with_jitter(mut self, jitter_percent: u32) -> Self {
        self.jitter_percent = jitter_percent;
        self
    }

    /// Delay before retry number `attempt` (0-based). Never exceeds `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let grown = self.base.saturating_mul(2u32.saturating_pow(attempt.min(20)));
        let capped = grown.min(self.max);
        if self.jitter_percent == 0 {
            return capped;
        }

        let spread = capped.as_millis() as u64 * u64::from(self.jitter_percent) / 100;
        let jitter = Duration::from_millis(rng.gen_range(0..=spread));
        (capped + jitter).min(self.max)
    }
}
