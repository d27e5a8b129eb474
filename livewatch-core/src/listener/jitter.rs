use rand::RngExt;
use std::time::Duration;

/// Ticker whose period is a nominal interval perturbed by normally distributed jitter.
///
/// Keeps many rooms polling the same upstream from lining up into bursts. The delay is
/// floored at half the nominal interval; a zero standard deviation gives a fixed period.
#[derive(Debug, Clone)]
pub struct JitterTicker {
    interval: Duration,
    stddev: Duration,
}

impl JitterTicker {
    #[must_use]
    pub const fn new(interval: Duration, stddev: Duration) -> Self {
        Self { interval, stddev }
    }

    /// Sample the delay until the next tick
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        if self.stddev.is_zero() {
            return self.interval;
        }
        let offset = standard_normal() * self.stddev.as_secs_f64();
        let nominal = self.interval.as_secs_f64();
        Duration::from_secs_f64((nominal + offset).max(nominal / 2.0))
    }

    /// Wait for the next tick
    pub async fn tick(&mut self) {
        tokio::time::sleep(self.next_delay()).await;
    }
}

/// Box-Muller transform over two uniform samples
fn standard_normal() -> f64 {
    let mut rng = rand::rng();
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}
