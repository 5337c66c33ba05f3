use std::time::{Duration, Instant};

use rand::Rng;

/// Periodic tick timer with per-fire jitter.
///
/// Each scheduled interval is the nominal period scaled by a multiplier drawn
/// uniformly from `[1 - jitter/2, 1 + jitter/2]`, so ticks never synchronize
/// with other periodic activity in the process. Best-effort periodic: drift
/// is not corrected.
#[derive(Debug)]
pub struct TickTimer {
    period: Duration,
    jitter: f64,
    enabled: bool,
}

impl TickTimer {
    pub fn new(period: Duration, jitter: f64) -> Self {
        Self {
            period,
            jitter: jitter.clamp(0.0, 1.0),
            enabled: false,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.enabled
    }

    /// Start issuing ticks. Idempotent.
    pub fn start(&mut self) {
        self.enabled = true;
    }

    /// Stop issuing ticks. Idempotent; a deadline already computed is simply
    /// ignored by the loop while stopped.
    pub fn stop(&mut self) {
        self.enabled = false;
    }

    /// Compute the next fire deadline from `now`, resolving jitter once
    pub fn next_deadline<R: Rng>(&self, now: Instant, rng: &mut R) -> Instant {
        let factor = if self.jitter > 0.0 {
            1.0 + self.jitter * (rng.gen::<f64>() - 0.5)
        } else {
            1.0
        };
        now + self.period.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_half_fraction_of_period() {
        let timer = TickTimer::new(Duration::from_millis(100), 0.1);
        let mut rng = rand::thread_rng();
        let now = Instant::now();
        for _ in 0..1000 {
            let deadline = timer.next_deadline(now, &mut rng);
            let interval = deadline - now;
            assert!(interval >= Duration::from_millis(95), "{interval:?}");
            assert!(interval <= Duration::from_millis(105), "{interval:?}");
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let timer = TickTimer::new(Duration::from_millis(100), 0.0);
        let mut rng = rand::thread_rng();
        let now = Instant::now();
        assert_eq!(timer.next_deadline(now, &mut rng), now + Duration::from_millis(100));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut timer = TickTimer::new(Duration::from_millis(100), 0.1);
        timer.start();
        assert!(timer.is_running());
        timer.stop();
        timer.stop();
        assert!(!timer.is_running());
        timer.start();
        assert!(timer.is_running());
    }
}
