use rand::Rng;
use std::time::Duration;

/// Knobs layered on top of the `base ^ attempts` backoff formula.
///
/// The default leaves the formula untouched: one unit is one second, no cap,
/// no jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub unit: Duration,
    pub max_delay: Option<Duration>,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(1),
            max_delay: None,
            jitter_pct: 0.0,
        }
    }
}

/// A job that has been attempted `attempts` times may run again while
/// `attempts <= max_retries`.
pub fn should_retry(attempts: u32, max_retries: u32) -> bool {
    attempts <= max_retries
}

/// `base ^ attempts` seconds.
pub fn backoff_delay(base: f64, attempts: u32) -> Duration {
    scaled_delay(base, attempts, Duration::from_secs(1))
}

/// Backoff after the `attempts`-th failure, with the unit, cap and jitter of `cfg`.
pub fn next_delay(attempts: u32, base: f64, cfg: &RetryConfig, rng: &mut impl Rng) -> Duration {
    let mut delay = scaled_delay(base, attempts, cfg.unit);

    // cap
    if let Some(max) = cfg.max_delay {
        delay = delay.min(max);
    }

    if cfg.jitter_pct <= 0.0 || delay.is_zero() {
        return delay;
    }

    // jitter in range [-jitter_pct, +jitter_pct]
    let secs = delay.as_secs_f64();
    let range = secs * cfg.jitter_pct;
    let jittered = (secs + rng.gen_range(-range..=range)).max(0.0);

    let delay = Duration::try_from_secs_f64(jittered).unwrap_or(Duration::MAX);
    match cfg.max_delay {
        Some(max) => delay.min(max),
        None => delay,
    }
}

fn scaled_delay(base: f64, attempts: u32, unit: Duration) -> Duration {
    // Overflow saturates instead of wrapping; the cap (if any) brings it back.
    let exp = i32::try_from(attempts).unwrap_or(i32::MAX);
    let secs = unit.as_secs_f64() * base.powi(exp);
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
