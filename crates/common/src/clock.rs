//! Monotonic capture clock.
//!
//! Encoded unit timestamps are microseconds relative to a fixed epoch
//! recorded when the session starts. Because the epoch is monotonic,
//! timestamps taken across consecutive ticks are non-decreasing even
//! if the wall clock is adjusted mid-session.

use std::time::Instant;

/// A session clock providing monotonic microsecond timestamps relative
/// to a fixed epoch (the moment capture started).
#[derive(Debug, Clone)]
pub struct CaptureClock {
    /// The instant capture started.
    epoch: Instant,

    /// Wall-clock time at epoch (ISO 8601 string), for logging only.
    epoch_wall: String,
}

impl CaptureClock {
    /// Create a new capture clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Microseconds elapsed since capture start.
    pub fn elapsed_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Seconds elapsed since capture start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at capture start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Convert an elapsed microsecond value to seconds.
    pub fn us_to_secs(us: u64) -> f64 {
        us as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_small_right_after_start() {
        let clock = CaptureClock::start();
        assert!(clock.elapsed_us() < 1_000_000); // less than 1 second
    }

    #[test]
    fn elapsed_is_monotonic() {
        let clock = CaptureClock::start();
        let a = clock.elapsed_us();
        let b = clock.elapsed_us();
        assert!(b >= a);
    }

    #[test]
    fn us_to_secs_conversion() {
        assert!((CaptureClock::us_to_secs(1_500_000) - 1.5).abs() < 1e-9);
    }
}
