use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of sample timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time anchored once and advanced by the runtime's monotonic
/// clock, so timestamps never go backwards when the system clock is adjusted.
pub struct MonotonicClock {
    wall_origin: DateTime<Utc>,
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(wall_origin: DateTime<Utc>) -> Self {
        Self {
            wall_origin,
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
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_runtime_time() {
        let origin = Utc.with_ymd_and_hms(2024, 11, 17, 20, 0, 0).unwrap();
        let clock = MonotonicClock::starting_at(origin);
        assert_eq!(clock.now(), origin);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(clock.now(), origin + chrono::Duration::milliseconds(1500));
    }
}
