use crate::domain::error::SessionError;
use crate::domain::models::{HeartRateSample, ScaleRange};
use crate::domain::settings::{ScaleSettings, SessionSettings};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use tracing::warn;

/// Time-ordered heart-rate history of the current broadcast session.
///
/// Timestamps are strictly increasing: a sample not later than the last one is
/// dropped rather than reordered. The display scale is refreshed on every
/// accepted sample.
pub struct SampleStream {
    samples: VecDeque<HeartRateSample>,
    capacity: Option<usize>,
    valid_rates: RangeInclusive<u16>,
    scale_settings: ScaleSettings,
    scale: ScaleRange,
}

impl SampleStream {
    pub fn new(settings: &SessionSettings) -> Self {
        let scale_settings = settings.scale.clone();
        Self {
            samples: VecDeque::new(),
            capacity: settings.history_capacity.filter(|capacity| *capacity > 0),
            valid_rates: valid_rate_range(settings),
            scale: scale_settings.default_range(),
            scale_settings,
        }
    }

    pub fn append(
        &mut self,
        rate: u16,
        time: DateTime<Utc>,
    ) -> Result<HeartRateSample, SessionError> {
        if let Some(last) = self.samples.back() {
            if time <= last.time {
                warn!("Dropping out-of-order sample at {} (last {})", time, last.time);
                return Err(SessionError::OutOfOrder {
                    time,
                    last: last.time,
                });
            }
        }
        if !self.valid_rates.contains(&rate) {
            warn!("Dropping invalid heart rate {} bpm", rate);
            return Err(SessionError::RateOutOfRange {
                rate,
                min: *self.valid_rates.start(),
                max: *self.valid_rates.end(),
            });
        }

        let sample = HeartRateSample { time, rate };
        self.samples.push_back(sample);
        if let Some(capacity) = self.capacity {
            while self.samples.len() > capacity {
                self.samples.pop_front();
            }
        }
        self.scale = self.compute_scale();
        Ok(sample)
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.scale = self.scale_settings.default_range();
    }

    /// Sample closest in time to `query`; ties go to the earlier sample.
    pub fn nearest_to(&self, query: DateTime<Utc>) -> Option<&HeartRateSample> {
        let split = self.samples.partition_point(|sample| sample.time < query);
        let before = split.checked_sub(1).and_then(|i| self.samples.get(i));
        let after = self.samples.get(split);

        match (before, after) {
            (Some(before), Some(after)) => {
                let to_before = query - before.time;
                let to_after = after.time - query;
                if to_after < to_before {
                    Some(after)
                } else {
                    Some(before)
                }
            }
            (before, after) => before.or(after),
        }
    }

    pub fn dynamic_scale(&self) -> ScaleRange {
        self.scale
    }

    pub fn latest(&self) -> Option<&HeartRateSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeartRateSample> + '_ {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn compute_scale(&self) -> ScaleRange {
        let mut rates = self.samples.iter().map(|sample| i32::from(sample.rate));
        let Some(first) = rates.next() else {
            return self.scale_settings.default_range();
        };
        let (min, max) = rates.fold((first, first), |(min, max), rate| {
            (min.min(rate), max.max(rate))
        });
        let margin = self.scale_settings.margin_for(max - min);
        ScaleRange {
            lower: min - margin,
            upper: max + margin,
        }
    }
}

/// Configured rate bounds. Zero is never a valid reading, and an inverted
/// range falls back to the defaults.
fn valid_rate_range(settings: &SessionSettings) -> RangeInclusive<u16> {
    let defaults = SessionSettings::default();
    let min = settings.min_valid_rate.max(1);
    if min != settings.min_valid_rate {
        warn!("min_valid_rate must be at least 1 bpm, using 1");
    }
    if min > settings.max_valid_rate {
        warn!(
            "Valid rate range {}..={} is empty, using {}..={}",
            settings.min_valid_rate,
            settings.max_valid_rate,
            defaults.min_valid_rate,
            defaults.max_valid_rate
        );
        return defaults.min_valid_rate..=defaults.max_valid_rate;
    }
    min..=settings.max_valid_rate
}
