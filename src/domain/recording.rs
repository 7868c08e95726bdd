//! Persisted sample line format.
//!
//! Each recorded sample becomes one line:
//!
//! ```text
//! MM/dd/yyyy, h:mm:ss a ZZZ: <integer> bpm
//! 11/17/2024, 3:04:05 PM EST: 72 bpm
//! ```
//!
//! The zone is written as a three-letter abbreviation paired with a fixed UTC
//! offset; readers resolve it back through [`zone_offset_minutes`].

use crate::domain::error::{LineParseError, PersistenceError};
use crate::domain::models::HeartRateSample;
use crate::domain::settings::RecordingSettings;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};

const DATE_TIME_FORMAT: &str = "%m/%d/%Y, %-I:%M:%S %p";
const DATE_TIME_PARSE_FORMAT: &str = "%m/%d/%Y, %I:%M:%S %p";

/// Append-log collaborator fed by a broadcast session.
pub trait SampleLog: Send {
    fn begin(&mut self) -> Result<(), PersistenceError>;
    fn append_line(&mut self, line: &str) -> Result<(), PersistenceError>;
    fn end(&mut self) -> Result<(), PersistenceError>;
}

/// A line read back from a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedLine {
    pub time: DateTime<Utc>,
    pub rate: u16,
}

#[derive(Debug, Clone)]
pub struct LineFormat {
    abbreviation: String,
    offset: FixedOffset,
}

impl LineFormat {
    /// `abbreviation` must be three upper-case ASCII letters.
    pub fn new(abbreviation: &str, utc_offset_minutes: i32) -> Option<Self> {
        if !is_zone_abbreviation(abbreviation) {
            return None;
        }
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60)?;
        Some(Self {
            abbreviation: abbreviation.to_string(),
            offset,
        })
    }

    pub fn utc() -> Self {
        Self {
            abbreviation: "UTC".to_string(),
            offset: Utc.fix(),
        }
    }

    /// Falls back to UTC when the configured zone is unusable.
    pub fn from_settings(settings: &RecordingSettings) -> Self {
        Self::new(&settings.zone_abbreviation, settings.utc_offset_minutes).unwrap_or_else(|| {
            tracing::warn!(
                "Invalid recording zone '{}' ({} min), using UTC",
                settings.zone_abbreviation,
                settings.utc_offset_minutes
            );
            Self::utc()
        })
    }

    pub fn abbreviation(&self) -> &str {
        &self.abbreviation
    }

    pub fn format(&self, sample: &HeartRateSample) -> String {
        let local = sample.time.with_timezone(&self.offset);
        format!(
            "{} {}: {} bpm",
            local.format(DATE_TIME_FORMAT),
            self.abbreviation,
            sample.rate
        )
    }

    /// Reads a line written in any recognised zone, not only this one.
    pub fn parse_line(&self, line: &str) -> Result<ParsedLine, LineParseError> {
        let (timestamp, reading) = line
            .trim_end_matches(['\r', '\n'])
            .split_once(": ")
            .ok_or(LineParseError::MissingSeparator)?;

        let digits = reading
            .strip_suffix(" bpm")
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| LineParseError::BadRate(reading.to_string()))?;
        let rate = digits
            .parse::<u16>()
            .map_err(|_| LineParseError::BadRate(reading.to_string()))?;

        let (date_time, zone) = timestamp
            .rsplit_once(' ')
            .ok_or_else(|| LineParseError::BadTimestamp(timestamp.to_string()))?;
        let offset = self
            .resolve_zone(zone)
            .ok_or_else(|| LineParseError::UnknownZone(zone.to_string()))?;

        if !has_exact_layout(date_time) {
            return Err(LineParseError::BadTimestamp(timestamp.to_string()));
        }
        let naive = NaiveDateTime::parse_from_str(date_time, DATE_TIME_PARSE_FORMAT)
            .map_err(|_| LineParseError::BadTimestamp(timestamp.to_string()))?;
        let time = offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| LineParseError::BadTimestamp(timestamp.to_string()))?
            .with_timezone(&Utc);

        Ok(ParsedLine { time, rate })
    }

    pub fn is_well_formed(&self, line: &str) -> bool {
        self.parse_line(line).is_ok()
    }

    fn resolve_zone(&self, zone: &str) -> Option<FixedOffset> {
        if zone == self.abbreviation {
            return Some(self.offset);
        }
        zone_offset_minutes(zone).and_then(|minutes| FixedOffset::east_opt(minutes * 60))
    }
}

impl Default for LineFormat {
    fn default() -> Self {
        Self::utc()
    }
}

/// UTC offset of the zone abbreviations a recording may contain.
pub fn zone_offset_minutes(abbreviation: &str) -> Option<i32> {
    let minutes = match abbreviation {
        "UTC" | "GMT" => 0,
        "EST" => -5 * 60,
        "EDT" => -4 * 60,
        "CST" => -6 * 60,
        "CDT" => -5 * 60,
        "MST" => -7 * 60,
        "MDT" => -6 * 60,
        "PST" => -8 * 60,
        "PDT" => -7 * 60,
        _ => return None,
    };
    Some(minutes)
}

/// Mean spacing in seconds between consecutive lines, measured from the first
/// to the last line. `None` with fewer than two lines.
pub fn average_interval(lines: &[ParsedLine]) -> Option<f64> {
    let (first, last) = (lines.first()?, lines.last()?);
    if lines.len() < 2 {
        return None;
    }
    let span = (last.time - first.time).num_milliseconds() as f64 / 1000.0;
    Some(span / (lines.len() - 1) as f64)
}

fn is_zone_abbreviation(zone: &str) -> bool {
    zone.len() == 3 && zone.bytes().all(|b| b.is_ascii_uppercase())
}

// `MM/dd/yyyy, h:mm:ss AM`, checked before chrono which accepts unpadded
// fields, lower-case meridiems and extra whitespace.
fn has_exact_layout(date_time: &str) -> bool {
    let Some((date, time)) = date_time.split_once(", ") else {
        return false;
    };
    let Some((clock, meridiem)) = time.split_once(' ') else {
        return false;
    };
    let date_ok = date.len() == 10
        && date.bytes().enumerate().all(|(i, b)| match i {
            2 | 5 => b == b'/',
            _ => b.is_ascii_digit(),
        });
    let mut fields = clock.split(':');
    let clock_ok = matches!(
        (fields.next(), fields.next(), fields.next(), fields.next()),
        (Some(h), Some(m), Some(s), None)
            if is_digits(h, 1..=2) && is_digits(m, 2..=2) && is_digits(s, 2..=2)
    );
    date_ok && clock_ok && matches!(meridiem, "AM" | "PM")
}

fn is_digits(field: &str, len: std::ops::RangeInclusive<usize>) -> bool {
    len.contains(&field.len()) && field.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(rfc3339: &str, rate: u16) -> HeartRateSample {
        HeartRateSample {
            time: DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc),
            rate,
        }
    }

    #[test]
    fn test_format_matches_recording_layout() {
        let est = LineFormat::new("EST", -300).unwrap();
        let line = est.format(&sample("2024-11-17T20:04:05Z", 72));
        assert_eq!(line, "11/17/2024, 3:04:05 PM EST: 72 bpm");

        let utc = LineFormat::utc();
        let line = utc.format(&sample("2024-01-02T00:00:09Z", 101));
        assert_eq!(line, "01/02/2024, 12:00:09 AM UTC: 101 bpm");
    }

    #[test]
    fn test_parse_line() {
        let format = LineFormat::utc();
        let parsed = format
            .parse_line("11/17/2024, 3:04:05 PM EST: 72 bpm")
            .unwrap();
        assert_eq!(parsed.rate, 72);
        assert_eq!(parsed.time, sample("2024-11-17T20:04:05Z", 72).time);

        let parsed = format
            .parse_line("11/17/2024, 11:04:05 AM PDT: 180 bpm\n")
            .unwrap();
        assert_eq!(parsed.time, sample("2024-11-17T18:04:05Z", 0).time);
    }

    #[test]
    fn test_custom_zone_round_trips() {
        let format = LineFormat::new("CET", 60).unwrap();
        let original = sample("2024-06-01T12:30:00Z", 64);
        let parsed = format.parse_line(&format.format(&original)).unwrap();
        assert_eq!(parsed.time, original.time);
        assert_eq!(parsed.rate, 64);
    }

    #[test]
    fn test_rejects_malformed_lines() {
        let format = LineFormat::utc();
        assert_eq!(
            format.parse_line("garbage"),
            Err(LineParseError::MissingSeparator)
        );
        assert!(matches!(
            format.parse_line("11/17/2024, 3:04:05 PM EST: 72"),
            Err(LineParseError::BadRate(_))
        ));
        assert!(matches!(
            format.parse_line("11/17/2024, 3:04:05 PM EST: -72 bpm"),
            Err(LineParseError::BadRate(_))
        ));
        assert!(matches!(
            format.parse_line("11/17/2024, 3:04:05 PM XYZ: 72 bpm"),
            Err(LineParseError::UnknownZone(_))
        ));
        assert!(matches!(
            format.parse_line("1/17/2024, 3:04:05 PM EST: 72 bpm"),
            Err(LineParseError::BadTimestamp(_))
        ));
        assert!(matches!(
            format.parse_line("11/17/2024, 3:04:05 EST: 72 bpm"),
            Err(LineParseError::BadTimestamp(_))
        ));
        assert!(!format.is_well_formed("11/17/2024 3:04:05 PM EST: 72 bpm"));
        assert!(!format.is_well_formed("11/17/2024, 3:04:05 pm EST: 72 bpm"));
        assert!(!format.is_well_formed("11/17/2024, 3:4:5 PM EST: 72 bpm"));
        assert!(!format.is_well_formed("11/17/2024,  3:04:05 PM EST: 72 bpm"));
        assert!(!format.is_well_formed("11/17/2024, 123:04:05 PM EST: 72 bpm"));
        assert!(!format.is_well_formed("11/17/2024, 3:04:05  PM EST: 72 bpm"));
        assert!(format.is_well_formed("11/17/2024, 03:04:05 AM EST: 72 bpm"));
        assert!(format.is_well_formed("11/17/2024, 3:04:05 PM EST: 72 bpm"));
    }

    #[test]
    fn test_invalid_zone_configuration() {
        assert!(LineFormat::new("est", -300).is_none());
        assert!(LineFormat::new("EASTERN", -300).is_none());
        assert!(LineFormat::new("EST", 24 * 60).is_none());

        let settings = RecordingSettings {
            zone_abbreviation: "bad".to_string(),
            ..RecordingSettings::default()
        };
        assert_eq!(LineFormat::from_settings(&settings).abbreviation(), "UTC");
    }

    #[test]
    fn test_average_interval() {
        let format = LineFormat::utc();
        let lines: Vec<_> = [
            "11/17/2024, 3:04:05 PM UTC: 72 bpm",
            "11/17/2024, 3:04:06 PM UTC: 73 bpm",
            "11/17/2024, 3:04:08 PM UTC: 74 bpm",
        ]
        .iter()
        .map(|line| format.parse_line(line).unwrap())
        .collect();
        assert_eq!(average_interval(&lines), Some(1.5));
        assert_eq!(average_interval(&lines[..1]), None);
        assert_eq!(average_interval(&[]), None);
    }
}
