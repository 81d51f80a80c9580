use chrono::{DateTime, NaiveDate, NaiveDateTime};

const NANOS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Formats editor timestamps for the getData API.
pub trait TimestampFormatter: Send + Sync {
    /// Returns `YYYY-MM-DDTHH:MM:SS.nnnnnnnnn`, or an empty string when the
    /// input is not a timestamp.
    fn to_fixed_nanos(&self, input: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChronoTimestampFormatter;

impl ChronoTimestampFormatter {
    fn parse(input: &str) -> Option<NaiveDateTime> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
            return Some(dt.naive_utc());
        }

        for format in DATETIME_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
                return Some(dt);
            }
        }

        NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    }
}

impl TimestampFormatter for ChronoTimestampFormatter {
    fn to_fixed_nanos(&self, input: &str) -> String {
        Self::parse(input)
            .map(|dt| dt.format(NANOS_FORMAT).to_string())
            .unwrap_or_default()
    }
}
