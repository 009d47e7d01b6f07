//! Timestamp normalization.
//!
//! SQLite has no timestamp type; applications store whatever text their
//! driver produced. Values carrying an offset are absolute. Naive values are
//! wall-clock times in the deployment's reference zone and are converted to
//! UTC using a fixed offset.

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, SecondsFormat, TimeZone, Utc,
};

use crate::core::value::SqlValue;

/// Formats that carry their own offset.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M%:z",
];

/// Naive formats interpreted in the reference zone.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Largest epoch magnitude read as seconds (around the year 5138). Larger
/// numbers are milliseconds.
const MAX_EPOCH_SECONDS: i64 = 100_000_000_000;

/// Parse a UTC offset such as `+02:00`, `-0530` or `Z`.
pub fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    s.parse::<FixedOffset>().ok()
}

/// Whether a raw value is an explicit "no value" marker: NULL, blank, or the
/// literal text `null`.
pub fn is_null_marker(value: &SqlValue) -> bool {
    match value {
        SqlValue::Null => true,
        SqlValue::Text(s) => {
            let t = s.trim();
            t.is_empty() || t.eq_ignore_ascii_case("null")
        }
        _ => false,
    }
}

/// Converts heterogeneous timestamp representations into UTC instants.
#[derive(Debug, Clone, Copy)]
pub struct TimestampNormalizer {
    offset: FixedOffset,
}

impl TimestampNormalizer {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Normalizer for naive values already in UTC.
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Normalize a raw column value.
    ///
    /// Integers and floats are Unix epoch seconds, or milliseconds when too
    /// large to be seconds. Null markers and anything unparsable yield `None`.
    pub fn normalize(&self, raw: &SqlValue) -> Option<DateTime<Utc>> {
        match raw {
            SqlValue::Timestamp(ts) => Some(*ts),
            SqlValue::Text(s) => self.normalize_str(s),
            SqlValue::Int(n) => match n.unsigned_abs() {
                m if m <= MAX_EPOCH_SECONDS as u64 => DateTime::from_timestamp(*n, 0),
                m if m <= MAX_EPOCH_SECONDS as u64 * 1000 => DateTime::from_timestamp_millis(*n),
                _ => None,
            },
            SqlValue::Float(n) if n.is_finite() => {
                let limit = MAX_EPOCH_SECONDS as f64;
                let secs = match n.abs() {
                    m if m <= limit => *n,
                    m if m <= limit * 1000.0 => n / 1000.0,
                    _ => return None,
                };
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round() as u32;
                DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
            }
            _ => None,
        }
    }

    /// Normalize a textual timestamp.
    pub fn normalize_str(&self, raw: &str) -> Option<DateTime<Utc>> {
        let s = raw.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("null") {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }

        // A trailing Z on an otherwise space-separated value.
        let zulu;
        let s = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
            Some(stripped) => {
                zulu = format!("{}+00:00", stripped);
                zulu.as_str()
            }
            None => s,
        };

        for fmt in OFFSET_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
        }

        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return self.localize(naive);
            }
        }

        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return self.localize(date.and_hms_opt(0, 0, 0)?);
        }

        None
    }

    fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Canonical string form of a normalized instant.
pub fn canonical(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
