//! Wall-clock helpers shared by producers and consumers
//!
//! Timestamps cross machine boundaries, so every formatted timestamp is pinned
//! to one reference offset instead of the local timezone of whichever host
//! happens to print it.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};

use crate::{Result, StreamError};

/// `strftime` pattern of the `timeshot` header field (millisecond precision).
pub const TIMESHOT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// Parsing accepts any number of fractional digits.
const TIMESHOT_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Default reference offset (UTC-5, no daylight saving).
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = -5;

/// Clock that stamps and formats times in a fixed reference offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceClock {
    offset: FixedOffset,
}

impl Default for ReferenceClock {
    fn default() -> Self {
        Self { offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_HOURS * 3600).unwrap_or(Self::UTC) }
    }
}

impl ReferenceClock {
    const UTC: FixedOffset = match FixedOffset::east_opt(0) {
        Some(offset) => offset,
        None => unreachable!(),
    };

    /// Create a clock pinned to the given offset.
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Clock pinned to UTC.
    pub fn utc() -> Self {
        Self { offset: Self::UTC }
    }

    /// Create a clock from a whole-hour UTC offset (e.g. `-5`).
    pub fn from_utc_offset_hours(hours: i32) -> Result<Self> {
        hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .map(Self::new)
            .ok_or_else(|| StreamError::config(format!("UTC offset {hours}h is out of range")))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Current time in the reference offset.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Format a time as a `timeshot` string in the reference offset.
    pub fn format_timeshot<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> String {
        time.with_timezone(&self.offset).format(TIMESHOT_FORMAT).to_string()
    }

    /// Parse a `timeshot` string, interpreting it in the reference offset.
    pub fn parse_timeshot(&self, timeshot: &str) -> Result<DateTime<FixedOffset>> {
        let naive = NaiveDateTime::parse_from_str(timeshot, TIMESHOT_PARSE_FORMAT).map_err(|e| {
            StreamError::malformed(format!("invalid timeshot '{timeshot}': {e}"))
        })?;
        self.offset.from_local_datetime(&naive).single().ok_or_else(|| {
            StreamError::malformed(format!("timeshot '{timeshot}' is not a valid local time"))
        })
    }

    /// Convert fractional Unix seconds to a time in the reference offset.
    pub fn from_unix_seconds(&self, seconds: f64) -> Option<DateTime<FixedOffset>> {
        if !seconds.is_finite() {
            return None;
        }
        let whole = seconds.floor();
        let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
        DateTime::from_timestamp(whole as i64, nanos).map(|t| t.with_timezone(&self.offset))
    }
}

/// Fractional seconds since the Unix epoch.
pub fn unix_seconds<Tz: TimeZone>(time: &DateTime<Tz>) -> f64 {
    time.timestamp() as f64 + f64::from(time.timestamp_subsec_nanos()) * 1e-9
}

/// Current wall-clock time as fractional Unix seconds.
pub fn now_unix() -> f64 {
    unix_seconds(&Utc::now())
}
