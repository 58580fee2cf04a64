//! Daily recurring capture interval evaluated in a fixed timezone.
//!
//! Membership is a pure function of `(timestamp, start, end, timezone)`; no
//! clock is consulted, so window bounds can be computed and tested for any
//! instant.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalError {
    #[error("Time must be in HH:MM format with valid hours (0-23) and minutes (0-59): {0}")]
    InvalidTime(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),
}

/// Parses an `HH:MM` wall-clock time.
///
/// # Examples
///
/// ```
/// use alertgest_common::interval::parse_hhmm;
///
/// assert!(parse_hhmm("18:00").is_ok());
/// assert!(parse_hhmm("25:00").is_err());
/// assert!(parse_hhmm("12:60").is_err());
/// assert!(parse_hhmm("not_a_time").is_err());
/// ```
pub fn parse_hhmm(value: &str) -> Result<NaiveTime, IntervalError> {
    let invalid = || IntervalError::InvalidTime(value.to_string());
    let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

pub fn parse_timezone(value: &str) -> Result<Tz, IntervalError> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|_| IntervalError::InvalidTimezone(value.to_string()))
}

/// One concrete occurrence of the interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    /// Local calendar date on which the occurrence starts.
    pub key: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Occurrence {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// A daily `HH:MM–HH:MM` range. When `end <= start` the range rolls past
/// midnight into the next day; `end == start` is a full day, which makes
/// consecutive occurrences contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInterval {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
}

impl CaptureInterval {
    pub fn new(start: NaiveTime, end: NaiveTime, timezone: Tz) -> Self {
        Self {
            start,
            end,
            timezone,
        }
    }

    /// Builds an interval from configuration strings.
    ///
    /// # Examples
    ///
    /// ```
    /// use alertgest_common::CaptureInterval;
    ///
    /// let interval = CaptureInterval::parse("18:00", "08:00", "Europe/London").unwrap();
    /// assert!(interval.rolls_over());
    /// assert!(CaptureInterval::parse("18:00", "08:00", "Mars/Olympus").is_err());
    /// ```
    pub fn parse(start: &str, end: &str, timezone: &str) -> Result<Self, IntervalError> {
        Ok(Self::new(
            parse_hhmm(start)?,
            parse_hhmm(end)?,
            parse_timezone(timezone)?,
        ))
    }

    pub fn rolls_over(&self) -> bool {
        self.end <= self.start
    }

    /// The occurrence whose local start falls on `date`.
    pub fn occurrence_starting_on(&self, date: NaiveDate) -> Option<Occurrence> {
        let start = resolve_local(self.timezone, date.and_time(self.start))?;
        let end_date = if self.rolls_over() {
            date.succ_opt()?
        } else {
            date
        };
        let end = resolve_local(self.timezone, end_date.and_time(self.end))?;
        (start < end).then_some(Occurrence {
            key: date,
            start,
            end,
        })
    }

    /// The occurrence containing `ts`, if `ts` is inside the interval at all.
    ///
    /// An instant equal to an occurrence's end is outside that occurrence.
    pub fn occurrence_containing(&self, ts: DateTime<Utc>) -> Option<Occurrence> {
        let local_date = ts.with_timezone(&self.timezone).date_naive();
        // 每个区间最长一天，只需检查今天和昨天开始的区间
        [Some(local_date), local_date.pred_opt()]
            .into_iter()
            .flatten()
            .filter_map(|date| self.occurrence_starting_on(date))
            .find(|occurrence| occurrence.contains(ts))
    }
}

/// Maps a local wall-clock time to UTC. Ambiguous times (DST fall-back) take
/// the earlier instant; times inside a spring-forward gap move one hour later.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}
