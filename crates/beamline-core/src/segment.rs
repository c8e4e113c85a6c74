use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed segment lengths supported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentGranularity {
    Minute,
    FiveMinute,
    FifteenMinute,
    ThirtyMinute,
    Hour,
    SixHour,
    Day,
}

impl SegmentGranularity {
    /// Segment length in milliseconds.
    pub fn as_millis(&self) -> i64 {
        match self {
            SegmentGranularity::Minute => 60_000,
            SegmentGranularity::FiveMinute => 5 * 60_000,
            SegmentGranularity::FifteenMinute => 15 * 60_000,
            SegmentGranularity::ThirtyMinute => 30 * 60_000,
            SegmentGranularity::Hour => 3_600_000,
            SegmentGranularity::SixHour => 6 * 3_600_000,
            SegmentGranularity::Day => 24 * 3_600_000,
        }
    }

    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.as_millis() as u64)
    }

    /// Floor a timestamp to the start of its segment.
    ///
    /// Euclidean division so pre-epoch timestamps floor toward negative
    /// infinity rather than toward zero.
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let span = self.as_millis();
        let floored = ts.timestamp_millis().div_euclid(span) * span;
        DateTime::<Utc>::from_timestamp_millis(floored)
            .expect("floored timestamp within chrono range")
    }
}

impl fmt::Display for SegmentGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentGranularity::Minute => "minute",
            SegmentGranularity::FiveMinute => "five-minute",
            SegmentGranularity::FifteenMinute => "fifteen-minute",
            SegmentGranularity::ThirtyMinute => "thirty-minute",
            SegmentGranularity::Hour => "hour",
            SegmentGranularity::SixHour => "six-hour",
            SegmentGranularity::Day => "day",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SegmentGranularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minute" => Ok(SegmentGranularity::Minute),
            "five-minute" | "five_minute" => Ok(SegmentGranularity::FiveMinute),
            "fifteen-minute" | "fifteen_minute" => Ok(SegmentGranularity::FifteenMinute),
            "thirty-minute" | "thirty_minute" => Ok(SegmentGranularity::ThirtyMinute),
            "hour" => Ok(SegmentGranularity::Hour),
            "six-hour" | "six_hour" => Ok(SegmentGranularity::SixHour),
            "day" => Ok(SegmentGranularity::Day),
            other => Err(format!(
                "unsupported segment granularity: {}. Supported: minute, five-minute, \
                 fifteen-minute, thirty-minute, hour, six-hour, day",
                other
            )),
        }
    }
}

/// One time bucket: the half-open interval `[start, start + granularity)`.
///
/// An event belongs to the segment its timestamp truncates into, so an
/// event exactly on a boundary lands in the later segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentKey {
    start: DateTime<Utc>,
    granularity: SegmentGranularity,
}

impl SegmentKey {
    /// The segment containing `ts`.
    pub fn containing(ts: DateTime<Utc>, granularity: SegmentGranularity) -> Self {
        Self {
            start: granularity.truncate(ts),
            granularity,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end of the interval.
    pub fn end(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(
            self.start.timestamp_millis() + self.granularity.as_millis(),
        )
        .expect("segment end within chrono range")
    }

    pub fn granularity(&self) -> SegmentGranularity {
        self.granularity
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end()
    }

    /// The segment immediately after this one.
    pub fn next(&self) -> Self {
        Self {
            start: self.end(),
            granularity: self.granularity,
        }
    }
}

impl fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end().format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}
