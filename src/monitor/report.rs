//! Staleness reports emitted by the pollers.

use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Most recent activity of one sensor, as seen in one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityReport {
    /// Sensor the report is about
    pub sensor_id: String,
    /// Newest timestamp across all of the sensor's capability logs
    pub last_activity: DateTime<Utc>,
    /// Time elapsed between `last_activity` and the poll
    #[serde(with = "duration_millis")]
    pub since: Duration,
}

impl ActivityReport {
    /// Build a report for `last_activity` as observed at `now`.
    pub fn new(
        sensor_id: impl Into<String>,
        last_activity: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            last_activity,
            since: now - last_activity,
        }
    }

    /// `last_activity` in local time, `ctime` style.
    pub fn last_activity_display(&self) -> String {
        self.last_activity
            .with_timezone(&Local)
            .format("%a %b %e %H:%M:%S %Y")
            .to_string()
    }

    /// `since` as `[-]H:MM:SS`.
    pub fn since_display(&self) -> String {
        let total = self.since.num_seconds();
        let sign = if total < 0 { "-" } else { "" };
        let total = total.abs();
        format!(
            "{sign}{}:{:02}:{:02}",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )
    }
}

impl fmt::Display for ActivityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sid\t{}\tlast activity {}\tago :: {}",
            self.sensor_id,
            self.since_display(),
            self.last_activity_display()
        )
    }
}

/// Convert a log member (unix seconds, possibly fractional) into a timestamp.
pub fn parse_timestamp(member: &str) -> Option<DateTime<Utc>> {
    let secs: f64 = member.trim().parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1000.0).round() as i64;
    DateTime::from_timestamp_millis(millis)
}

mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.num_milliseconds().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            parse_timestamp("250"),
            DateTime::from_timestamp(250, 0)
        );
        assert_eq!(
            parse_timestamp("1700000000.5"),
            DateTime::from_timestamp_millis(1_700_000_000_500)
        );
        assert_eq!(parse_timestamp("not-a-time"), None);
        assert_eq!(parse_timestamp("NaN"), None);
    }

    #[test]
    fn test_since() {
        let last = DateTime::from_timestamp(1_000, 0).unwrap();
        let now = DateTime::from_timestamp(1_000 + 3_725, 0).unwrap();
        let report = ActivityReport::new("s1", last, now);

        assert_eq!(report.since, Duration::seconds(3_725));
        assert_eq!(report.since_display(), "1:02:05");
        assert!(report.to_string().starts_with("sid\ts1\tlast activity 1:02:05"));
    }

    #[test]
    fn test_future_activity_is_negative() {
        let last = DateTime::from_timestamp(100, 0).unwrap();
        let now = DateTime::from_timestamp(40, 0).unwrap();
        assert_eq!(ActivityReport::new("s1", last, now).since_display(), "-0:01:00");
    }

    #[test]
    fn test_serializes_since_as_millis() {
        let last = DateTime::from_timestamp(0, 0).unwrap();
        let now = DateTime::from_timestamp(2, 0).unwrap();
        let json = serde_json::to_value(ActivityReport::new("s1", last, now)).unwrap();
        assert_eq!(json["since"], 2000);
    }
}
