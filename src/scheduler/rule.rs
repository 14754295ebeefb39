//! Recurrence rules for scheduled jobs.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveTime, TimeZone};
use croner::Cron;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// When a scheduled job fires.
///
/// Stored untagged, so a schedule entry reads as `{"time": "09:30"}`,
/// `{"every_seconds": 600}` or `{"cron": "0 */2 * * *"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecurrenceRule {
    /// Once a day at `HH:MM` local time
    DailyAt { time: String },
    /// Fixed interval
    Every { every_seconds: u64 },
    /// Standard cron expression
    Cron { cron: String },
}

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("time pattern is a valid regex")
    })
}

/// Parse a strict 24-hour `HH:MM` string.
pub fn parse_daily_time(time: &str) -> Result<NaiveTime, String> {
    let caps = time_pattern()
        .captures(time)
        .ok_or_else(|| format!("invalid time '{}': expected HH:MM (00:00-23:59)", time))?;
    let hour: u32 = caps[1].parse().map_err(|_| format!("invalid hour in '{}'", time))?;
    let minute: u32 = caps[2].parse().map_err(|_| format!("invalid minute in '{}'", time))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| format!("invalid time '{}'", time))
}

impl RecurrenceRule {
    pub fn daily_at(time: impl Into<String>) -> Self {
        Self::DailyAt { time: time.into() }
    }

    pub fn every(seconds: u64) -> Self {
        Self::Every {
            every_seconds: seconds,
        }
    }

    pub fn cron(expr: impl Into<String>) -> Self {
        Self::Cron { cron: expr.into() }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::DailyAt { time } => parse_daily_time(time).map(|_| ()),
            Self::Every { every_seconds } => {
                if *every_seconds == 0 {
                    Err("interval must be at least one second".to_string())
                } else {
                    Ok(())
                }
            }
            Self::Cron { cron } => Cron::new(cron)
                .parse()
                .map(|_| ())
                .map_err(|e| format!("invalid cron expression '{}': {}", cron, e)),
        }
    }

    /// First fire time strictly after `now`, or `None` for an invalid rule.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Self::DailyAt { time } => {
                let time = parse_daily_time(time).ok()?;
                let tz = now.timezone();
                let mut date = now.date_naive();
                // A local time can be skipped by a DST jump, so look a few days ahead.
                for _ in 0..3 {
                    if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest()
                    {
                        if candidate > *now {
                            return Some(candidate);
                        }
                    }
                    date = date.succ_opt()?;
                }
                None
            }
            Self::Every { every_seconds } => {
                if *every_seconds == 0 {
                    return None;
                }
                let step = chrono::Duration::seconds(i64::try_from(*every_seconds).ok()?);
                now.clone().checked_add_signed(step)
            }
            Self::Cron { cron } => {
                let cron = Cron::new(cron).parse().ok()?;
                cron.find_next_occurrence(now, false).ok()
            }
        }
    }
}

impl std::fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DailyAt { time } => write!(f, "daily at {}", time),
            Self::Every { every_seconds } => write!(f, "every {}s", every_seconds),
            Self::Cron { cron } => write!(f, "cron '{}'", cron),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Utc};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_daily_time_validation() {
        assert!(parse_daily_time("00:00").is_ok());
        assert!(parse_daily_time("23:59").is_ok());
        assert!(parse_daily_time("24:00").is_err());
        assert!(parse_daily_time("9:30").is_err());
        assert!(parse_daily_time("12:60").is_err());
        assert!(parse_daily_time("noon").is_err());
    }

    #[test]
    fn test_daily_next_fire() {
        let rule = RecurrenceRule::daily_at("09:30");

        let next = rule.next_after(&at("2026-03-01T08:00:00Z")).unwrap();
        assert_eq!(next, at("2026-03-01T09:30:00Z"));

        // Exactly at the fire time moves to the next day.
        let next = rule.next_after(&at("2026-03-01T09:30:00Z")).unwrap();
        assert_eq!(next, at("2026-03-02T09:30:00Z"));
    }

    #[test]
    fn test_interval_and_cron() {
        let now = at("2026-03-01T08:00:00Z");
        assert_eq!(
            RecurrenceRule::every(90).next_after(&now).unwrap(),
            at("2026-03-01T08:01:30Z")
        );
        assert!(RecurrenceRule::every(0).next_after(&now).is_none());
        assert!(RecurrenceRule::every(0).validate().is_err());

        let next = RecurrenceRule::cron("15 */2 * * *").next_after(&now).unwrap();
        assert_eq!(next.minute(), 15);
        assert_eq!(next.hour(), 8);

        assert!(RecurrenceRule::cron("not a cron").validate().is_err());
    }

    #[test]
    fn test_untagged_encoding() {
        let rules: Vec<RecurrenceRule> =
            serde_json::from_str(r#"[{"time":"07:05"},{"every_seconds":60},{"cron":"0 * * * *"}]"#)
                .unwrap();
        assert_eq!(
            rules,
            vec![
                RecurrenceRule::daily_at("07:05"),
                RecurrenceRule::every(60),
                RecurrenceRule::cron("0 * * * *"),
            ]
        );
    }
}
