//! Business hours gate.
//!
//! Decides whether a handoff is routed to humans live or answered with the
//! offline message. Times are compared in the configured IANA timezone with
//! both ends of a day's window inclusive.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

use crate::error::{ExecutaError, ExecutaResult};

pub const DAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    #[serde(default)]
    pub enabled: bool,
}

impl DaySchedule {
    pub fn new(start: &str, end: &str, enabled: bool) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
            enabled,
        }
    }

    /// Window as minutes since midnight.
    pub fn window(&self) -> Option<(u32, u32)> {
        Some((parse_hhmm(&self.start)?, parse_hhmm(&self.end)?))
    }
}

/// Per-weekday windows. A day that is absent is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monday: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuesday: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wednesday: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thursday: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friday: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturday: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sunday: Option<DaySchedule>,
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        let weekday = || Some(DaySchedule::new("09:00", "17:00", true));
        let weekend = || Some(DaySchedule::new("09:00", "17:00", false));
        Self {
            monday: weekday(),
            tuesday: weekday(),
            wednesday: weekday(),
            thursday: weekday(),
            friday: weekday(),
            saturday: weekend(),
            sunday: weekend(),
        }
    }
}

impl WeeklySchedule {
    pub fn day(&self, weekday: Weekday) -> Option<&DaySchedule> {
        match weekday {
            Weekday::Mon => self.monday.as_ref(),
            Weekday::Tue => self.tuesday.as_ref(),
            Weekday::Wed => self.wednesday.as_ref(),
            Weekday::Thu => self.thursday.as_ref(),
            Weekday::Fri => self.friday.as_ref(),
            Weekday::Sat => self.saturday.as_ref(),
            Weekday::Sun => self.sunday.as_ref(),
        }
    }

    pub fn day_mut(&mut self, weekday: Weekday) -> &mut Option<DaySchedule> {
        match weekday {
            Weekday::Mon => &mut self.monday,
            Weekday::Tue => &mut self.tuesday,
            Weekday::Wed => &mut self.wednesday,
            Weekday::Thu => &mut self.thursday,
            Weekday::Fri => &mut self.friday,
            Weekday::Sat => &mut self.saturday,
            Weekday::Sun => &mut self.sunday,
        }
    }

    /// Days in Monday-first order, paired with their lowercase names.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&DaySchedule>)> + '_ {
        [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
            Weekday::Sat,
            Weekday::Sun,
        ]
        .into_iter()
        .zip(DAYS)
        .map(move |(weekday, name)| (name, self.day(weekday)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusinessHours {
    pub enabled: bool,
    pub timezone: String,
    pub schedule: WeeklySchedule,
    pub holiday_dates: Vec<String>,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            enabled: false,
            timezone: "UTC".to_string(),
            schedule: WeeklySchedule::default(),
            holiday_dates: Vec::new(),
        }
    }
}

impl BusinessHours {
    /// Timezone used for evaluation. Unknown names fall back to UTC.
    pub fn tz(&self) -> Tz {
        match self.timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(timezone = %self.timezone, "Unknown business hours timezone, using UTC");
                Tz::UTC
            }
        }
    }

    /// Reports the first malformed entry, naming the offending day.
    pub fn validate(&self) -> ExecutaResult<()> {
        if self.timezone.parse::<Tz>().is_err() {
            return Err(ExecutaError::InvalidHandoffSettings(format!(
                "Invalid timezone '{}'",
                self.timezone
            )));
        }

        for (name, day) in self.schedule.iter() {
            let Some(day) = day.filter(|d| d.enabled) else {
                continue;
            };
            if !is_valid_time_format(&day.start) || !is_valid_time_format(&day.end) {
                return Err(ExecutaError::InvalidHandoffSettings(format!(
                    "Invalid time format for {}. Use HH:MM format.",
                    name
                )));
            }
        }

        for date in &self.holiday_dates {
            if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
                return Err(ExecutaError::InvalidHandoffSettings(format!(
                    "Invalid holiday date '{}'. Use YYYY-MM-DD format.",
                    date
                )));
            }
        }

        Ok(())
    }

    pub fn is_open_now(&self) -> bool {
        is_open_at(self, Utc::now())
    }
}

/// `HH:MM` with an optional leading zero on the hour.
pub fn is_valid_time_format(value: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-1]?[0-9]|2[0-3]):[0-5][0-9]$").expect("valid regex"))
        .is_match(value)
}

fn parse_hhmm(value: &str) -> Option<u32> {
    if !is_valid_time_format(value) {
        return None;
    }
    let time = NaiveTime::parse_from_str(value, "%H:%M").ok()?;
    Some(time.hour() * 60 + time.minute())
}

pub fn is_open_at(hours: &BusinessHours, instant: DateTime<Utc>) -> bool {
    if !hours.enabled {
        return true;
    }

    let local = instant.with_timezone(&hours.tz());

    let today = local.date_naive().format("%Y-%m-%d").to_string();
    if hours.holiday_dates.iter().any(|d| d.trim() == today) {
        return false;
    }

    let Some(day) = hours.schedule.day(local.weekday()) else {
        return false;
    };
    if !day.enabled {
        return false;
    }

    let Some((start, end)) = day.window() else {
        warn!(
            start = %day.start,
            end = %day.end,
            "Unparseable business hours window, treating day as closed"
        );
        return false;
    };

    let minutes = local.hour() * 60 + local.minute();
    minutes >= start && minutes <= end
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn monday_only(timezone: &str) -> BusinessHours {
        let mut hours = BusinessHours {
            enabled: true,
            timezone: timezone.to_string(),
            ..Default::default()
        };
        for weekday in [
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ] {
            *hours.schedule.day_mut(weekday) = None;
        }
        hours
    }

    #[test]
    fn test_disabled_gate_is_always_open() {
        let hours = BusinessHours::default();
        let sunday_night = Utc.with_ymd_and_hms(2024, 6, 2, 23, 30, 0).unwrap();
        assert!(is_open_at(&hours, sunday_night));
    }

    #[test]
    fn test_monday_window_in_configured_timezone() {
        let hours = monday_only("America/New_York");
        let tz: Tz = "America/New_York".parse().unwrap();

        let open = tz
            .with_ymd_and_hms(2024, 6, 3, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let closed = tz
            .with_ymd_and_hms(2024, 6, 3, 18, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        assert!(is_open_at(&hours, open));
        assert!(!is_open_at(&hours, closed));
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let hours = monday_only("UTC");
        let start = Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 3, 17, 0, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 6, 3, 17, 1, 0).unwrap();

        assert!(is_open_at(&hours, start));
        assert!(is_open_at(&hours, end));
        assert!(!is_open_at(&hours, after));
    }

    #[test]
    fn test_missing_and_disabled_days_are_closed() {
        let hours = monday_only("UTC");
        let tuesday = Utc.with_ymd_and_hms(2024, 6, 4, 10, 0, 0).unwrap();
        let saturday = Utc.with_ymd_and_hms(2024, 6, 8, 10, 0, 0).unwrap();

        assert!(!is_open_at(&hours, tuesday));
        assert!(!is_open_at(&hours, saturday));
    }

    #[test]
    fn test_holiday_closes_whole_day() {
        let mut hours = monday_only("UTC");
        hours.holiday_dates = vec!["2024-06-03".to_string()];
        let monday = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        assert!(!is_open_at(&hours, monday));
    }

    #[test]
    fn test_holiday_uses_local_date() {
        // 02:00 UTC on Tuesday is still Monday evening in Los Angeles.
        let mut hours = BusinessHours {
            enabled: true,
            timezone: "America/Los_Angeles".to_string(),
            ..Default::default()
        };
        hours.schedule.monday = Some(DaySchedule::new("00:00", "23:59", true));
        let instant = Utc.with_ymd_and_hms(2024, 6, 4, 2, 0, 0).unwrap();
        assert!(is_open_at(&hours, instant));

        hours.holiday_dates = vec!["2024-06-03".to_string()];
        assert!(!is_open_at(&hours, instant));
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        let hours = monday_only("Mars/Olympus_Mons");
        let monday = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        assert!(is_open_at(&hours, monday));
        assert!(hours.validate().is_err());
    }

    #[test]
    fn test_time_format() {
        assert!(is_valid_time_format("09:00"));
        assert!(is_valid_time_format("9:30"));
        assert!(is_valid_time_format("23:59"));
        assert!(!is_valid_time_format("24:00"));
        assert!(!is_valid_time_format("9am"));
        assert!(!is_valid_time_format("09:60"));
    }

    #[test]
    fn test_validate_names_the_bad_day() {
        let mut hours = BusinessHours {
            enabled: true,
            ..Default::default()
        };
        hours.schedule.wednesday = Some(DaySchedule::new("9am", "17:00", true));
        let err = hours.validate().unwrap_err();
        assert_eq!(
            err.public_message(),
            "Invalid time format for wednesday. Use HH:MM format."
        );

        // disabled days are not checked
        hours.schedule.wednesday = Some(DaySchedule::new("9am", "", false));
        assert!(hours.validate().is_ok());
    }

    #[test]
    fn test_legacy_schedule_with_missing_days() {
        let hours: BusinessHours = serde_json::from_value(serde_json::json!({
            "enabled": true,
            "timezone": "UTC",
            "schedule": { "monday": { "start": "09:00", "end": "17:00", "enabled": true } }
        }))
        .unwrap();
        assert!(hours.schedule.friday.is_none());
        assert!(hours.holiday_dates.is_empty());
    }
}
