//! Time-based triggers that start batches.
//!
//! A [`ScheduledTrigger`] binds a device set, a command set, credentials and
//! batch options to a daily, weekly or monthly time of day. The
//! [`Scheduler`] keeps the trigger set, computes next-fire times and hands a
//! snapshot of each firing trigger to a caller-supplied callback, which
//! decides whether a batch actually starts.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeZone, Weekday};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::batch::BatchOptions;
use crate::device::{Credentials, Device};
use crate::error::PlinkError;

pub use runner::{Scheduler, TriggerFuture};

mod runner;
pub mod schedule;

/// Recurrence shape of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Daily,
    Weekly,
    Monthly,
}

/// Wall-clock time of day, parsed from `HH:MM` (24-hour).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self, PlinkError> {
        if hour > 23 {
            return Err(PlinkError::Validation(format!("invalid hour: {hour}")));
        }
        if minute > 59 {
            return Err(PlinkError::Validation(format!("invalid minute: {minute}")));
        }
        Ok(Self { hour, minute })
    }

    pub fn parse(text: &str) -> Result<Self, PlinkError> {
        let (hour, minute) = text
            .trim()
            .split_once(':')
            .ok_or_else(|| PlinkError::Validation(format!("invalid time format: {text}")))?;
        let hour = hour
            .parse::<u32>()
            .map_err(|_| PlinkError::Validation(format!("invalid hour: {hour}")))?;
        let minute = minute
            .parse::<u32>()
            .map_err(|_| PlinkError::Validation(format!("invalid minute: {minute}")))?;
        Self::new(hour, minute)
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A validated recurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Daily(TimeOfDay),
    Weekly { time: TimeOfDay, days: Vec<Weekday> },
    Monthly { time: TimeOfDay, day: u32 },
}

impl Schedule {
    /// First fire time strictly after `now`, in naive local time.
    pub fn next_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Schedule::Daily(time) => schedule::next_daily(now, *time),
            Schedule::Weekly { time, days } => schedule::next_weekly(now, *time, days),
            Schedule::Monthly { time, day } => schedule::next_monthly(now, *time, *day),
        }
    }

    /// First fire time strictly after `now` that exists in the local time zone.
    ///
    /// Wall-clock times skipped by a daylight-saving jump are passed over.
    pub fn next_fire(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut cursor = now.naive_local();
        for _ in 0..8 {
            let candidate = self.next_after(cursor)?;
            if let Some(fire) = Local.from_local_datetime(&candidate).earliest()
                && fire > now
            {
                return Some(fire);
            }
            cursor = candidate;
        }
        None
    }
}

/// Converts `0 = Sunday .. 6 = Saturday` to a weekday.
pub fn weekday_from_index(index: u8) -> Result<Weekday, PlinkError> {
    match index {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        other => Err(PlinkError::Validation(format!("invalid day of week: {other}"))),
    }
}

/// A named time-based rule producing one batch per fire.
///
/// Serialized in camelCase with ISO-8601 timestamps; this is the record
/// that callers persist and feed back through [`Scheduler::load_triggers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTrigger {
    /// Assigned on add when empty.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub enabled: bool,
    #[serde(alias = "scheduleType")]
    pub schedule_kind: ScheduleKind,
    /// `HH:MM`, 24-hour.
    pub time: String,
    /// Weekly triggers only, `0 = Sunday .. 6 = Saturday`.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    /// Monthly triggers only, `1..=31`.
    #[serde(default)]
    pub day_of_month: u32,
    pub credentials: Credentials,
    pub devices: Vec<Device>,
    pub commands: Vec<String>,
    #[serde(default)]
    pub options: BatchOptions,
    #[serde(default, alias = "lastRun", skip_serializing_if = "Option::is_none")]
    pub last_fire: Option<DateTime<Local>>,
    #[serde(default, alias = "nextRun", skip_serializing_if = "Option::is_none")]
    pub next_fire: Option<DateTime<Local>>,
}

impl ScheduledTrigger {
    /// Creates an enabled daily trigger with an empty id.
    pub fn daily(name: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            enabled: true,
            schedule_kind: ScheduleKind::Daily,
            time: time.into(),
            days_of_week: Vec::new(),
            day_of_month: 0,
            credentials: Credentials::default(),
            devices: Vec::new(),
            commands: Vec::new(),
            options: BatchOptions::default(),
            last_fire: None,
            next_fire: None,
        }
    }

    /// Turns the trigger into a weekly one on `days` (`0 = Sunday`).
    pub fn on_days(mut self, days: impl IntoIterator<Item = u8>) -> Self {
        self.schedule_kind = ScheduleKind::Weekly;
        self.days_of_week = days.into_iter().collect();
        self
    }

    /// Turns the trigger into a monthly one on `day`.
    pub fn on_day_of_month(mut self, day: u32) -> Self {
        self.schedule_kind = ScheduleKind::Monthly;
        self.day_of_month = day;
        self
    }

    pub fn with_batch(
        mut self,
        devices: Vec<Device>,
        commands: Vec<String>,
        credentials: Credentials,
    ) -> Self {
        self.devices = devices;
        self.commands = commands;
        self.credentials = credentials;
        self
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the time and recurrence fields.
    pub fn schedule(&self) -> Result<Schedule, PlinkError> {
        let time = TimeOfDay::parse(&self.time)?;
        match self.schedule_kind {
            ScheduleKind::Daily => Ok(Schedule::Daily(time)),
            ScheduleKind::Weekly => {
                if self.days_of_week.is_empty() {
                    return Err(PlinkError::Validation(
                        "weekly schedule requires at least one day".to_string(),
                    ));
                }
                let days = self
                    .days_of_week
                    .iter()
                    .copied()
                    .collect::<BTreeSet<u8>>()
                    .into_iter()
                    .map(weekday_from_index)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Schedule::Weekly { time, days })
            }
            ScheduleKind::Monthly => {
                if !(1..=31).contains(&self.day_of_month) {
                    return Err(PlinkError::Validation(format!(
                        "invalid day of month: {}",
                        self.day_of_month
                    )));
                }
                Ok(Schedule::Monthly {
                    time,
                    day: self.day_of_month,
                })
            }
        }
    }

    /// Batch options for a run of this trigger; transcripts are grouped by trigger name.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            schedule_name: Some(self.name.clone()),
            ..self.options.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn time_of_day_accepts_24_hour_times() {
        let time = TimeOfDay::parse("09:30").expect("parse");
        assert_eq!((time.hour(), time.minute()), (9, 30));
        assert_eq!(TimeOfDay::parse("0:5").expect("parse").to_string(), "00:05");
        assert_eq!(TimeOfDay::parse("23:59").expect("parse").to_string(), "23:59");
    }

    #[test]
    fn time_of_day_rejects_malformed_and_out_of_range() {
        for bad in ["24:00", "12:60", "noon", "12", "12:xx", ""] {
            assert!(
                matches!(TimeOfDay::parse(bad), Err(PlinkError::Validation(_))),
                "{bad} must be rejected"
            );
        }
    }

    #[test]
    fn weekly_trigger_requires_days_in_range() {
        let empty = ScheduledTrigger::daily("w", "09:30").on_days([]);
        assert!(matches!(empty.schedule(), Err(PlinkError::Validation(_))));

        let bad = ScheduledTrigger::daily("w", "09:30").on_days([1, 7]);
        assert!(matches!(bad.schedule(), Err(PlinkError::Validation(_))));

        let ok = ScheduledTrigger::daily("w", "09:30").on_days([5, 1, 3, 1]);
        assert_eq!(
            ok.schedule().expect("schedule"),
            Schedule::Weekly {
                time: TimeOfDay::new(9, 30).expect("time"),
                days: vec![Weekday::Mon, Weekday::Wed, Weekday::Fri],
            }
        );
    }

    #[test]
    fn monthly_trigger_requires_day_in_range() {
        for day in [0, 32] {
            let trigger = ScheduledTrigger::daily("m", "01:00").on_day_of_month(day);
            assert!(matches!(trigger.schedule(), Err(PlinkError::Validation(_))));
        }
        let trigger = ScheduledTrigger::daily("m", "01:00").on_day_of_month(31);
        assert!(trigger.schedule().is_ok());
    }

    #[test]
    fn next_fire_is_in_the_future_at_the_scheduled_time() {
        let schedule = ScheduledTrigger::daily("d", "09:30")
            .on_days([1, 3, 5])
            .schedule()
            .expect("schedule");
        let now = Local::now();
        let next = schedule.next_fire(now).expect("next fire");

        assert!(next > now);
        assert!(matches!(next.weekday(), Weekday::Mon | Weekday::Wed | Weekday::Fri));
        assert_eq!((next.hour(), next.minute(), next.second()), (9, 30, 0));
    }

    #[test]
    fn trigger_record_round_trips_with_legacy_field_names() {
        let json = r#"{
            "id": "t1",
            "name": "nightly",
            "enabled": true,
            "scheduleType": "weekly",
            "time": "02:15",
            "daysOfWeek": [0, 6],
            "credentials": {"user": "admin", "password": "pw", "enablePassword": "en"},
            "devices": [{"ip": "10.0.0.1", "hostname": "r1"}],
            "commands": ["show clock"],
            "lastRun": "2026-03-01T02:15:00+00:00"
        }"#;
        let trigger: ScheduledTrigger = serde_json::from_str(json).expect("parse");

        assert_eq!(trigger.schedule_kind, ScheduleKind::Weekly);
        assert_eq!(trigger.credentials.privileged_password.as_deref(), Some("en"));
        assert_eq!(trigger.options.pool_size, 1);
        assert!(trigger.options.disable_paging);
        assert!(trigger.last_fire.is_some());
        assert!(trigger.next_fire.is_none());

        let value = serde_json::to_value(&trigger).expect("serialize");
        assert_eq!(value["scheduleKind"], "weekly");
        assert_eq!(value["daysOfWeek"], serde_json::json!([0, 6]));
        assert!(value.get("nextFire").is_none());
        let again: ScheduledTrigger = serde_json::from_value(value).expect("parse again");
        assert_eq!(again, trigger);
    }

    #[test]
    fn batch_options_carry_the_trigger_name() {
        let trigger = ScheduledTrigger::daily("nightly backup", "02:00");
        assert_eq!(
            trigger.batch_options().schedule_name.as_deref(),
            Some("nightly backup")
        );
    }
}
