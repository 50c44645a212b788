//! Circuit schedule entries.
//!
//! Schedules are stored with the circuit and validated on input; a circuit
//! carrying schedules is not deployed at creation time.

use crate::error::{EvcError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a schedule entry does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    /// Deploy the circuit.
    #[default]
    Create,
    /// Remove the circuit.
    Remove,
}

fn new_schedule_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// One schedule entry. Exactly one trigger (`date`, `interval`,
/// `frequency`) must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSchedule {
    /// Entry id.
    #[serde(default = "new_schedule_id")]
    pub id: String,
    /// One-shot trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// Periodic trigger (`weeks`, `days`, `hours`, `minutes`, `seconds`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<BTreeMap<String, u64>>,
    /// Cron-style trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    /// Action.
    #[serde(default)]
    pub action: ScheduleAction,
}

const INTERVAL_UNITS: [&str; 5] = ["weeks", "days", "hours", "minutes", "seconds"];

impl CircuitSchedule {
    /// Checks the trigger fields.
    pub fn validate(&self) -> Result<()> {
        let triggers = [
            self.date.is_some(),
            self.interval.is_some(),
            self.frequency.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if triggers != 1 {
            return Err(EvcError::validation(format!(
                "Schedule {} must set exactly one of date, interval or frequency",
                self.id
            )));
        }

        if let Some(interval) = &self.interval {
            if interval.is_empty() || interval.values().all(|v| *v == 0) {
                return Err(EvcError::validation(format!(
                    "Schedule {} has an empty interval",
                    self.id
                )));
            }
            if let Some(unit) = interval.keys().find(|k| !INTERVAL_UNITS.contains(&k.as_str())) {
                return Err(EvcError::validation(format!(
                    "Schedule {} has an unknown interval unit '{}'",
                    self.id, unit
                )));
            }
        }

        if let Some(frequency) = &self.frequency {
            if frequency.split_whitespace().count() != 5 {
                return Err(EvcError::validation(format!(
                    "Schedule {} frequency must have five cron fields",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deserialize_defaults() {
        let schedule: CircuitSchedule =
            serde_json::from_str(r#"{"frequency": "0 * * * *"}"#).unwrap();
        assert_eq!(schedule.id.len(), 32);
        assert_eq!(schedule.action, ScheduleAction::Create);
        assert!(schedule.validate().is_ok());
    }

    #[test]
    fn test_exactly_one_trigger() {
        let schedule: CircuitSchedule = serde_json::from_str(
            r#"{"frequency": "0 * * * *", "date": "2030-01-01T00:00:00Z", "action": "remove"}"#,
        )
        .unwrap();
        assert!(schedule.validate().is_err());

        let schedule: CircuitSchedule = serde_json::from_str(r#"{"action": "remove"}"#).unwrap();
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_interval_units() {
        let schedule: CircuitSchedule =
            serde_json::from_str(r#"{"interval": {"hours": 2}}"#).unwrap();
        assert!(schedule.validate().is_ok());

        let schedule: CircuitSchedule =
            serde_json::from_str(r#"{"interval": {"fortnights": 1}}"#).unwrap();
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_bad_frequency() {
        let schedule: CircuitSchedule =
            serde_json::from_str(r#"{"frequency": "hourly"}"#).unwrap();
        assert!(schedule.validate().is_err());
    }
}
