//! Driver shift/fatigue events.

use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::helper::{round_to, short_id};

/// Fatigue index at which a shift raises an alert.
pub const FATIGUE_ALERT_THRESHOLD: f64 = 0.6;

/// One daily shift summary for a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    /// `health_` + 8 hex characters.
    pub event_id: String,
    /// Driver identifier.
    pub driver_id: String,
    /// Shift report time (10:00 UTC of the day).
    pub timestamp: String,
    /// Total shift length (hours, 1 decimal).
    pub shift_hours: f64,
    /// Longest uninterrupted driving stretch (hours, 1 decimal).
    pub continuous_driving_hours: f64,
    /// 0..=1, 2 decimals.
    pub fatigue_index: f64,
    /// True when fatigue stayed below the alert threshold.
    pub breaks_taken: bool,
    /// `fatigue_risk` when over threshold.
    pub alerts: Vec<String>,
}

impl HealthEvent {
    /// Draws a shift for `driver_id` on `date`.
    pub fn simulate<R: Rng + ?Sized>(driver_id: &str, date: NaiveDate, rng: &mut R) -> Self {
        let shift_hours = round_to(rng.gen_range(6.0..=10.0), 1);
        let continuous_driving_hours = round_to(rng.gen_range(2.0..=shift_hours.min(6.0)), 1);
        let fatigue_index = round_to(
            (continuous_driving_hours / 6.0 + rng.gen_range(-0.1..=0.1)).min(1.0),
            2,
        );
        let over = fatigue_index >= FATIGUE_ALERT_THRESHOLD;
        Self {
            event_id: short_id("health", 8),
            driver_id: driver_id.to_string(),
            timestamp: format!("{date}T10:00:00Z"),
            shift_hours,
            continuous_driving_hours,
            fatigue_index,
            breaks_taken: !over,
            alerts: if over {
                vec!["fatigue_risk".to_string()]
            } else {
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::seeded_rng;

    #[test]
    fn shift_fields_stay_in_range() {
        let mut rng = seeded_rng(11);
        let date = NaiveDate::from_ymd_opt(2025, 12, 11).unwrap();
        for _ in 0..500 {
            let event = HealthEvent::simulate("DR_001", date, &mut rng);
            assert!((6.0..=10.0).contains(&event.shift_hours));
            assert!(event.continuous_driving_hours >= 2.0);
            assert!(event.continuous_driving_hours <= event.shift_hours.min(6.0) + 0.05);
            assert!(event.fatigue_index <= 1.0);
            assert_eq!(event.breaks_taken, event.fatigue_index < FATIGUE_ALERT_THRESHOLD);
            assert_eq!(event.alerts.is_empty(), event.breaks_taken);
            assert_eq!(event.timestamp, "2025-12-11T10:00:00Z");
            assert!(event.event_id.starts_with("health_"));
        }
    }
}
