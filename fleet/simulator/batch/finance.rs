//! Per-driver trip economics and daily summaries.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

use crate::helper::{round_to, short_id};

const FRAUD_PROBABILITY: f64 = 0.12;
const WORKDAY_SECONDS: i64 = 12 * 3600;

/// Desk stance reported on the daily summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingPosition {
    /// No change.
    Hold,
    /// Leaning long.
    LongBias,
    /// Leaning short.
    ShortBias,
    /// Reducing exposure.
    RiskOff,
}

impl TradingPosition {
    const ALL: [Self; 4] = [Self::Hold, Self::LongBias, Self::ShortBias, Self::RiskOff];
}

/// One completed trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    /// `trip_` + 10 hex characters.
    pub event_id: String,
    /// Driver identifier.
    pub driver_id: String,
    /// Trip time.
    pub timestamp: String,
    /// Fare earned.
    pub revenue: f64,
    /// Fuel spend.
    pub fuel_cost: f64,
    /// Tolls paid.
    pub toll_fees: f64,
    /// Amortised maintenance.
    pub maintenance_cost: f64,
    /// Sum of the three costs.
    pub total_cost: f64,
    /// Risk signal.
    pub fraud_alert: bool,
}

impl Trip {
    /// Draws a trip for `driver_id` at `at`.
    pub fn simulate<R: Rng + ?Sized>(driver_id: &str, at: NaiveDateTime, rng: &mut R) -> Self {
        let fuel_cost = round_to(rng.gen_range(2.0..=15.0), 2);
        let toll_fees = round_to(rng.gen_range(0.0..=7.0), 2);
        let maintenance_cost = round_to(rng.gen_range(0.5..=5.0), 2);
        Self {
            event_id: short_id("trip", 10),
            driver_id: driver_id.to_string(),
            timestamp: at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            revenue: round_to(rng.gen_range(10.0..=120.0), 2),
            fuel_cost,
            toll_fees,
            maintenance_cost,
            total_cost: round_to(fuel_cost + toll_fees + maintenance_cost, 2),
            fraud_alert: rng.gen_bool(FRAUD_PROBABILITY),
        }
    }
}

/// A driver's day of trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyFinance {
    /// `daily_finance_` + 10 hex characters.
    pub event_id: String,
    /// Driver identifier.
    pub driver_id: String,
    /// Calendar day.
    pub date: NaiveDate,
    /// Sum of trip revenue.
    pub total_revenue: f64,
    /// Sum of trip costs.
    pub total_cost: f64,
    /// Revenue minus cost.
    pub net_profit: f64,
    /// Trips flagged for fraud.
    pub fraud_alerts_count: usize,
    /// Reported stance.
    pub trading_position: TradingPosition,
    /// Simulated closing balance.
    pub end_of_day_balance: f64,
    /// Individual trips.
    pub trips: Vec<Trip>,
}

impl DailyFinance {
    /// Draws `trip_count` trips spread over the first 12 hours of `date`.
    pub fn simulate<R: Rng + ?Sized>(
        driver_id: &str,
        date: NaiveDate,
        trip_count: usize,
        rng: &mut R,
    ) -> Self {
        let midnight = date.and_time(NaiveTime::MIN);
        let trips: Vec<Trip> = (0..trip_count)
            .map(|_| {
                let offset = Duration::seconds(rng.gen_range(0..=WORKDAY_SECONDS));
                Trip::simulate(driver_id, midnight + offset, rng)
            })
            .collect();

        let total_revenue = round_to(trips.iter().map(|t| t.revenue).sum(), 2);
        let total_cost = round_to(trips.iter().map(|t| t.total_cost).sum(), 2);
        let net_profit = round_to(total_revenue - total_cost, 2);
        let trading_position = *TradingPosition::ALL
            .choose(rng)
            .unwrap_or(&TradingPosition::Hold);
        let opening = round_to(rng.gen_range(200.0..=1500.0), 2);

        Self {
            event_id: short_id("daily_finance", 10),
            driver_id: driver_id.to_string(),
            date,
            total_revenue,
            total_cost,
            net_profit,
            fraud_alerts_count: trips.iter().filter(|t| t.fraud_alert).count(),
            trading_position,
            end_of_day_balance: round_to(opening + net_profit, 2),
            trips,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::seeded_rng;

    #[test]
    fn summary_totals_match_trips() {
        let mut rng = seeded_rng(5);
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let day = DailyFinance::simulate("DR_002", date, 9, &mut rng);
        assert_eq!(day.trips.len(), 9);
        let revenue: f64 = day.trips.iter().map(|t| t.revenue).sum();
        assert!((day.total_revenue - revenue).abs() < 0.011);
        assert!((day.net_profit - (day.total_revenue - day.total_cost)).abs() < 0.011);
        assert_eq!(
            day.fraud_alerts_count,
            day.trips.iter().filter(|t| t.fraud_alert).count()
        );
        for trip in &day.trips {
            assert!((10.0..=120.0).contains(&trip.revenue));
            let costs = trip.fuel_cost + trip.toll_fees + trip.maintenance_cost;
            assert!((trip.total_cost - costs).abs() < 0.011);
            assert!(trip.timestamp.starts_with("2025-01-31T"));
            let hour: u32 = trip.timestamp[11..13].parse().unwrap();
            assert!(hour <= 12);
        }
    }

    #[test]
    fn serializes_with_snake_case_position_and_iso_date() {
        let mut rng = seeded_rng(8);
        let date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        let day = DailyFinance::simulate("DR_004", date, 5, &mut rng);
        let value = serde_json::to_value(&day).unwrap();
        assert_eq!(value["date"], "2025-03-04");
        let position = value["trading_position"].as_str().unwrap();
        assert!(["hold", "long_bias", "short_bias", "risk_off"].contains(&position));
        assert_eq!(value["trips"].as_array().unwrap().len(), 5);
    }
}
