//! Emitted telemetry payload.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    helper::{round_to, short_id},
    vehicle::{Vehicle, Wheel},
};

/// Static posted limit attached to every payload.
pub const SPEED_ZONE_KPH: u32 = 50;

/// Tyre pressures keyed by wheel label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TirePsi {
    /// Front left.
    #[serde(rename = "FL")]
    pub fl: f64,
    /// Front right.
    #[serde(rename = "FR")]
    pub fr: f64,
    /// Rear left.
    #[serde(rename = "RL")]
    pub rl: f64,
    /// Rear right.
    #[serde(rename = "RR")]
    pub rr: f64,
}

/// One tick of telemetry, in the newline-delimited JSON schema consumed downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    /// `evt_` + 10 hex characters.
    pub event_id: String,
    /// Vehicle identifier.
    pub vehicle_id: String,
    /// Driver identifier.
    pub driver_id: String,
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    /// Latitude, 6 decimals.
    pub lat: f64,
    /// Longitude, 6 decimals.
    pub lon: f64,
    /// Speed (kph), 2 decimals.
    pub speed_kph: f64,
    /// Heading (degrees), 2 decimals.
    pub heading: f64,
    /// Engine temperature (°C), 2 decimals.
    pub engine_temp_c: f64,
    /// Battery voltage, 2 decimals.
    pub battery_v: f64,
    /// Tyre pressures, 2 decimals.
    pub tire_psi: TirePsi,
    /// Fuel level (%), 2 decimals.
    pub fuel_percent: f64,
    /// Posted limit reference.
    pub speed_zone_kph: u32,
    /// Speed above the zone limit.
    pub speeding: bool,
    /// Tick-over-tick speed drop large enough to count as harsh braking.
    pub harsh_brake: bool,
    /// Diagnostic codes (currently always empty).
    pub obd_codes: Vec<String>,
}

impl TelemetryPayload {
    /// Snapshot of `vehicle` at `timestamp`; `harsh_brake` starts false.
    #[must_use]
    pub fn from_vehicle(vehicle: &Vehicle, timestamp: DateTime<Utc>) -> Self {
        let identity = vehicle.identity();
        let state = vehicle.state();
        let tire = |wheel: Wheel| round_to(state.tire_psi.get(wheel), 2);
        let mut heading = round_to(state.heading_deg, 2);
        if heading >= 360.0 {
            heading = 0.0;
        }
        Self {
            event_id: short_id("evt", 10),
            vehicle_id: identity.vehicle_id.clone(),
            driver_id: identity.driver_id.clone(),
            timestamp: format_timestamp(timestamp),
            lat: round_to(state.lat, 6),
            lon: round_to(state.lon, 6),
            speed_kph: round_to(state.speed_kph, 2),
            heading,
            engine_temp_c: round_to(state.engine_temp_c, 2),
            battery_v: round_to(state.battery_v, 2),
            tire_psi: TirePsi {
                fl: tire(Wheel::FrontLeft),
                fr: tire(Wheel::FrontRight),
                rl: tire(Wheel::RearLeft),
                rr: tire(Wheel::RearRight),
            },
            fuel_percent: round_to(state.fuel_percent, 2),
            speed_zone_kph: SPEED_ZONE_KPH,
            speeding: state.speed_kph > f64::from(SPEED_ZONE_KPH),
            harsh_brake: false,
            obd_codes: Vec::new(),
        }
    }
}

/// RFC 3339 with microseconds and a `Z` suffix.
#[must_use]
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}
