//! Physical state model for a single vehicle.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::registry::EntityIdentity;

/// Minimum speed (kph).
pub const SPEED_MIN_KPH: f64 = 0.0;
/// Maximum speed (kph).
pub const SPEED_MAX_KPH: f64 = 120.0;
/// Engine temperature floor (°C).
pub const ENGINE_TEMP_MIN_C: f64 = 60.0;
/// Engine temperature ceiling (°C).
pub const ENGINE_TEMP_MAX_C: f64 = 140.0;
/// Battery voltage floor.
pub const BATTERY_MIN_V: f64 = 11.0;
/// Battery voltage ceiling.
pub const BATTERY_MAX_V: f64 = 13.0;
/// Tyre pressure floor while no leak is open on the wheel (psi).
pub const TIRE_PSI_NOMINAL_MIN: f64 = 18.0;
/// Tyre pressure floor for a leaking wheel (psi).
pub const TIRE_PSI_LEAK_MIN: f64 = 10.0;
/// Tyre pressure ceiling (psi).
pub const TIRE_PSI_MAX: f64 = 40.0;
/// Fuel floor (%).
pub const FUEL_MIN_PERCENT: f64 = 0.0;
/// Fuel ceiling (%).
pub const FUEL_MAX_PERCENT: f64 = 100.0;

const KM_PER_DEGREE: f64 = 111.0;
const POLE_EPSILON: f64 = 1e-6;
const HEADING_WALK_DEG: f64 = 3.0;
const SPEED_DRIFT_KPH: f64 = 3.0;
const BATTERY_DRIFT_V: f64 = 0.01;
const TIRE_WALK_PSI: f64 = 0.02;
const FUEL_DRAIN_PER_KPH_SECOND: f64 = 1.0 / 10_000.0;
const WARM_SPEED_KPH: f64 = 5.0;

/// One of the four wheels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Wheel {
    /// Front left.
    #[serde(rename = "FL")]
    FrontLeft,
    /// Front right.
    #[serde(rename = "FR")]
    FrontRight,
    /// Rear left.
    #[serde(rename = "RL")]
    RearLeft,
    /// Rear right.
    #[serde(rename = "RR")]
    RearRight,
}

impl Wheel {
    /// All wheels in payload order.
    pub const ALL: [Self; 4] = [
        Self::FrontLeft,
        Self::FrontRight,
        Self::RearLeft,
        Self::RearRight,
    ];

    /// Short payload label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::FrontLeft => "FL",
            Self::FrontRight => "FR",
            Self::RearLeft => "RL",
            Self::RearRight => "RR",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::FrontLeft => 0,
            Self::FrontRight => 1,
            Self::RearLeft => 2,
            Self::RearRight => 3,
        }
    }
}

/// Per-wheel pressures (psi).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TirePressures([f64; 4]);

impl TirePressures {
    /// Same pressure on all wheels.
    #[must_use]
    pub const fn uniform(psi: f64) -> Self {
        Self([psi; 4])
    }

    /// Pressure of one wheel.
    #[must_use]
    pub const fn get(&self, wheel: Wheel) -> f64 {
        self.0[wheel.index()]
    }

    /// Sets one wheel.
    pub fn set(&mut self, wheel: Wheel, psi: f64) {
        self.0[wheel.index()] = psi;
    }

    /// `(wheel, psi)` pairs in payload order.
    pub fn iter(&self) -> impl Iterator<Item = (Wheel, f64)> + '_ {
        Wheel::ALL.iter().map(move |&wheel| (wheel, self.get(wheel)))
    }
}

/// Mutable telemetry of one vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Latitude (degrees).
    pub lat: f64,
    /// Longitude (degrees).
    pub lon: f64,
    /// Heading in [0, 360).
    pub heading_deg: f64,
    /// Speed (kph).
    pub speed_kph: f64,
    /// Engine temperature (°C).
    pub engine_temp_c: f64,
    /// Battery voltage.
    pub battery_v: f64,
    /// Tyre pressures.
    pub tire_psi: TirePressures,
    /// Fuel level (%).
    pub fuel_percent: f64,
}

impl VehicleState {
    /// True when every field is finite and inside its absolute clamp range.
    #[must_use]
    pub fn within_bounds(&self) -> bool {
        in_range(self.lat, -90.0, 90.0)
            && in_range(self.lon, -180.0, 180.0)
            && self.heading_deg >= 0.0
            && self.heading_deg < 360.0
            && in_range(self.speed_kph, SPEED_MIN_KPH, SPEED_MAX_KPH)
            && in_range(self.engine_temp_c, ENGINE_TEMP_MIN_C, ENGINE_TEMP_MAX_C)
            && in_range(self.battery_v, BATTERY_MIN_V, BATTERY_MAX_V)
            && in_range(self.fuel_percent, FUEL_MIN_PERCENT, FUEL_MAX_PERCENT)
            && self
                .tire_psi
                .iter()
                .all(|(_, psi)| in_range(psi, TIRE_PSI_LEAK_MIN, TIRE_PSI_MAX))
    }

    fn clamped(mut self) -> Self {
        self.lat = self.lat.clamp(-90.0, 90.0);
        self.lon = wrap_longitude(self.lon);
        self.heading_deg = wrap_degrees(self.heading_deg);
        self.speed_kph = self.speed_kph.clamp(SPEED_MIN_KPH, SPEED_MAX_KPH);
        self.engine_temp_c = self.engine_temp_c.clamp(ENGINE_TEMP_MIN_C, ENGINE_TEMP_MAX_C);
        self.battery_v = self.battery_v.clamp(BATTERY_MIN_V, BATTERY_MAX_V);
        self.fuel_percent = self.fuel_percent.clamp(FUEL_MIN_PERCENT, FUEL_MAX_PERCENT);
        for wheel in Wheel::ALL {
            let psi = self.tire_psi.get(wheel).clamp(TIRE_PSI_LEAK_MIN, TIRE_PSI_MAX);
            self.tire_psi.set(wheel, psi);
        }
        self
    }
}

/// "Effect active until" timestamps for anomalies that persist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyMarkers {
    overheat_until: Option<DateTime<Utc>>,
    tyre_leak_until: [Option<DateTime<Utc>>; 4],
}

impl AnomalyMarkers {
    /// Deadline of the most recent overheat spike.
    #[must_use]
    pub const fn overheat_until(&self) -> Option<DateTime<Utc>> {
        self.overheat_until
    }

    /// Deadline of the most recent leak on `wheel`.
    #[must_use]
    pub const fn tyre_leak_until(&self, wheel: Wheel) -> Option<DateTime<Utc>> {
        self.tyre_leak_until[wheel.index()]
    }

    /// True while an overheat marker is open at `now`.
    #[must_use]
    pub fn overheating(&self, now: DateTime<Utc>) -> bool {
        self.overheat_until.is_some_and(|until| until > now)
    }

    /// True while a leak marker on `wheel` is open at `now`.
    #[must_use]
    pub fn leaking(&self, wheel: Wheel, now: DateTime<Utc>) -> bool {
        self.tyre_leak_until[wheel.index()].is_some_and(|until| until > now)
    }

    /// Wheels with an open leak at `now`.
    #[must_use]
    pub fn leaking_wheels(&self, now: DateTime<Utc>) -> Vec<Wheel> {
        Wheel::ALL
            .into_iter()
            .filter(|&wheel| self.leaking(wheel, now))
            .collect()
    }

    /// Lowest pressure `wheel` may hold at `now`.
    #[must_use]
    pub fn tyre_floor(&self, wheel: Wheel, now: DateTime<Utc>) -> f64 {
        if self.leaking(wheel, now) {
            TIRE_PSI_LEAK_MIN
        } else {
            TIRE_PSI_NOMINAL_MIN
        }
    }

    // A shorter hold never cuts an open marker short.
    pub(crate) fn mark_overheat(&mut self, until: DateTime<Utc>) {
        self.overheat_until = self.overheat_until.max(Some(until));
    }

    pub(crate) fn mark_tyre_leak(&mut self, wheel: Wheel, until: DateTime<Utc>) {
        let slot = &mut self.tyre_leak_until[wheel.index()];
        *slot = (*slot).max(Some(until));
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        if !self.overheating(now) {
            self.overheat_until = None;
        }
        for wheel in Wheel::ALL {
            if !self.leaking(wheel, now) {
                self.tyre_leak_until[wheel.index()] = None;
            }
        }
    }
}

/// One simulated vehicle: identity, physical state and anomaly markers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    identity: EntityIdentity,
    state: VehicleState,
    markers: AnomalyMarkers,
}

impl Vehicle {
    /// Creates a vehicle at `(lat, lon)` with randomized initial readings.
    pub fn new<R: Rng + ?Sized>(identity: EntityIdentity, lat: f64, lon: f64, rng: &mut R) -> Self {
        let tire_psi = TirePressures([
            rng.gen_range(30.0..34.0),
            rng.gen_range(30.0..34.0),
            rng.gen_range(30.0..34.0),
            rng.gen_range(30.0..34.0),
        ]);
        let state = VehicleState {
            lat,
            lon,
            heading_deg: rng.gen_range(0.0..360.0),
            speed_kph: rng.gen_range(20.0..60.0),
            engine_temp_c: rng.gen_range(75.0..95.0),
            battery_v: rng.gen_range(12.0..12.8),
            tire_psi,
            fuel_percent: rng.gen_range(50.0..100.0),
        };
        Self::from_state(identity, state)
    }

    /// Creates a vehicle from explicit readings, clamped into range.
    #[must_use]
    pub fn from_state(identity: EntityIdentity, state: VehicleState) -> Self {
        Self {
            identity,
            state: state.clamped(),
            markers: AnomalyMarkers::default(),
        }
    }

    /// Identity pair.
    #[must_use]
    pub const fn identity(&self) -> &EntityIdentity {
        &self.identity
    }

    /// Current readings.
    #[must_use]
    pub const fn state(&self) -> &VehicleState {
        &self.state
    }

    /// Persistence markers.
    #[must_use]
    pub const fn markers(&self) -> &AnomalyMarkers {
        &self.markers
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut VehicleState, &mut AnomalyMarkers) {
        (&mut self.state, &mut self.markers)
    }

    /// Advances the state by one tick of `tick_seconds` ending at `now`.
    pub fn step<R: Rng + ?Sized>(&mut self, tick_seconds: f64, now: DateTime<Utc>, rng: &mut R) {
        self.markers.expire(now);
        let state = &mut self.state;

        state.heading_deg = wrap_degrees(
            state.heading_deg + rng.gen_range(-HEADING_WALK_DEG..=HEADING_WALK_DEG),
        );

        // flat-earth approximation
        let distance_km = state.speed_kph * tick_seconds / 3600.0;
        let heading = state.heading_deg.to_radians();
        let dlat = (distance_km / KM_PER_DEGREE) * heading.cos();
        let dlon = (distance_km / (KM_PER_DEGREE * state.lat.to_radians().cos() + POLE_EPSILON))
            * heading.sin();
        state.lat = (state.lat + dlat).clamp(-90.0, 90.0);
        state.lon = wrap_longitude(state.lon + dlon);

        state.speed_kph = (state.speed_kph
            + rng.gen_range(-SPEED_DRIFT_KPH..=SPEED_DRIFT_KPH))
        .clamp(SPEED_MIN_KPH, SPEED_MAX_KPH);

        let temp_delta = if state.speed_kph > WARM_SPEED_KPH {
            rng.gen_range(0.2..=0.7)
        } else {
            rng.gen_range(-0.5..=0.2)
        };
        state.engine_temp_c =
            (state.engine_temp_c + temp_delta).clamp(ENGINE_TEMP_MIN_C, ENGINE_TEMP_MAX_C);

        state.battery_v = (state.battery_v + rng.gen_range(-BATTERY_DRIFT_V..=BATTERY_DRIFT_V))
            .clamp(BATTERY_MIN_V, BATTERY_MAX_V);

        state.fuel_percent = (state.fuel_percent
            - state.speed_kph * tick_seconds * FUEL_DRAIN_PER_KPH_SECOND)
            .clamp(FUEL_MIN_PERCENT, FUEL_MAX_PERCENT);

        for wheel in Wheel::ALL {
            let floor = self.markers.tyre_floor(wheel, now);
            let psi = state.tire_psi.get(wheel) + rng.gen_range(-TIRE_WALK_PSI..=TIRE_WALK_PSI);
            state.tire_psi.set(wheel, psi.clamp(floor, TIRE_PSI_MAX));
        }

        debug_assert!(
            self.state.within_bounds(),
            "vehicle {} left its clamp bounds: {:?}",
            self.identity.vehicle_id,
            self.state
        );
    }
}

fn in_range(value: f64, lo: f64, hi: f64) -> bool {
    value.is_finite() && value >= lo && value <= hi
}

/// Wraps degrees into [0, 360).
#[must_use]
pub fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    if (-180.0..180.0).contains(&lon) {
        lon
    } else {
        wrap_degrees(lon + 180.0) - 180.0
    }
}
