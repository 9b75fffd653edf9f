//! Probabilistic anomaly injection.
//!
//! Every tick runs one independent Bernoulli trial per anomaly class. A fired
//! trial draws its magnitude into an [`Anomaly`] and applies it to the
//! vehicle; overheat spikes and tyre leaks also leave a persistence marker.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    vehicle::{
        Vehicle, Wheel, ENGINE_TEMP_MAX_C, ENGINE_TEMP_MIN_C, FUEL_MAX_PERCENT, FUEL_MIN_PERCENT,
        SPEED_MAX_KPH, SPEED_MIN_KPH, TIRE_PSI_LEAK_MIN, TIRE_PSI_MAX,
    },
};

/// Per-tick trigger probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyProbabilities {
    /// Engine overheat spike.
    pub overheat_spike: f64,
    /// Sudden fuel loss.
    pub fuel_siphon: f64,
    /// Tyre leak on a random wheel.
    pub tyre_leak: f64,
    /// Harsh braking.
    pub harsh_brake: f64,
}

impl Default for AnomalyProbabilities {
    fn default() -> Self {
        Self {
            overheat_spike: 0.001,
            fuel_siphon: 0.0008,
            tyre_leak: 0.0005,
            harsh_brake: 0.002,
        }
    }
}

impl AnomalyProbabilities {
    /// Every trial fires on every tick.
    #[must_use]
    pub const fn always() -> Self {
        Self {
            overheat_spike: 1.0,
            fuel_siphon: 1.0,
            tyre_leak: 1.0,
            harsh_brake: 1.0,
        }
    }

    /// No trial ever fires.
    #[must_use]
    pub const fn never() -> Self {
        Self {
            overheat_spike: 0.0,
            fuel_siphon: 0.0,
            tyre_leak: 0.0,
            harsh_brake: 0.0,
        }
    }

    /// Rejects probabilities outside [0, 1].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("overheat_spike", self.overheat_spike),
            ("fuel_siphon", self.fuel_siphon),
            ("tyre_leak", self.tyre_leak),
            ("harsh_brake", self.harsh_brake),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidProbability { name, value });
            }
        }
        Ok(())
    }
}

/// Anomaly class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Engine temperature spike.
    OverheatSpike,
    /// Sudden fuel loss.
    FuelSiphon,
    /// Pressure loss on one wheel.
    TyreLeak,
    /// Instant speed reduction.
    HarshBrake,
}

impl AnomalyKind {
    /// Label for logging.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::OverheatSpike => "overheat_spike",
            Self::FuelSiphon => "fuel_siphon",
            Self::TyreLeak => "tyre_leak",
            Self::HarshBrake => "harsh_brake",
        }
    }
}

/// A concrete anomaly with its drawn magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anomaly {
    /// Adds `delta_c` to engine temperature; marker held for `hold`.
    OverheatSpike {
        /// Temperature increase (°C).
        delta_c: f64,
        /// Persistence duration.
        hold: Duration,
    },
    /// Removes `drop_percent` of fuel.
    FuelSiphon {
        /// Fuel loss (percentage points).
        drop_percent: f64,
    },
    /// Removes `drop_psi` from `wheel`; marker held for `hold`.
    TyreLeak {
        /// Affected wheel.
        wheel: Wheel,
        /// Pressure loss (psi).
        drop_psi: f64,
        /// Persistence duration.
        hold: Duration,
    },
    /// Scales speed by `1 - fraction`.
    HarshBrake {
        /// Fraction of speed lost.
        fraction: f64,
    },
}

impl Anomaly {
    /// Class of this anomaly.
    #[must_use]
    pub const fn kind(&self) -> AnomalyKind {
        match self {
            Self::OverheatSpike { .. } => AnomalyKind::OverheatSpike,
            Self::FuelSiphon { .. } => AnomalyKind::FuelSiphon,
            Self::TyreLeak { .. } => AnomalyKind::TyreLeak,
            Self::HarshBrake { .. } => AnomalyKind::HarshBrake,
        }
    }

    /// Draws a magnitude for `kind` from the documented ranges.
    pub fn draw<R: Rng + ?Sized>(kind: AnomalyKind, rng: &mut R) -> Self {
        match kind {
            AnomalyKind::OverheatSpike => Self::OverheatSpike {
                delta_c: rng.gen_range(12.0..=28.0),
                hold: millis(rng.gen_range(10_000..=60_000)),
            },
            AnomalyKind::FuelSiphon => Self::FuelSiphon {
                drop_percent: rng.gen_range(6.0..=22.0),
            },
            AnomalyKind::TyreLeak => Self::TyreLeak {
                wheel: Wheel::ALL[rng.gen_range(0..Wheel::ALL.len())],
                drop_psi: rng.gen_range(3.0..=8.0),
                hold: millis(rng.gen_range(60_000..=3_600_000)),
            },
            AnomalyKind::HarshBrake => Self::HarshBrake {
                fraction: rng.gen_range(0.2..=0.7),
            },
        }
    }

    /// Mutates `vehicle`, clamping the touched field and recording markers at `now`.
    pub fn apply(&self, vehicle: &mut Vehicle, now: DateTime<Utc>) {
        let (state, markers) = vehicle.parts_mut();
        match *self {
            Self::OverheatSpike { delta_c, hold } => {
                state.engine_temp_c =
                    (state.engine_temp_c + delta_c).clamp(ENGINE_TEMP_MIN_C, ENGINE_TEMP_MAX_C);
                markers.mark_overheat(now + hold);
            }
            Self::FuelSiphon { drop_percent } => {
                state.fuel_percent =
                    (state.fuel_percent - drop_percent).clamp(FUEL_MIN_PERCENT, FUEL_MAX_PERCENT);
            }
            Self::TyreLeak {
                wheel,
                drop_psi,
                hold,
            } => {
                let psi = (state.tire_psi.get(wheel) - drop_psi).clamp(TIRE_PSI_LEAK_MIN, TIRE_PSI_MAX);
                state.tire_psi.set(wheel, psi);
                markers.mark_tyre_leak(wheel, now + hold);
            }
            Self::HarshBrake { fraction } => {
                state.speed_kph =
                    (state.speed_kph * (1.0 - fraction)).clamp(SPEED_MIN_KPH, SPEED_MAX_KPH);
            }
        }
        debug_assert!(
            vehicle.state().within_bounds(),
            "anomaly {:?} pushed {} out of bounds",
            self.kind(),
            vehicle.identity().vehicle_id
        );
    }
}

fn millis(ms: i64) -> Duration {
    Duration::milliseconds(ms)
}

/// Runs the per-tick trials against a vehicle.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnomalyInjector {
    probabilities: AnomalyProbabilities,
}

impl AnomalyInjector {
    /// Creates an injector.
    #[must_use]
    pub const fn new(probabilities: AnomalyProbabilities) -> Self {
        Self { probabilities }
    }

    /// One independent trial per class; returns the anomalies that fired.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        vehicle: &mut Vehicle,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<Anomaly> {
        let trials = [
            (AnomalyKind::OverheatSpike, self.probabilities.overheat_spike),
            (AnomalyKind::FuelSiphon, self.probabilities.fuel_siphon),
            (AnomalyKind::TyreLeak, self.probabilities.tyre_leak),
            (AnomalyKind::HarshBrake, self.probabilities.harsh_brake),
        ];
        let mut fired = Vec::new();
        for (kind, probability) in trials {
            if rng.gen::<f64>() < probability {
                let anomaly = Anomaly::draw(kind, rng);
                anomaly.apply(vehicle, now);
                fired.push(anomaly);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        helper::seeded_rng,
        registry::EntityIdentity,
        vehicle::{TirePressures, VehicleState},
    };

    fn vehicle() -> Vehicle {
        Vehicle::from_state(
            EntityIdentity {
                vehicle_id: "CAR_01".into(),
                driver_id: "DR_002".into(),
            },
            VehicleState {
                lat: 6.45,
                lon: 3.39,
                heading_deg: 90.0,
                speed_kph: 60.0,
                engine_temp_c: 90.0,
                battery_v: 12.5,
                tire_psi: TirePressures::uniform(32.0),
                fuel_percent: 15.0,
            },
        )
    }

    #[test]
    fn tyre_leak_drops_pressure_and_clamps_at_ten() {
        let now = Utc::now();
        let mut vehicle = vehicle();
        let leak = Anomaly::TyreLeak {
            wheel: Wheel::FrontRight,
            drop_psi: 5.0,
            hold: Duration::seconds(600),
        };
        leak.apply(&mut vehicle, now);
        assert!((vehicle.state().tire_psi.get(Wheel::FrontRight) - 27.0).abs() < 1e-9);
        assert_eq!(
            vehicle.markers().tyre_leak_until(Wheel::FrontRight),
            Some(now + Duration::seconds(600))
        );
        for _ in 0..10 {
            leak.apply(&mut vehicle, now);
        }
        assert!((vehicle.state().tire_psi.get(Wheel::FrontRight) - 10.0).abs() < f64::EPSILON);
        assert!((vehicle.state().tire_psi.get(Wheel::RearLeft) - 32.0).abs() < f64::EPSILON);
    }

    #[test]
    fn overheat_adds_before_clamping_and_marks() {
        let now = Utc::now();
        let mut vehicle = vehicle();
        Anomaly::OverheatSpike {
            delta_c: 28.0,
            hold: Duration::seconds(30),
        }
        .apply(&mut vehicle, now);
        assert!((vehicle.state().engine_temp_c - 118.0).abs() < 1e-9);
        assert!(vehicle.markers().overheating(now));
        assert!(!vehicle.markers().overheating(now + Duration::seconds(31)));

        Anomaly::OverheatSpike {
            delta_c: 28.0,
            hold: Duration::seconds(30),
        }
        .apply(&mut vehicle, now);
        assert!((vehicle.state().engine_temp_c - ENGINE_TEMP_MAX_C).abs() < f64::EPSILON);
    }

    #[test]
    fn fuel_siphon_floors_at_zero() {
        let mut vehicle = vehicle();
        Anomaly::FuelSiphon { drop_percent: 22.0 }.apply(&mut vehicle, Utc::now());
        assert!(vehicle.state().fuel_percent.abs() < f64::EPSILON);
    }

    #[test]
    fn harsh_brake_scales_speed() {
        let mut vehicle = vehicle();
        Anomaly::HarshBrake { fraction: 0.5 }.apply(&mut vehicle, Utc::now());
        assert!((vehicle.state().speed_kph - 30.0).abs() < 1e-9);
    }

    #[test]
    fn drawn_magnitudes_respect_ranges() {
        let mut rng = seeded_rng(17);
        for _ in 0..500 {
            match Anomaly::draw(AnomalyKind::OverheatSpike, &mut rng) {
                Anomaly::OverheatSpike { delta_c, hold } => {
                    assert!((12.0..=28.0).contains(&delta_c));
                    assert!(hold >= Duration::seconds(10) && hold <= Duration::seconds(60));
                }
                other => panic!("unexpected {other:?}"),
            }
            match Anomaly::draw(AnomalyKind::TyreLeak, &mut rng) {
                Anomaly::TyreLeak { drop_psi, hold, .. } => {
                    assert!((3.0..=8.0).contains(&drop_psi));
                    assert!(hold >= Duration::seconds(60) && hold <= Duration::seconds(3600));
                }
                other => panic!("unexpected {other:?}"),
            }
            match Anomaly::draw(AnomalyKind::HarshBrake, &mut rng) {
                Anomaly::HarshBrake { fraction } => assert!((0.2..=0.7).contains(&fraction)),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn injector_respects_probability_extremes() {
        let mut rng = seeded_rng(4);
        let now = Utc::now();
        let mut vehicle = vehicle();
        let quiet = AnomalyInjector::new(AnomalyProbabilities::never());
        assert!(quiet.apply(&mut vehicle, now, &mut rng).is_empty());

        let loud = AnomalyInjector::new(AnomalyProbabilities::always());
        let fired: Vec<_> = loud
            .apply(&mut vehicle, now, &mut rng)
            .iter()
            .map(Anomaly::kind)
            .collect();
        assert_eq!(
            fired,
            vec![
                AnomalyKind::OverheatSpike,
                AnomalyKind::FuelSiphon,
                AnomalyKind::TyreLeak,
                AnomalyKind::HarshBrake
            ]
        );
        assert!(vehicle.markers().overheating(now));
        assert_eq!(vehicle.markers().leaking_wheels(now).len(), 1);
    }

    #[test]
    fn rejects_invalid_probabilities() {
        let probabilities = AnomalyProbabilities {
            tyre_leak: 1.5,
            ..AnomalyProbabilities::default()
        };
        assert!(matches!(
            probabilities.validate(),
            Err(ConfigError::InvalidProbability { name: "tyre_leak", .. })
        ));
        assert!(AnomalyProbabilities::default().validate().is_ok());
    }
}
