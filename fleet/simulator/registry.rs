//! Entity registry: which vehicles and drivers take part in a run.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Operational status of a vehicle or driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityStatus {
    /// Participates in simulation.
    Active,
    /// Retired from service.
    Retired,
    /// Off the road for maintenance.
    Maintenance,
    /// Any other inactive status label.
    Inactive(String),
}

impl EntityStatus {
    /// True only for `ACTIVE`.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl From<String> for EntityStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Self::Active,
            "RETIRED" => Self::Retired,
            "MAINTENANCE" => Self::Maintenance,
            _ => Self::Inactive(raw),
        }
    }
}

impl From<EntityStatus> for String {
    fn from(status: EntityStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("ACTIVE"),
            Self::Retired => f.write_str("RETIRED"),
            Self::Maintenance => f.write_str("MAINTENANCE"),
            Self::Inactive(label) => f.write_str(label),
        }
    }
}

/// Immutable `(vehicle_id, driver_id)` assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityIdentity {
    /// Vehicle identifier.
    pub vehicle_id: String,
    /// Driver identifier.
    pub driver_id: String,
}

/// Static identifier→status maps for the fleet, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetRoster {
    /// Vehicle statuses.
    #[serde(default)]
    pub vehicles: IndexMap<String, EntityStatus>,
    /// Driver statuses.
    #[serde(default)]
    pub drivers: IndexMap<String, EntityStatus>,
}

impl Default for FleetRoster {
    fn default() -> Self {
        let drivers = [
            ("DR_001", EntityStatus::Active),
            ("DR_002", EntityStatus::Active),
            ("DR_003", EntityStatus::Active),
            ("DR_004", EntityStatus::Active),
            ("DR_005", EntityStatus::Active),
            ("DR_006", EntityStatus::Active),
            ("DR_007", EntityStatus::Retired),
            ("DR_008", EntityStatus::Retired),
            ("DR_009", EntityStatus::Retired),
            ("DR_010", EntityStatus::Retired),
        ];
        let vehicles = [
            ("BUS_01", EntityStatus::Active),
            ("BUS_02", EntityStatus::Active),
            ("BUS_06", EntityStatus::Active),
            ("CAR_01", EntityStatus::Active),
            ("CAR_02", EntityStatus::Active),
            ("CAR_03", EntityStatus::Active),
            ("BUS_03", EntityStatus::Maintenance),
            ("BUS_04", EntityStatus::Maintenance),
            ("BUS_05", EntityStatus::Maintenance),
            ("CAR_04", EntityStatus::Maintenance),
            ("CAR_05", EntityStatus::Maintenance),
        ];
        Self {
            vehicles: vehicles
                .into_iter()
                .map(|(id, status)| (id.to_string(), status))
                .collect(),
            drivers: drivers
                .into_iter()
                .map(|(id, status)| (id.to_string(), status))
                .collect(),
        }
    }
}

/// Read-only view over a [`FleetRoster`].
#[derive(Debug, Clone, Copy)]
pub struct EntityRegistry<'a> {
    roster: &'a FleetRoster,
}

impl<'a> EntityRegistry<'a> {
    /// Wraps a roster.
    #[must_use]
    pub const fn new(roster: &'a FleetRoster) -> Self {
        Self { roster }
    }

    /// Active vehicle ids in roster order.
    #[must_use]
    pub fn active_vehicles(&self) -> Vec<&'a str> {
        active(&self.roster.vehicles)
    }

    /// Active driver ids in roster order.
    #[must_use]
    pub fn active_drivers(&self) -> Vec<&'a str> {
        active(&self.roster.drivers)
    }

    /// Vehicles that are retired, under maintenance, or otherwise inactive.
    #[must_use]
    pub fn inactive_vehicles(&self) -> Vec<(&'a str, &'a EntityStatus)> {
        inactive(&self.roster.vehicles)
    }

    /// Drivers that are not active.
    #[must_use]
    pub fn inactive_drivers(&self) -> Vec<(&'a str, &'a EntityStatus)> {
        inactive(&self.roster.drivers)
    }

    /// Round-robin pairing of the active lists.
    #[must_use]
    pub fn assignments(&self) -> Vec<EntityIdentity> {
        pair(&self.active_vehicles(), &self.active_drivers())
    }
}

fn active(map: &IndexMap<String, EntityStatus>) -> Vec<&str> {
    map.iter()
        .filter(|(_, status)| status.is_active())
        .map(|(id, _)| id.as_str())
        .collect()
}

fn inactive(map: &IndexMap<String, EntityStatus>) -> Vec<(&str, &EntityStatus)> {
    map.iter()
        .filter(|(_, status)| !status.is_active())
        .map(|(id, status)| (id.as_str(), status))
        .collect()
}

/// Pairs vehicle `i` with driver `i mod drivers.len()`.
///
/// Pure and deterministic. Either list being empty yields no pairs.
#[must_use]
pub fn pair<V: AsRef<str>, D: AsRef<str>>(vehicles: &[V], drivers: &[D]) -> Vec<EntityIdentity> {
    if drivers.is_empty() {
        return Vec::new();
    }
    vehicles
        .iter()
        .enumerate()
        .map(|(idx, vehicle)| EntityIdentity {
            vehicle_id: vehicle.as_ref().to_string(),
            driver_id: drivers[idx % drivers.len()].as_ref().to_string(),
        })
        .collect()
}
