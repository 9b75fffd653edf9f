use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    anomaly::AnomalyProbabilities, error::ConfigError, registry::FleetRoster,
    replay::DEFAULT_REPLAY_CAPACITY, sink::SinkConfig,
};

/// Startup configuration of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Caps the number of simulated entities.
    pub vehicle_count: Option<usize>,
    /// Seconds between ticks of one entity.
    pub tick_seconds: f64,
    /// Sleep jitter as a fraction of the tick.
    pub jitter_fraction: f64,
    /// Latitude of the first entity.
    pub start_lat: f64,
    /// Longitude of the first entity.
    pub start_lon: f64,
    /// Latitude offset between consecutive entities.
    pub lat_spacing: f64,
    /// Longitude offset between consecutive entities.
    pub lon_spacing: f64,
    /// Payloads retained per entity.
    pub replay_capacity: usize,
    /// Each worker stops itself after this many ticks.
    pub max_ticks: Option<u64>,
    /// Base seed for reproducible runs.
    pub seed: Option<u64>,
    /// Time allowed for workers to exit after `stop`.
    pub stop_timeout_ms: u64,
    /// Upper bound a sink may spend on one publish.
    pub publish_timeout_ms: u64,
    /// Per-tick anomaly probabilities.
    pub anomalies: AnomalyProbabilities,
    /// Output sink.
    pub sink: SinkConfig,
    /// Vehicle and driver statuses.
    pub roster: FleetRoster,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            vehicle_count: None,
            tick_seconds: 1.0,
            jitter_fraction: 0.2,
            start_lat: 6.45,
            start_lon: 3.39,
            lat_spacing: 0.0012,
            lon_spacing: 0.0015,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            max_ticks: None,
            seed: None,
            stop_timeout_ms: 1_000,
            publish_timeout_ms: 2_000,
            anomalies: AnomalyProbabilities::default(),
            sink: SinkConfig::default(),
            roster: FleetRoster::default(),
        }
    }
}

impl SimulatorConfig {
    /// Loads and validates a TOML file; absent keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that must fail before any worker starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tick_seconds.is_finite() || self.tick_seconds <= 0.0 {
            return Err(ConfigError::InvalidTick(self.tick_seconds));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::InvalidJitter(self.jitter_fraction));
        }
        // the longest jittered sleep must still fit a Duration
        if Duration::try_from_secs_f64(self.tick_seconds * (1.0 + self.jitter_fraction)).is_err() {
            return Err(ConfigError::InvalidTick(self.tick_seconds));
        }
        if self.replay_capacity == 0 {
            return Err(ConfigError::ZeroReplayCapacity);
        }
        if self.vehicle_count == Some(0) {
            return Err(ConfigError::ZeroEntityCount);
        }
        if !(-90.0..=90.0).contains(&self.start_lat) || !(-180.0..=180.0).contains(&self.start_lon)
        {
            return Err(ConfigError::InvalidStartPosition {
                lat: self.start_lat,
                lon: self.start_lon,
            });
        }
        self.anomalies.validate()?;
        self.sink.validate()
    }

    /// Stop timeout.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Publish timeout handed to sinks.
    #[must_use]
    pub const fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Starting position of entity `index`.
    #[must_use]
    pub fn start_position(&self, index: usize) -> (f64, f64) {
        #[allow(clippy::cast_precision_loss)]
        let offset = index as f64;
        (
            self.start_lat + offset * self.lat_spacing,
            self.start_lon + offset * self.lon_spacing,
        )
    }
}
