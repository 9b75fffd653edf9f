use std::time::Duration;

use thiserror::Error;

/// Configuration rejected before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Tick interval must be finite, strictly positive and fit a sleep duration.
    #[error("invalid tick interval {0}s: must be finite, > 0 and representable as a duration")]
    InvalidTick(f64),
    /// Jitter fraction must lie in [0, 1).
    #[error("invalid jitter fraction {0}: must be within [0, 1)")]
    InvalidJitter(f64),
    /// Replay buffers need room for at least one payload.
    #[error("replay capacity must be at least 1")]
    ZeroReplayCapacity,
    /// An explicit entity count of zero simulates nothing.
    #[error("entity count override must be at least 1")]
    ZeroEntityCount,
    /// Anomaly probability outside [0, 1].
    #[error("anomaly probability `{name}` = {value} is outside [0, 1]")]
    InvalidProbability {
        /// Anomaly class.
        name: &'static str,
        /// Rejected value.
        value: f64,
    },
    /// Starting coordinate outside the valid range.
    #[error("starting position ({lat}, {lon}) is outside lat [-90, 90] / lon [-180, 180]")]
    InvalidStartPosition {
        /// Latitude.
        lat: f64,
        /// Longitude.
        lon: f64,
    },
    /// Channel sink settings that cannot be honoured.
    #[error("channel sink: {0}")]
    Channel(String),
    /// Configuration file could not be read.
    #[error("reading config {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Configuration file could not be parsed.
    #[error("parsing config {path}: {source}")]
    Parse {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
}

/// Failures raised by publish sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Payload could not be encoded.
    #[error("serializing payload: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The sink did not accept the payload in time.
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
    /// Broker or transport failure.
    #[error("transport: {0}")]
    Transport(String),
}

/// Errors surfaced by the scheduling engine.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Pairing produced no entities.
    #[error("no active entities to simulate ({vehicles} active vehicles, {drivers} active drivers)")]
    NoActiveEntities {
        /// Active vehicle count.
        vehicles: usize,
        /// Active driver count.
        drivers: usize,
    },
    /// `start` was called twice.
    #[error("simulator already started")]
    AlreadyStarted,
    /// `stop`/`wait` without a running simulation.
    #[error("simulator not started")]
    NotStarted,
    /// Some workers did not exit within the stop timeout and were aborted.
    #[error("{pending} worker(s) did not stop within {timeout:?}")]
    StopTimeout {
        /// Workers still running at the deadline.
        pending: usize,
        /// Configured stop timeout.
        timeout: Duration,
    },
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Sink setup or teardown failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
}
