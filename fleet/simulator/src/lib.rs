#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Fleet telemetry simulator – concurrent per-vehicle physical models, anomaly
//! injection, replay history and pluggable publish sinks.

/// Error taxonomy.
#[path = "../error.rs"]
pub mod error;

/// Telemetry and RNG helpers.
#[path = "../helper.rs"]
pub mod helper;

/// Vehicle/driver statuses and pairing.
#[path = "../registry.rs"]
pub mod registry;

/// Per-entity physical state model.
#[path = "../vehicle.rs"]
pub mod vehicle;

/// Probabilistic anomaly injection.
#[path = "../anomaly.rs"]
pub mod anomaly;

/// Emitted payload schema.
#[path = "../payload.rs"]
pub mod payload;

/// Bounded payload history.
#[path = "../replay.rs"]
pub mod replay;

/// Publish sinks.
#[path = "../sink.rs"]
pub mod sink;

/// Startup configuration.
#[path = "../config.rs"]
pub mod config;

/// Scheduling engine.
#[path = "../simulator.rs"]
pub mod simulator;

/// Day-partitioned batch generators.
#[path = "../batch/main.rs"]
pub mod batch;

/// Runtime entry point.
#[path = "../main.rs"]
pub mod runtime;

pub use anomaly::{Anomaly, AnomalyInjector, AnomalyKind, AnomalyProbabilities};
pub use config::SimulatorConfig;
pub use error::{ConfigError, SimulatorError, SinkError};
pub use helper::{SimulationTelemetry, SimulationTelemetryBuilder};
pub use payload::TelemetryPayload;
pub use registry::{pair, EntityIdentity, EntityRegistry, EntityStatus, FleetRoster};
pub use replay::ReplayBuffer;
pub use runtime::{FleetSimulation, FleetSimulationBuilder};
pub use simulator::{EntitySnapshot, RunReport, Simulator, StopHandle, WorkerState, WorkerStats};
pub use sink::{connect_sink, ChannelSink, NullSink, SinkConfig, StreamSink, TelemetrySink};
pub use vehicle::{Vehicle, VehicleState, Wheel};
