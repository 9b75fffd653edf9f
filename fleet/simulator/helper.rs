use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use fleet_event_bus::{EventRecord, Publisher};
use fleet_logging::{JsonLogger, LogLevel, LogRecord};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde_json::Value;
use tokio::runtime::Runtime;
use uuid::Uuid;

/// Telemetry builder for the simulator.
pub struct SimulationTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    logger: Option<JsonLogger>,
    event_publisher: Option<Arc<dyn Publisher<EventRecord>>>,
}

impl SimulationTelemetryBuilder {
    /// Creates a new builder scoped to a module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            logger: None,
            event_publisher: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Uses an already configured logger (takes precedence over `log_path`).
    #[must_use]
    pub fn logger(mut self, logger: JsonLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Sets the lifecycle event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn Publisher<EventRecord>>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds telemetry.
    pub fn build(self) -> Result<SimulationTelemetry> {
        let logger = match (self.logger, self.log_path) {
            (Some(logger), _) => Some(logger),
            (None, Some(path)) => Some(JsonLogger::new(path)?),
            (None, None) => None,
        };
        Ok(SimulationTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared across workers.
#[derive(Clone)]
pub struct SimulationTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for SimulationTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn Publisher<EventRecord>>>,
}

impl SimulationTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> SimulationTelemetryBuilder {
        SimulationTelemetryBuilder::new(module)
    }

    /// Logs metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            if !logger.enabled(level) {
                return Ok(());
            }
            let mut record = LogRecord::new(&self.inner.module, level, message);
            if let Value::Object(map) = metadata {
                record.metadata = map;
            }
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits a lifecycle event.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        let Some(publisher) = &self.inner.publisher else {
            return Ok(());
        };
        let record = EventRecord {
            id: format!("evt-{}", Uuid::new_v4()),
            source: self.inner.module.clone(),
            event_type: event_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload,
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            let publisher = Arc::clone(publisher);
            tokio::spawn(async move {
                let _ = publisher.publish(&record).await;
            });
            Ok(())
        } else {
            Runtime::new()?.block_on(publisher.publish(&record))
        }
    }
}

/// Generates a random seed for simulation runs.
#[must_use]
pub fn random_seed() -> u64 {
    rand::thread_rng().gen()
}

/// Returns a reproducible RNG.
#[must_use]
pub fn seeded_rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

/// RNG for worker `index`: derived from `seed` when given, fresh otherwise.
#[must_use]
pub fn worker_rng(seed: Option<u64>, index: usize) -> SmallRng {
    match seed {
        Some(seed) => seeded_rng(seed.wrapping_add(index as u64)),
        None => seeded_rng(random_seed()),
    }
}

/// Rounds half away from zero to `decimals` places.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Short prefixed identifier, e.g. `evt_8af21bd41f`.
#[must_use]
pub fn short_id(prefix: &str, hex_len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..hex_len.min(hex.len())])
}
