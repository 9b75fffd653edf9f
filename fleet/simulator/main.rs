use std::{future::Future, sync::Arc};

use fleet_logging::LogLevel;
use serde_json::json;

use crate::{
    config::SimulatorConfig,
    error::SimulatorError,
    helper::SimulationTelemetry,
    registry::EntityIdentity,
    simulator::{RunReport, Simulator, StopHandle},
    sink::{connect_sink, TelemetrySink},
};

/// Configured simulator plus the sink it publishes to.
#[derive(Debug)]
pub struct FleetSimulation {
    simulator: Simulator,
    telemetry: Option<SimulationTelemetry>,
}

impl FleetSimulation {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> FleetSimulationBuilder {
        FleetSimulationBuilder::default()
    }

    /// Entities that will be simulated.
    #[must_use]
    pub fn entities(&self) -> &[EntityIdentity] {
        self.simulator.entities()
    }

    /// Handle to stop a running simulation.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.simulator.stop_handle()
    }

    /// Starts all workers and runs until they finish or `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F) -> Result<RunReport, SimulatorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.simulator.stop_handle();
        self.simulator.start().await?;
        let watcher = tokio::spawn(async move {
            shutdown.await;
            handle.stop();
        });
        let outcome = self.simulator.wait().await;
        watcher.abort();

        if let Some(telemetry) = &self.telemetry {
            let _ = match &outcome {
                Ok(report) => telemetry.log(
                    LogLevel::Info,
                    "fleet.run.completed",
                    json!({ "ticks": report.ticks(), "published": report.published() }),
                ),
                Err(err) => telemetry.log(
                    LogLevel::Error,
                    "fleet.run.failed",
                    json!({ "error": err.to_string() }),
                ),
            };
        }
        outcome
    }
}

/// Builder for [`FleetSimulation`].
#[derive(Default)]
pub struct FleetSimulationBuilder {
    config: SimulatorConfig,
    telemetry: Option<SimulationTelemetry>,
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl FleetSimulationBuilder {
    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: SimulatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets telemetry.
    #[must_use]
    pub fn telemetry(mut self, telemetry: SimulationTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Uses `sink` instead of connecting the configured one.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validates the configuration, connects the sink and builds the simulator.
    pub async fn build(self) -> Result<FleetSimulation, SimulatorError> {
        self.config.validate()?;
        let sink = match self.sink {
            Some(sink) => sink,
            None => connect_sink(&self.config.sink, self.config.publish_timeout()).await?,
        };
        let simulator = Simulator::new(self.config, sink, self.telemetry.clone())?;
        Ok(FleetSimulation {
            simulator,
            telemetry: self.telemetry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{anomaly::AnomalyProbabilities, sink::ChannelSink, sink::SinkConfig};
    use fleet_event_bus::{EventRecord, MemoryBus};
    use std::time::Duration;
    use tempfile::tempdir;

    fn telemetry(dir: &std::path::Path, bus: MemoryBus<EventRecord>) -> SimulationTelemetry {
        SimulationTelemetry::builder("fleet-simulator")
            .log_path(dir.join("fleet.log"))
            .event_publisher(Arc::new(bus))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn bounded_run_logs_and_emits_events() {
        let dir = tempdir().unwrap();
        let bus = MemoryBus::new(16);
        let sink = Arc::new(ChannelSink::new("fleet/telemetry", 64));
        let config = SimulatorConfig {
            tick_seconds: 0.01,
            max_ticks: Some(2),
            seed: Some(3),
            anomalies: AnomalyProbabilities::never(),
            ..SimulatorConfig::default()
        };
        let simulation = FleetSimulation::builder()
            .config(config)
            .telemetry(telemetry(dir.path(), bus.clone()))
            .sink(sink.clone())
            .build()
            .await
            .unwrap();
        assert_eq!(simulation.entities().len(), 6);

        let report = simulation.run(std::future::pending()).await.unwrap();
        assert_eq!(report.published(), 12);
        assert_eq!(sink.snapshot().len(), 12);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let events: Vec<_> = bus.snapshot().into_iter().map(|e| e.event_type).collect();
        assert!(events.contains(&"simulation.started".to_string()));
        let log = std::fs::read_to_string(dir.path().join("fleet.log")).unwrap();
        assert!(log.contains("fleet.run.completed"));
    }

    #[tokio::test]
    async fn shutdown_future_stops_unbounded_run() {
        let config = SimulatorConfig {
            tick_seconds: 0.01,
            sink: SinkConfig::Null,
            ..SimulatorConfig::default()
        };
        let simulation = FleetSimulation::builder().config(config).build().await.unwrap();
        let report = simulation
            .run(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(report.entities.len(), 6);
        assert!(report.ticks() >= 6);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_by_build() {
        let config = SimulatorConfig {
            replay_capacity: 0,
            ..SimulatorConfig::default()
        };
        let err = FleetSimulation::builder().config(config).build().await.unwrap_err();
        assert!(matches!(err, SimulatorError::Config(_)));
    }
}
