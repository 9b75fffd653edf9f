//! Publish sinks: where payloads go.
//!
//! The implementation is chosen once at startup by [`connect_sink`]; workers
//! only see `Arc<dyn TelemetrySink>`.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use fleet_event_bus::{JsonLinesWriter, MemoryBus, Subscriber};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    error::{ConfigError, SimulatorError, SinkError},
    payload::TelemetryPayload,
};

/// Default channel topic.
pub const DEFAULT_TOPIC: &str = "fleet/telemetry";

const CHANNEL_BACKLOG: usize = 1024;

/// Capability interface shared by all workers; implementations must be safe
/// for concurrent callers and bound their own blocking.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Publishes one payload.
    async fn publish(&self, payload: &TelemetryPayload) -> Result<(), SinkError>;

    /// Flushes and releases resources after all workers exit.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Label for logs.
    fn label(&self) -> &'static str;
}

/// Sink selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Newline-delimited JSON to stdout, or to `path` when set.
    Stream {
        /// Output file (append mode).
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Message channel: in-process broadcast, or a broker at `address`.
    Channel {
        /// Broker bootstrap address.
        #[serde(default)]
        address: Option<String>,
        /// Topic name.
        #[serde(default = "default_topic")]
        topic: String,
    },
    /// Discard everything.
    Null,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::Stream { path: None }
    }
}

impl SinkConfig {
    /// Checks settings that can be rejected without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Channel { address, topic } => {
                if topic.trim().is_empty() {
                    return Err(ConfigError::Channel("topic must not be empty".into()));
                }
                if address.is_some() && !cfg!(feature = "kafka") {
                    return Err(ConfigError::Channel(
                        "broker address requires the `kafka` feature; recompile with --features kafka"
                            .into(),
                    ));
                }
                Ok(())
            }
            Self::Stream { .. } | Self::Null => Ok(()),
        }
    }
}

fn default_topic() -> String {
    DEFAULT_TOPIC.into()
}

/// Builds the configured sink. Failures here abort startup.
pub async fn connect_sink(
    config: &SinkConfig,
    publish_timeout: Duration,
) -> Result<Arc<dyn TelemetrySink>, SimulatorError> {
    config.validate()?;
    let sink: Arc<dyn TelemetrySink> = match config {
        SinkConfig::Stream { path: None } => Arc::new(StreamSink::stdout(publish_timeout)),
        SinkConfig::Stream { path: Some(path) } => {
            Arc::new(StreamSink::append(path, publish_timeout).await?)
        }
        SinkConfig::Channel {
            address: None,
            topic,
        } => Arc::new(ChannelSink::new(topic.clone(), CHANNEL_BACKLOG)),
        #[cfg(feature = "kafka")]
        SinkConfig::Channel {
            address: Some(address),
            topic,
        } => Arc::new(kafka::KafkaSink::connect(address, topic, publish_timeout).await?),
        #[cfg(not(feature = "kafka"))]
        SinkConfig::Channel {
            address: Some(address),
            ..
        } => {
            return Err(ConfigError::Channel(format!(
                "cannot reach broker {address} without the `kafka` feature"
            ))
            .into())
        }
        SinkConfig::Null => Arc::new(NullSink),
    };
    Ok(sink)
}

/// Newline-delimited JSON over stdout or a file.
#[derive(Debug)]
pub struct StreamSink {
    writer: JsonLinesWriter,
    timeout: Duration,
}

impl StreamSink {
    /// Writes to stdout.
    #[must_use]
    pub fn stdout(timeout: Duration) -> Self {
        Self {
            writer: JsonLinesWriter::stdout(),
            timeout,
        }
    }

    /// Appends to `path`, creating it and its parent directories.
    pub async fn append(path: &std::path::Path, timeout: Duration) -> Result<Self, SinkError> {
        let writer = JsonLinesWriter::append(path)
            .await
            .map_err(|err| SinkError::Transport(format!("opening {}: {err:#}", path.display())))?;
        Ok(Self { writer, timeout })
    }
}

#[async_trait]
impl TelemetrySink for StreamSink {
    async fn publish(&self, payload: &TelemetryPayload) -> Result<(), SinkError> {
        let line = serde_json::to_vec(payload)?;
        tokio::time::timeout(self.timeout, self.writer.write_line(&line))
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))?
            .map_err(|err| SinkError::Transport(format!("{err:#}")))
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.writer
            .flush()
            .await
            .map_err(|err| SinkError::Transport(format!("{err:#}")))
    }

    fn label(&self) -> &'static str {
        "stream"
    }
}

/// In-process broadcast channel; subscribers may attach at any time.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    topic: String,
    bus: MemoryBus<TelemetryPayload>,
}

impl ChannelSink {
    /// Creates a channel keeping the last `backlog` payloads for snapshots.
    #[must_use]
    pub fn new(topic: impl Into<String>, backlog: usize) -> Self {
        Self {
            topic: topic.into(),
            bus: MemoryBus::new(backlog),
        }
    }

    /// Topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receiver for payloads published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryPayload> {
        self.bus.subscribe()
    }

    /// Most recent payloads, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TelemetryPayload> {
        self.bus.snapshot()
    }
}

#[async_trait]
impl TelemetrySink for ChannelSink {
    async fn publish(&self, payload: &TelemetryPayload) -> Result<(), SinkError> {
        self.bus.send(payload.clone());
        Ok(())
    }

    fn label(&self) -> &'static str {
        "channel"
    }
}

/// Discards payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl TelemetrySink for NullSink {
    async fn publish(&self, _payload: &TelemetryPayload) -> Result<(), SinkError> {
        Ok(())
    }

    fn label(&self) -> &'static str {
        "null"
    }
}

#[cfg(feature = "kafka")]
mod kafka {
    use std::time::Duration;

    use async_trait::async_trait;
    use rdkafka::{
        producer::{FutureProducer, FutureRecord, Producer},
        ClientConfig,
    };

    use super::TelemetrySink;
    use crate::{error::SinkError, payload::TelemetryPayload};

    /// Kafka producer keyed by vehicle id.
    pub struct KafkaSink {
        producer: FutureProducer,
        topic: String,
        timeout: Duration,
    }

    impl KafkaSink {
        /// Creates the producer and checks the topic is reachable.
        pub async fn connect(
            address: &str,
            topic: &str,
            timeout: Duration,
        ) -> Result<Self, SinkError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", address)
                .set("message.timeout.ms", timeout.as_millis().to_string())
                .create()
                .map_err(|err| SinkError::Transport(format!("creating kafka producer: {err}")))?;
            let probe = producer.clone();
            let probe_topic = topic.to_string();
            tokio::task::spawn_blocking(move || {
                probe
                    .client()
                    .fetch_metadata(Some(probe_topic.as_str()), timeout)
                    .map(|_| ())
            })
            .await
            .map_err(|err| SinkError::Transport(err.to_string()))?
            .map_err(|err| SinkError::Transport(format!("kafka broker {address} unreachable: {err}")))?;
            Ok(Self {
                producer,
                topic: topic.to_string(),
                timeout,
            })
        }
    }

    #[async_trait]
    impl TelemetrySink for KafkaSink {
        async fn publish(&self, payload: &TelemetryPayload) -> Result<(), SinkError> {
            let body = serde_json::to_vec(payload)?;
            let record = FutureRecord::to(&self.topic)
                .key(payload.vehicle_id.as_str())
                .payload(&body);
            self.producer
                .send(record, self.timeout)
                .await
                .map(|_| ())
                .map_err(|(err, _)| SinkError::Transport(err.to_string()))
        }

        async fn close(&self) -> Result<(), SinkError> {
            let producer = self.producer.clone();
            let timeout = self.timeout;
            tokio::task::spawn_blocking(move || producer.flush(timeout))
                .await
                .map_err(|err| SinkError::Transport(err.to_string()))?
                .map_err(|err| SinkError::Transport(err.to_string()))
        }

        fn label(&self) -> &'static str {
            "kafka"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::EntityIdentity,
        vehicle::{TirePressures, Vehicle, VehicleState},
    };
    use chrono::Utc;
    use tempfile::tempdir;

    fn payload(vehicle_id: &str) -> TelemetryPayload {
        let vehicle = Vehicle::from_state(
            EntityIdentity {
                vehicle_id: vehicle_id.into(),
                driver_id: "DR_001".into(),
            },
            VehicleState {
                lat: 6.45,
                lon: 3.39,
                heading_deg: 12.0,
                speed_kph: 35.0,
                engine_temp_c: 82.0,
                battery_v: 12.6,
                tire_psi: TirePressures::uniform(32.5),
                fuel_percent: 91.0,
            },
        );
        TelemetryPayload::from_vehicle(&vehicle, Utc::now())
    }

    #[tokio::test]
    async fn stream_sink_writes_parseable_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw").join("telemetry.jsonl");
        let sink = connect_sink(
            &SinkConfig::Stream {
                path: Some(path.clone()),
            },
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(sink.label(), "stream");
        sink.publish(&payload("BUS_01")).await.unwrap();
        sink.publish(&payload("BUS_02")).await.unwrap();
        sink.close().await.unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let ids: Vec<String> = content
            .lines()
            .map(|line| serde_json::from_str::<TelemetryPayload>(line).unwrap().vehicle_id)
            .collect();
        assert_eq!(ids, vec!["BUS_01", "BUS_02"]);
    }

    #[tokio::test]
    async fn channel_sink_fans_out_to_subscribers() {
        let sink = ChannelSink::new(DEFAULT_TOPIC, 8);
        let mut rx = sink.subscribe();
        sink.publish(&payload("CAR_01")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().vehicle_id, "CAR_01");
        assert_eq!(sink.snapshot().len(), 1);
        assert_eq!(sink.topic(), "fleet/telemetry");
    }

    #[tokio::test]
    async fn channel_sink_without_subscribers_is_not_an_error() {
        let sink = ChannelSink::new("t", 2);
        for _ in 0..3 {
            sink.publish(&payload("CAR_02")).await.unwrap();
        }
        assert_eq!(sink.snapshot().len(), 2);
    }

    #[test]
    fn sink_config_parses_tagged_modes() {
        let stream: SinkConfig = toml::from_str(r#"mode = "stream""#).unwrap();
        assert_eq!(stream, SinkConfig::Stream { path: None });
        let channel: SinkConfig = toml::from_str(r#"mode = "channel""#).unwrap();
        assert_eq!(
            channel,
            SinkConfig::Channel {
                address: None,
                topic: DEFAULT_TOPIC.into()
            }
        );
    }

    #[cfg(not(feature = "kafka"))]
    #[tokio::test]
    async fn broker_address_without_kafka_feature_fails_fast() {
        let config = SinkConfig::Channel {
            address: Some("localhost:9092".into()),
            topic: DEFAULT_TOPIC.into(),
        };
        let err = connect_sink(&config, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SimulatorError::Config(ConfigError::Channel(_))
        ));
    }
}
