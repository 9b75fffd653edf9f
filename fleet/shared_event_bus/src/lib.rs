#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Publisher abstractions shared by the fleet simulator and its tooling.
//!
//! Provides a generic async [`Publisher`] trait, a bounded in-memory
//! broadcast bus, and a newline-delimited JSON writer over stdout or a file.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{
    fs::OpenOptions,
    io::{AsyncWrite, AsyncWriteExt},
    sync::{broadcast, Mutex as AsyncMutex},
};

/// Lifecycle event emitted by simulator components (not telemetry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier (uuid).
    pub id: String,
    /// Component producing the event.
    pub source: String,
    /// Event type (e.g., `simulation.worker.stopped`).
    pub event_type: String,
    /// ISO timestamp.
    pub timestamp: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Publisher interface, generic over the published item.
#[async_trait]
pub trait Publisher<T: Sync + ?Sized>: Send + Sync {
    /// Publishes one item.
    async fn publish(&self, item: &T) -> Result<()>;
}

/// Subscriber interface for buses that fan out to listeners.
pub trait Subscriber<T: Clone>: Send + Sync {
    /// Returns a receiver observing every item published after the call.
    fn subscribe(&self) -> broadcast::Receiver<T>;
}

/// In-memory broadcast bus with a bounded backlog of recent items.
#[derive(Debug)]
pub struct MemoryBus<T> {
    sender: broadcast::Sender<T>,
    backlog: Arc<Mutex<VecDeque<T>>>,
    capacity: usize,
}

impl<T> Clone for MemoryBus<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            backlog: Arc::clone(&self.backlog),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone + Send + 'static> MemoryBus<T> {
    /// Creates a new bus; `capacity` bounds both the channel and the backlog.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Snapshot of recent items, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Pushes an item without awaiting. Having no subscribers is not an error.
    pub fn send(&self, item: T) {
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(item.clone());
        }
        let _ = self.sender.send(item);
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Publisher<T> for MemoryBus<T> {
    async fn publish(&self, item: &T) -> Result<()> {
        self.send(item.clone());
        Ok(())
    }
}

impl<T: Clone + Send + Sync + 'static> Subscriber<T> for MemoryBus<T> {
    fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}

/// Serialized newline-delimited JSON writer over stdout or an append-mode file.
pub struct JsonLinesWriter {
    path: Option<PathBuf>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl std::fmt::Debug for JsonLinesWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesWriter")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JsonLinesWriter {
    /// Writer over the process stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self {
            path: None,
            writer: AsyncMutex::new(Box::new(tokio::io::stdout())),
        }
    }

    /// Opens (creating parents) an append-mode JSONL file.
    pub async fn append(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path: Some(path),
            writer: AsyncMutex::new(Box::new(file)),
        })
    }

    /// Target file, `None` for stdout.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Writes one already-serialized line; a trailing newline is appended.
    pub async fn write_line(&self, line: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Flushes buffered output.
    pub async fn flush(&self) -> Result<()> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl<T: Serialize + Sync + ?Sized> Publisher<T> for JsonLinesWriter {
    async fn publish(&self, item: &T) -> Result<()> {
        let data = serde_json::to_vec(item)?;
        self.write_line(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_event() -> EventRecord {
        EventRecord {
            id: "event-1".into(),
            source: "simulator".into(),
            event_type: "simulation.worker.stopped".into(),
            timestamp: "2025-11-20T00:00:00Z".into(),
            payload: serde_json::json!({"vehicle_id": "BUS_01"}),
        }
    }

    #[tokio::test]
    async fn publishes_and_receives() {
        let bus: MemoryBus<EventRecord> = MemoryBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(&sample_event()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "simulation.worker.stopped");
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let bus = MemoryBus::<u32>::new(3);
        for value in 0..5u32 {
            bus.publish(&value).await.unwrap();
        }
        assert_eq!(bus.snapshot(), vec![2, 3, 4]);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn json_lines_writer_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("events.jsonl");
        let writer = JsonLinesWriter::append(&path).await.unwrap();
        writer.publish(&sample_event()).await.unwrap();
        writer.publish(&sample_event()).await.unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
        for line in content.lines() {
            let parsed: EventRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.source, "simulator");
        }
    }
}
