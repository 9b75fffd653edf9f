//! Bounded per-entity history of emitted payloads.

use std::collections::VecDeque;

use crate::payload::TelemetryPayload;

/// Default number of payloads retained per entity.
pub const DEFAULT_REPLAY_CAPACITY: usize = 30;

const HARSH_BRAKE_MIN_DROP_KPH: f64 = 8.0;
const HARSH_BRAKE_MIN_DROP_FRACTION: f64 = 0.25;

/// FIFO ring of the most recent payloads; the oldest is evicted when full.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    entries: VecDeque<TelemetryPayload>,
    capacity: usize,
}

impl ReplayBuffer {
    /// Creates a buffer holding at most `capacity` payloads (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends, evicting the oldest entry when at capacity.
    pub fn append(&mut self, payload: TelemetryPayload) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(payload);
    }

    /// Most recent payload.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryPayload> {
        self.entries.back()
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TelemetryPayload> + ExactSizeIterator {
        self.entries.iter()
    }

    /// Number of retained payloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before the first append.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum retained payloads.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sets `candidate.harsh_brake` from the speed drop since the latest entry.
    ///
    /// Must run before `candidate` is appended. With an empty buffer the flag is false.
    pub fn flag_harsh_brake(&self, candidate: &mut TelemetryPayload) {
        candidate.harsh_brake = self
            .latest()
            .is_some_and(|previous| is_harsh_brake(previous.speed_kph, candidate.speed_kph));
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CAPACITY)
    }
}

/// A drop of at least `max(8 kph, 25% of previous)` counts as harsh braking.
#[must_use]
pub fn is_harsh_brake(previous_kph: f64, current_kph: f64) -> bool {
    let drop = previous_kph - current_kph;
    drop >= HARSH_BRAKE_MIN_DROP_KPH.max(previous_kph * HARSH_BRAKE_MIN_DROP_FRACTION)
}
