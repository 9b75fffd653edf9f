//! Scheduling engine.
//!
//! Every entity gets its own tokio task that owns the entity's [`Vehicle`],
//! [`ReplayBuffer`] and RNG outright; the only shared resource is the sink.
//! Workers never synchronise with each other and observe a shared stop flag
//! once per loop iteration (and while sleeping).

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, SubsecRound, Utc};
use fleet_logging::LogLevel;
use futures::future::join_all;
use rand::{rngs::SmallRng, Rng};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::instrument;

use crate::{
    anomaly::AnomalyInjector,
    config::SimulatorConfig,
    error::SimulatorError,
    helper::{worker_rng, SimulationTelemetry},
    payload::TelemetryPayload,
    registry::{EntityIdentity, EntityRegistry},
    replay::ReplayBuffer,
    sink::TelemetrySink,
    vehicle::{AnomalyMarkers, Vehicle, VehicleState},
};

/// Lifecycle of one entity worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    /// Vehicle built, task not spawned yet.
    Created,
    /// Ticking.
    Running,
    /// Stop observed, winding down.
    Stopping,
    /// Loop exited; nothing more will be published.
    Stopped,
}

/// Per-worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Completed ticks.
    pub ticks: u64,
    /// Payloads accepted by the sink.
    pub published: u64,
    /// Payloads dropped after a sink error.
    pub publish_failures: u64,
    /// Anomalies injected.
    pub anomalies: u64,
}

/// Final view of one entity after its worker exited.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySnapshot {
    /// Assignment.
    pub identity: EntityIdentity,
    /// Physical state after the last tick.
    pub state: VehicleState,
    /// Anomaly markers after the last tick.
    pub markers: AnomalyMarkers,
    /// Replay buffer contents, oldest first.
    pub replay: Vec<TelemetryPayload>,
    /// Counters.
    pub stats: WorkerStats,
}

/// Outcome of a run, one snapshot per entity that exited cleanly.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Snapshots in entity order.
    pub entities: Vec<EntitySnapshot>,
}

impl RunReport {
    /// Total payloads accepted by the sink.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.entities.iter().map(|entity| entity.stats.published).sum()
    }

    /// Total ticks across entities.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.entities.iter().map(|entity| entity.stats.ticks).sum()
    }

    /// Snapshot for `vehicle_id`.
    #[must_use]
    pub fn entity(&self, vehicle_id: &str) -> Option<&EntitySnapshot> {
        self.entities
            .iter()
            .find(|entity| entity.identity.vehicle_id == vehicle_id)
    }
}

/// Raises the shared stop flag from outside the simulator (e.g. a signal handler).
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Requests a cooperative stop; idempotent.
    pub fn stop(&self) {
        self.flag.send_replace(true);
    }
}

/// Multi-entity telemetry simulator.
pub struct Simulator {
    context: Arc<WorkerContext>,
    identities: Vec<EntityIdentity>,
    stop_flag: Arc<watch::Sender<bool>>,
    stop_timeout: Duration,
    phase: Phase,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("entities", &self.identities.len())
            .field("sink", &self.context.sink.label())
            .field("states", &self.worker_states())
            .finish_non_exhaustive()
    }
}

enum Phase {
    Idle(Vec<Worker>),
    Running(Vec<WorkerHandle>),
    Finished(Vec<WorkerState>),
}

struct WorkerHandle {
    state: watch::Receiver<WorkerState>,
    join: JoinHandle<EntitySnapshot>,
}

struct WorkerContext {
    tick_seconds: f64,
    jitter_fraction: f64,
    max_ticks: Option<u64>,
    injector: AnomalyInjector,
    sink: Arc<dyn TelemetrySink>,
    telemetry: Option<SimulationTelemetry>,
}

impl WorkerContext {
    fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.log(level, message, metadata);
        }
    }

    fn event(&self, event_type: &str, payload: Value) {
        if let Some(telemetry) = &self.telemetry {
            let _ = telemetry.event(event_type, payload);
        }
    }
}

impl Simulator {
    /// Validates `config`, pairs active entities and builds one vehicle each.
    pub fn new(
        config: SimulatorConfig,
        sink: Arc<dyn TelemetrySink>,
        telemetry: Option<SimulationTelemetry>,
    ) -> Result<Self, SimulatorError> {
        config.validate()?;
        let registry = EntityRegistry::new(&config.roster);
        let mut identities = registry.assignments();
        if identities.is_empty() {
            return Err(SimulatorError::NoActiveEntities {
                vehicles: registry.active_vehicles().len(),
                drivers: registry.active_drivers().len(),
            });
        }

        let context = WorkerContext {
            tick_seconds: config.tick_seconds,
            jitter_fraction: config.jitter_fraction,
            max_ticks: config.max_ticks,
            injector: AnomalyInjector::new(config.anomalies),
            sink,
            telemetry,
        };

        if let Some(limit) = config.vehicle_count {
            if limit > identities.len() {
                context.log(
                    LogLevel::Warn,
                    "simulator.entity_count.capped",
                    json!({ "requested": limit, "available": identities.len() }),
                );
            }
            identities.truncate(limit);
        }

        let workers = identities
            .iter()
            .enumerate()
            .map(|(index, identity)| {
                let mut rng = worker_rng(config.seed, index);
                let (lat, lon) = config.start_position(index);
                Worker {
                    vehicle: Vehicle::new(identity.clone(), lat, lon, &mut rng),
                    replay: ReplayBuffer::new(config.replay_capacity),
                    rng,
                    stats: WorkerStats::default(),
                    last_timestamp: None,
                }
            })
            .collect();

        context.log(
            LogLevel::Info,
            "simulator.created",
            json!({
                "entities": identities.len(),
                "inactive_vehicles": registry.inactive_vehicles().len(),
                "inactive_drivers": registry.inactive_drivers().len(),
                "sink": context.sink.label(),
                "tick_seconds": config.tick_seconds,
            }),
        );

        let (stop_flag, _) = watch::channel(false);
        Ok(Self {
            context: Arc::new(context),
            identities,
            stop_flag: Arc::new(stop_flag),
            stop_timeout: config.stop_timeout(),
            phase: Phase::Idle(workers),
        })
    }

    /// Entities in simulation order.
    #[must_use]
    pub fn entities(&self) -> &[EntityIdentity] {
        &self.identities
    }

    /// Current state of every worker, in entity order.
    #[must_use]
    pub fn worker_states(&self) -> Vec<WorkerState> {
        match &self.phase {
            Phase::Idle(workers) => vec![WorkerState::Created; workers.len()],
            Phase::Running(handles) => handles.iter().map(|handle| *handle.state.borrow()).collect(),
            Phase::Finished(states) => states.clone(),
        }
    }

    /// Handle that can request a stop while `wait` is pending.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop_flag),
        }
    }

    /// Spawns one worker per entity.
    #[instrument(skip(self), fields(entities = self.identities.len()))]
    pub async fn start(&mut self) -> Result<(), SimulatorError> {
        let workers = match std::mem::replace(&mut self.phase, Phase::Running(Vec::new())) {
            Phase::Idle(workers) => workers,
            other => {
                self.phase = other;
                return Err(SimulatorError::AlreadyStarted);
            }
        };

        let handles = workers
            .into_iter()
            .map(|worker| {
                let (state_tx, state_rx) = watch::channel(WorkerState::Created);
                let stop = self.stop_flag.subscribe();
                let context = Arc::clone(&self.context);
                WorkerHandle {
                    state: state_rx,
                    join: tokio::spawn(worker.run(context, stop, state_tx)),
                }
            })
            .collect();
        self.phase = Phase::Running(handles);

        self.context.log(
            LogLevel::Info,
            "simulator.started",
            json!({ "entities": self.identities.len() }),
        );
        self.context.event(
            "simulation.started",
            json!({ "entities": self.identities.len(), "sink": self.context.sink.label() }),
        );
        Ok(())
    }

    /// Raises the stop flag and collects every worker within the stop timeout.
    ///
    /// Workers still running at the deadline are aborted and reported as
    /// [`SimulatorError::StopTimeout`]. The sink is closed either way.
    #[instrument(skip(self), fields(entities = self.identities.len()))]
    pub async fn stop(&mut self) -> Result<RunReport, SimulatorError> {
        let handles = self.take_running()?;
        self.finish(handles).await
    }

    /// Waits until every worker finished on its own (`max_ticks`) or a stop
    /// was requested through a [`StopHandle`], then behaves like [`Self::stop`].
    #[instrument(skip(self), fields(entities = self.identities.len()))]
    pub async fn wait(&mut self) -> Result<RunReport, SimulatorError> {
        let handles = self.take_running()?;
        let mut stop = self.stop_flag.subscribe();
        let all_stopped = join_all(handles.iter().map(|handle| {
            let mut state = handle.state.clone();
            async move {
                let _ = state.wait_for(|state| *state == WorkerState::Stopped).await;
            }
        }));
        tokio::select! {
            _ = all_stopped => {}
            _ = stop.wait_for(|stopping| *stopping) => {}
        }
        self.finish(handles).await
    }

    fn take_running(&mut self) -> Result<Vec<WorkerHandle>, SimulatorError> {
        match std::mem::replace(&mut self.phase, Phase::Finished(Vec::new())) {
            Phase::Running(handles) => Ok(handles),
            other => {
                self.phase = other;
                Err(SimulatorError::NotStarted)
            }
        }
    }

    async fn finish(&mut self, handles: Vec<WorkerHandle>) -> Result<RunReport, SimulatorError> {
        self.stop_flag.send_replace(true);
        let deadline = Instant::now() + self.stop_timeout;

        let outcomes = join_all(handles.into_iter().map(|handle| async move {
            let WorkerHandle { state, mut join } = handle;
            let outcome = match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(result) => Some(result),
                Err(_) => {
                    join.abort();
                    None
                }
            };
            (outcome, state)
        }))
        .await;

        let mut report = RunReport::default();
        let mut states = Vec::with_capacity(outcomes.len());
        let mut pending = 0;
        for (outcome, state) in outcomes {
            states.push(*state.borrow());
            match outcome {
                Some(Ok(snapshot)) => report.entities.push(snapshot),
                Some(Err(err)) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Some(Err(_)) | None => pending += 1,
            }
        }
        self.phase = Phase::Finished(states);

        let closed = self.context.sink.close().await;
        self.context.log(
            if pending == 0 { LogLevel::Info } else { LogLevel::Warn },
            "simulator.stopped",
            json!({
                "entities": self.identities.len(),
                "aborted": pending,
                "ticks": report.ticks(),
                "published": report.published(),
            }),
        );
        self.context.event(
            "simulation.stopped",
            json!({ "published": report.published(), "aborted": pending }),
        );

        if pending > 0 {
            return Err(SimulatorError::StopTimeout {
                pending,
                timeout: self.stop_timeout,
            });
        }
        closed?;
        Ok(report)
    }
}

struct Worker {
    vehicle: Vehicle,
    replay: ReplayBuffer,
    rng: SmallRng,
    stats: WorkerStats,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Worker {
    async fn run(
        mut self,
        context: Arc<WorkerContext>,
        mut stop: watch::Receiver<bool>,
        state: watch::Sender<WorkerState>,
    ) -> EntitySnapshot {
        state.send_replace(WorkerState::Running);
        loop {
            if *stop.borrow() {
                break;
            }
            self.tick(&context).await;
            if context.max_ticks.is_some_and(|max| self.stats.ticks >= max) {
                break;
            }
            let pause = self.pause(&context);
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        state.send_replace(WorkerState::Stopping);
        let snapshot = self.into_snapshot();
        state.send_replace(WorkerState::Stopped);
        snapshot
    }

    async fn tick(&mut self, context: &WorkerContext) {
        let now = self.next_timestamp();
        self.vehicle.step(context.tick_seconds, now, &mut self.rng);

        let fired = context.injector.apply(&mut self.vehicle, now, &mut self.rng);
        for anomaly in &fired {
            context.log(
                LogLevel::Debug,
                "simulator.anomaly",
                json!({
                    "vehicle_id": self.vehicle.identity().vehicle_id,
                    "kind": anomaly.kind().label(),
                    "detail": format!("{anomaly:?}"),
                }),
            );
        }
        self.stats.anomalies += fired.len() as u64;

        let mut payload = TelemetryPayload::from_vehicle(&self.vehicle, now);
        self.replay.flag_harsh_brake(&mut payload);
        self.replay.append(payload.clone());

        match context.sink.publish(&payload).await {
            Ok(()) => self.stats.published += 1,
            Err(err) => {
                self.stats.publish_failures += 1;
                context.log(
                    LogLevel::Error,
                    "simulator.publish.failed",
                    json!({
                        "vehicle_id": payload.vehicle_id,
                        "event_id": payload.event_id,
                        "sink": context.sink.label(),
                        "error": err.to_string(),
                    }),
                );
            }
        }
        self.stats.ticks += 1;
    }

    /// Wall clock truncated to microseconds, bumped past the previous tick if needed.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let now = match self.last_timestamp {
            Some(previous) if now <= previous => previous + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(now);
        now
    }

    fn pause(&mut self, context: &WorkerContext) -> Duration {
        let spread = context.tick_seconds * context.jitter_fraction;
        let offset = if spread > 0.0 {
            self.rng.gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64((context.tick_seconds + offset).max(0.0))
    }

    fn into_snapshot(self) -> EntitySnapshot {
        EntitySnapshot {
            identity: self.vehicle.identity().clone(),
            state: *self.vehicle.state(),
            markers: *self.vehicle.markers(),
            replay: self.replay.iter().cloned().collect(),
            stats: self.stats,
        }
    }
}
