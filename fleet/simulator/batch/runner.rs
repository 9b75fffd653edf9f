//! Day-partitioned JSONL generation for the raw warehouse layer.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use fleet_event_bus::{JsonLinesWriter, Publisher};
use fleet_logging::LogLevel;
use rand::{rngs::SmallRng, Rng};
use serde::Serialize;
use serde_json::json;
use tracing::instrument;

use crate::{
    anomaly::{AnomalyInjector, AnomalyProbabilities},
    batch::{finance::DailyFinance, health::HealthEvent},
    helper::{worker_rng, SimulationTelemetry},
    payload::{format_timestamp, TelemetryPayload},
    registry::{EntityIdentity, EntityRegistry, FleetRoster},
    replay::ReplayBuffer,
    vehicle::Vehicle,
};

/// Seconds between batch telemetry samples.
pub const BATCH_TICK_SECONDS: f64 = 60.0;
const SAMPLE_WINDOW_MS: i64 = 12 * 3600 * 1000;
const BATCH_ORIGIN: (f64, f64) = (6.45, 3.39);
const BATCH_SPACING_DEG: f64 = 0.005;

/// Batch run parameters.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Root of the raw layer; `vehicles/`, `driver_health/`, `finance/` go below it.
    pub out_dir: PathBuf,
    /// Most recent day generated.
    pub start_date: NaiveDate,
    /// Days generated, counting backwards from `start_date`.
    pub days: u32,
    /// Telemetry samples per vehicle per day.
    pub telemetry_per_day: usize,
    /// Inclusive trip count range per driver per day.
    pub trips_per_driver: (usize, usize),
    /// Truncate existing day files instead of appending.
    pub overwrite: bool,
    /// Seed for reproducible output.
    pub seed: Option<u64>,
    /// Vehicle and driver statuses.
    pub roster: FleetRoster,
    /// Anomaly probabilities per sample.
    pub anomalies: AnomalyProbabilities,
}

impl BatchConfig {
    /// One day of default-sized output for `start_date`.
    #[must_use]
    pub fn new(out_dir: impl Into<PathBuf>, start_date: NaiveDate) -> Self {
        Self {
            out_dir: out_dir.into(),
            start_date,
            days: 1,
            telemetry_per_day: 180,
            trips_per_driver: (5, 15),
            overwrite: false,
            seed: None,
            roster: FleetRoster::default(),
            anomalies: AnomalyProbabilities::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.days > 0, "days must be at least 1");
        ensure!(self.telemetry_per_day > 0, "telemetry_per_day must be at least 1");
        ensure!(
            self.trips_per_driver.0 <= self.trips_per_driver.1,
            "trip range {:?} is empty",
            self.trips_per_driver
        );
        self.anomalies.validate()?;
        Ok(())
    }
}

/// What a batch run wrote.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Days generated, newest first.
    pub dates: Vec<NaiveDate>,
    /// Vehicle telemetry records.
    pub vehicle_records: usize,
    /// Driver health records.
    pub health_records: usize,
    /// Daily finance records.
    pub finance_records: usize,
    /// Files touched.
    pub files: Vec<PathBuf>,
}

#[derive(Serialize)]
struct Record<'a, T> {
    #[serde(flatten)]
    body: &'a T,
    #[serde(rename = "_meta")]
    meta: RecordMeta,
}

#[derive(Serialize)]
struct RecordMeta {
    generated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    vehicle_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_index: Option<usize>,
}

impl RecordMeta {
    fn now() -> Self {
        Self {
            generated_at: format_timestamp(Utc::now()),
            vehicle_index: None,
            sample_index: None,
        }
    }
}

/// Generates `config.days` days of vehicle, health and finance files.
#[instrument(skip_all, fields(start = %config.start_date, days = config.days))]
pub async fn run_batch(
    config: &BatchConfig,
    telemetry: Option<&SimulationTelemetry>,
) -> Result<BatchSummary> {
    config.validate()?;
    let registry = EntityRegistry::new(&config.roster);
    let assignments = registry.assignments();
    let drivers = registry.active_drivers();
    let injector = AnomalyInjector::new(config.anomalies);
    let mut rng = worker_rng(config.seed, 0);
    let mut summary = BatchSummary::default();

    for offset in 0..config.days {
        let date = config.start_date - Duration::days(i64::from(offset));
        if let Some(tel) = telemetry {
            let _ = tel.log(
                LogLevel::Info,
                "batch.day.started",
                json!({ "date": date.to_string(), "vehicles": assignments.len() }),
            );
        }

        let vehicles = vehicle_snapshots(
            &assignments,
            date,
            config.telemetry_per_day,
            &injector,
            &mut rng,
        );
        let path = config.out_dir.join("vehicles").join(format!("{date}.jsonl"));
        write_jsonl(&path, &vehicles, config.overwrite).await?;
        summary.vehicle_records += vehicles.len();
        summary.files.push(path);

        let meta = RecordMeta::now;
        let health: Vec<_> = drivers
            .iter()
            .map(|driver| HealthEvent::simulate(driver, date, &mut rng))
            .collect();
        let health: Vec<_> = health.iter().map(|body| Record { body, meta: meta() }).collect();
        let path = config.out_dir.join("driver_health").join(format!("{date}.jsonl"));
        write_jsonl(&path, &health, config.overwrite).await?;
        summary.health_records += health.len();
        summary.files.push(path);

        let (low, high) = config.trips_per_driver;
        let finance: Vec<_> = drivers
            .iter()
            .map(|driver| {
                let trips = rng.gen_range(low..=high);
                DailyFinance::simulate(driver, date, trips, &mut rng)
            })
            .collect();
        let finance: Vec<_> = finance.iter().map(|body| Record { body, meta: meta() }).collect();
        let path = config.out_dir.join("finance").join(format!("{date}.jsonl"));
        write_jsonl(&path, &finance, config.overwrite).await?;
        summary.finance_records += finance.len();
        summary.files.push(path);

        summary.dates.push(date);
    }

    if let Some(tel) = telemetry {
        let _ = tel.log(
            LogLevel::Info,
            "batch.completed",
            json!({
                "days": summary.dates.len(),
                "vehicles": assignments.len(),
                "vehicle_records": summary.vehicle_records,
                "health_records": summary.health_records,
                "finance_records": summary.finance_records,
            }),
        );
    }
    Ok(summary)
}

/// Samples spread over the first 12 hours of `date`, one 60 s step each.
fn vehicle_snapshots(
    assignments: &[EntityIdentity],
    date: NaiveDate,
    samples: usize,
    injector: &AnomalyInjector,
    rng: &mut SmallRng,
) -> Vec<VehicleRecord> {
    let midnight: DateTime<Utc> = date.and_time(NaiveTime::MIN).and_utc();
    let mut records = Vec::with_capacity(assignments.len() * samples);
    for (index, identity) in assignments.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let spread = index as f64 * BATCH_SPACING_DEG;
        let mut vehicle = Vehicle::new(
            identity.clone(),
            BATCH_ORIGIN.0 + spread,
            BATCH_ORIGIN.1 + spread,
            rng,
        );
        let mut replay = ReplayBuffer::default();
        for sample in 0..samples {
            #[allow(clippy::cast_possible_wrap)]
            let offset = SAMPLE_WINDOW_MS * sample as i64 / samples as i64;
            let at = midnight + Duration::milliseconds(offset);
            vehicle.step(BATCH_TICK_SECONDS, at, rng);
            injector.apply(&mut vehicle, at, rng);
            let mut payload = TelemetryPayload::from_vehicle(&vehicle, at);
            replay.flag_harsh_brake(&mut payload);
            replay.append(payload.clone());
            records.push(VehicleRecord {
                payload,
                meta: RecordMeta {
                    vehicle_index: Some(index),
                    sample_index: Some(sample),
                    ..RecordMeta::now()
                },
            });
        }
    }
    records
}

#[derive(Serialize)]
struct VehicleRecord {
    #[serde(flatten)]
    payload: TelemetryPayload,
    #[serde(rename = "_meta")]
    meta: RecordMeta,
}

async fn write_jsonl<T: Serialize + Sync>(
    path: &Path,
    records: &[T],
    overwrite: bool,
) -> Result<()> {
    if overwrite {
        match tokio::fs::remove_file(path).await {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                return Err(err).with_context(|| format!("truncating {}", path.display()));
            }
            _ => {}
        }
    }
    let writer = JsonLinesWriter::append(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    for record in records {
        writer.publish(record).await?;
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::tempdir;

    fn lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn config(dir: &Path) -> BatchConfig {
        BatchConfig {
            days: 2,
            telemetry_per_day: 4,
            seed: Some(21),
            ..BatchConfig::new(dir, NaiveDate::from_ymd_opt(2025, 12, 11).unwrap())
        }
    }

    #[tokio::test]
    async fn writes_three_files_per_day_going_backwards() {
        let dir = tempdir().unwrap();
        let summary = run_batch(&config(dir.path()), None).await.unwrap();
        assert_eq!(
            summary.dates,
            vec![
                NaiveDate::from_ymd_opt(2025, 12, 11).unwrap(),
                NaiveDate::from_ymd_opt(2025, 12, 10).unwrap()
            ]
        );
        assert_eq!(summary.files.len(), 6);
        assert_eq!(summary.vehicle_records, 2 * 6 * 4);
        assert_eq!(summary.health_records, 2 * 6);
        assert_eq!(summary.finance_records, 2 * 6);

        let vehicles = lines(&dir.path().join("vehicles/2025-12-10.jsonl"));
        assert_eq!(vehicles.len(), 24);
        assert_eq!(vehicles[0]["timestamp"], "2025-12-10T00:00:00.000000Z");
        assert_eq!(vehicles[1]["timestamp"], "2025-12-10T03:00:00.000000Z");
        assert_eq!(vehicles[5]["_meta"]["vehicle_index"], 1);
        assert_eq!(vehicles[5]["_meta"]["sample_index"], 1);
        assert_eq!(vehicles[0]["vehicle_id"], "BUS_01");
        assert_eq!(vehicles[0]["driver_id"], "DR_001");

        let health = lines(&dir.path().join("driver_health/2025-12-11.jsonl"));
        assert_eq!(health.len(), 6);
        assert!(health[0]["_meta"]["generated_at"].is_string());
        assert!(health[0]["_meta"].get("vehicle_index").is_none());

        let finance = lines(&dir.path().join("finance/2025-12-11.jsonl"));
        for day in &finance {
            let trips = day["trips"].as_array().unwrap().len();
            assert!((5..=15).contains(&trips));
        }
    }

    #[tokio::test]
    async fn appends_unless_overwrite() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.days = 1;
        run_batch(&cfg, None).await.unwrap();
        run_batch(&cfg, None).await.unwrap();
        let path = dir.path().join("driver_health/2025-12-11.jsonl");
        assert_eq!(lines(&path).len(), 12);

        cfg.overwrite = true;
        run_batch(&cfg, None).await.unwrap();
        assert_eq!(lines(&path).len(), 6);
    }

    #[tokio::test]
    async fn rejects_empty_trip_range() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.trips_per_driver = (9, 3);
        assert!(run_batch(&cfg, None).await.is_err());
    }
}
