//! Batch generators: day-partitioned vehicle, driver health and finance files.

/// Daily finance summaries.
pub mod finance;
/// Driver shift/fatigue events.
pub mod health;
/// Orchestrates a multi-day batch run.
pub mod runner;

pub use finance::{DailyFinance, TradingPosition, Trip};
pub use health::HealthEvent;
pub use runner::{run_batch, BatchConfig, BatchSummary};
