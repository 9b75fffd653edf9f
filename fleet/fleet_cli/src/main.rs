use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use fleet_event_bus::JsonLinesWriter;
use fleet_logging::{JsonLogger, LogLevel};
use fleet_simulator::{
    batch::{run_batch, BatchConfig},
    FleetSimulation, SimulationTelemetry, SimulatorConfig, SimulatorError, SinkConfig,
};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "fleet-sim", version, about = "Fleet vehicle telemetry simulator")]
struct Cli {
    /// JSON log file; logs go to stderr when omitted.
    #[arg(long, global = true)]
    log_path: Option<PathBuf>,
    /// Minimum log level (debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Streams live telemetry until Ctrl-C or the tick bound.
    Stream(StreamArgs),
    /// Generates day-partitioned raw files.
    Batch(BatchArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Stream,
    Channel,
    Null,
}

#[derive(Parser, Debug)]
struct StreamArgs {
    /// TOML configuration; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of vehicles to simulate.
    #[arg(short = 'n', long = "vehicles")]
    vehicles: Option<usize>,
    /// Tick interval in seconds.
    #[arg(long)]
    tick: Option<f64>,
    #[arg(long, value_enum)]
    mode: Option<Mode>,
    /// Broker bootstrap address (channel mode).
    #[arg(long)]
    broker: Option<String>,
    #[arg(long)]
    topic: Option<String>,
    /// Append payloads to this file instead of stdout (stream mode).
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long, allow_negative_numbers = true)]
    start_lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    start_lon: Option<f64>,
    #[arg(long)]
    replay_capacity: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Stop each vehicle after this many ticks.
    #[arg(long)]
    ticks: Option<u64>,
    /// Lifecycle events as JSON lines.
    #[arg(long)]
    event_log: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct BatchArgs {
    /// Most recent day (defaults to today, UTC).
    #[arg(long)]
    start_date: Option<NaiveDate>,
    #[arg(long, default_value_t = 1)]
    days: u32,
    #[arg(long, default_value_t = 180)]
    telemetry_per_day: usize,
    /// Truncate existing day files.
    #[arg(long)]
    overwrite: bool,
    #[arg(long, default_value = "warehouse/raw")]
    out_dir: PathBuf,
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = LogLevel::parse(&cli.log_level)
        .with_context(|| format!("unknown log level {}", cli.log_level))?;
    let logger = match &cli.log_path {
        Some(path) => JsonLogger::new(path)?,
        None => JsonLogger::stderr(),
    }
    .with_min_level(level);

    match cli.command {
        Commands::Stream(args) => handle_stream(args, logger).await,
        Commands::Batch(args) => handle_batch(args, logger).await,
    }
}

async fn handle_stream(args: StreamArgs, logger: JsonLogger) -> Result<()> {
    let config = stream_config(&args)?;
    let mut telemetry = SimulationTelemetry::builder("fleet-sim").logger(logger);
    if let Some(path) = &args.event_log {
        let events = JsonLinesWriter::append(path)
            .await
            .with_context(|| format!("opening event log {}", path.display()))?;
        telemetry = telemetry.event_publisher(Arc::new(events));
    }
    let telemetry = telemetry.build()?;

    let simulation = FleetSimulation::builder()
        .config(config)
        .telemetry(telemetry.clone())
        .build()
        .await
        .context("simulator startup failed")?;
    let _ = telemetry.log(
        LogLevel::Info,
        "fleet.stream.started",
        json!({
            "vehicles": simulation
                .entities()
                .iter()
                .map(|entity| entity.vehicle_id.as_str())
                .collect::<Vec<_>>(),
        }),
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    match simulation.run(shutdown).await {
        Ok(report) => {
            let _ = telemetry.log(
                LogLevel::Info,
                "fleet.stream.finished",
                json!({
                    "ticks": report.ticks(),
                    "published": report.published(),
                    "publish_failures": report
                        .entities
                        .iter()
                        .map(|entity| entity.stats.publish_failures)
                        .sum::<u64>(),
                }),
            );
            Ok(())
        }
        Err(err @ SimulatorError::StopTimeout { .. }) => bail!("shutdown incomplete: {err}"),
        Err(err) => Err(err.into()),
    }
}

fn stream_config(args: &StreamArgs) -> Result<SimulatorConfig> {
    let mut config = match &args.config {
        Some(path) => SimulatorConfig::load(path)?,
        None => SimulatorConfig::default(),
    };
    if let Some(vehicles) = args.vehicles {
        config.vehicle_count = Some(vehicles);
    }
    if let Some(tick) = args.tick {
        config.tick_seconds = tick;
    }
    if let Some(lat) = args.start_lat {
        config.start_lat = lat;
    }
    if let Some(lon) = args.start_lon {
        config.start_lon = lon;
    }
    if let Some(capacity) = args.replay_capacity {
        config.replay_capacity = capacity;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if args.ticks.is_some() {
        config.max_ticks = args.ticks;
    }

    config.sink = merge_sink(args, config.sink)?;
    config.validate()?;
    Ok(config)
}

/// Applies `--mode`, `--output`, `--broker` and `--topic` over the file's sink.
fn merge_sink(args: &StreamArgs, file: SinkConfig) -> Result<SinkConfig> {
    let sink = match (args.mode, file) {
        (None | Some(Mode::Null), SinkConfig::Null) | (Some(Mode::Null), _) => SinkConfig::Null,
        (None | Some(Mode::Stream), SinkConfig::Stream { path }) => SinkConfig::Stream {
            path: args.output.clone().or(path),
        },
        (Some(Mode::Stream), _) => SinkConfig::Stream {
            path: args.output.clone(),
        },
        (None | Some(Mode::Channel), SinkConfig::Channel { address, topic }) => {
            SinkConfig::Channel {
                address: args.broker.clone().or(address),
                topic: args.topic.clone().unwrap_or(topic),
            }
        }
        (Some(Mode::Channel), _) => SinkConfig::Channel {
            address: args.broker.clone(),
            topic: args
                .topic
                .clone()
                .unwrap_or_else(|| fleet_simulator::sink::DEFAULT_TOPIC.to_string()),
        },
    };
    // an in-process channel has no subscriber outside this process
    if let SinkConfig::Channel { address: None, .. } = sink {
        bail!("channel mode needs a broker address: pass --broker or set [sink] address");
    }
    Ok(sink)
}

async fn handle_batch(args: BatchArgs, logger: JsonLogger) -> Result<()> {
    let telemetry = SimulationTelemetry::builder("fleet-batch")
        .logger(logger)
        .build()?;
    let start_date = args.start_date.unwrap_or_else(|| Utc::now().date_naive());
    let config = BatchConfig {
        days: args.days,
        telemetry_per_day: args.telemetry_per_day,
        overwrite: args.overwrite,
        seed: args.seed,
        ..BatchConfig::new(args.out_dir, start_date)
    };
    let summary = run_batch(&config, Some(&telemetry)).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
