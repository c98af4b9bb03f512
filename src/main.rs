//! Traffic monitor - top-N congested traffic lights per observation window
//!
//! Reads timestamped sensor readings, pushes them through a bounded blocking
//! queue at simulated sensor cadence and reports the most congested lights
//! every time a window closes.
//!
//! Module structure:
//! - `domain/` - Core value types (Event, WindowReport) and errors
//! - `io/` - Sources and report sinks
//! - `services/` - Bounded queue, window aggregator, ranker, pipeline
//! - `infra/` - Config and metrics

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use traffic_monitor::infra::{Config, Metrics, PolicyKind};
use traffic_monitor::io::{FanoutSink, JsonlSink, LineSource, LogSink, ReportSink};
use traffic_monitor::services::Pipeline;

/// Traffic monitor - reports the most congested traffic lights per window
#[derive(Parser, Debug)]
#[command(name = "traffic-monitor", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,

    /// Reading file to process (overrides source.file)
    #[arg(short, long)]
    input: Option<String>,

    /// Number of producer workers
    #[arg(long)]
    producers: Option<usize>,

    /// Number of consumer workers
    #[arg(long)]
    consumers: Option<usize>,

    /// Number of lights to report per window
    #[arg(short = 'n', long)]
    top_n: Option<usize>,

    /// Window policy: time-boundary or count-boundary
    #[arg(long)]
    policy: Option<PolicyKind>,

    /// Readings per window for the count-boundary policy
    #[arg(long)]
    interval: Option<u64>,

    /// Producer delay in milliseconds (0 to run at full speed)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Append window reports to this JSONL file
    #[arg(long)]
    report_file: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    /// Apply command line overrides on top of the loaded config
    fn apply(&self, mut config: Config) -> Config {
        if let Some(input) = &self.input {
            config = config.with_source_file(input);
        }
        if self.producers.is_some() || self.consumers.is_some() {
            let producers = self.producers.unwrap_or(config.producers());
            let consumers = self.consumers.unwrap_or(config.consumers());
            config = config.with_workers(producers, consumers);
        }
        if let Some(top_n) = self.top_n {
            config = config.with_top_n(top_n);
        }
        if let Some(policy) = self.policy {
            config = config.with_policy(policy, self.interval);
        } else if self.interval.is_some() {
            let policy = config.policy();
            config = config.with_policy(policy, self.interval);
        }
        if let Some(delay) = self.delay_ms {
            let consumer_ms = config.consumer_delay().as_millis() as u64;
            config = config.with_delays(delay, consumer_ms);
        }
        if let Some(file) = &self.report_file {
            config = config.with_report_file(Some(file));
        }
        config
    }
}

fn init_logging(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-window and per-worker detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_thread_names(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), "traffic_monitor_starting");

    let config = args.apply(Config::load_from_path(&args.config));
    config.validate().context("invalid configuration")?;

    info!(
        config_file = %config.config_file(),
        source_file = %config.source_file(),
        queue_capacity = %config.queue_capacity(),
        producers = %config.producers(),
        consumers = %config.consumers(),
        policy = ?config.policy(),
        window_interval = ?config.window_interval(),
        top_n = %config.top_n(),
        lights = ?config.lights(),
        producer_delay_ms = %config.producer_delay().as_millis(),
        report_file = ?config.report_file(),
        "config_loaded"
    );

    let source_options = config.source_options()?;
    let source = LineSource::open(config.source_file(), source_options)
        .with_context(|| format!("Failed to open reading file {}", config.source_file()))?;

    let mut sink = FanoutSink::new().with(Arc::new(LogSink));
    if let Some(file) = config.report_file() {
        sink = sink.with(Arc::new(JsonlSink::new(file)));
    }
    let sink: Arc<dyn ReportSink> = Arc::new(sink);

    let metrics = Arc::new(Metrics::new());
    let pipeline = Pipeline::new(&config, sink, metrics.clone())?;
    let summary = pipeline.run(source)?;

    metrics.report().log();
    info!(
        windows = %summary.windows_reported,
        absorbed = %summary.events_absorbed,
        "traffic_monitor_shutdown_complete"
    );
    Ok(())
}
