//! Configuration loading from TOML files
//!
//! The binary picks the file from `--config`, then the `CONFIG_FILE`
//! environment variable, then `config/dev.toml`. A file that cannot be read
//! falls back to defaults.

use crate::domain::error::ConfigError;
use crate::domain::types::{parse_timestamp, LightId};
use crate::io::source::{MalformedPolicy, SourceOptions};
use crate::services::window::WindowPolicy;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Window policy names as written in TOML and on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    TimeBoundary,
    CountBoundary,
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time-boundary" | "time" => Ok(PolicyKind::TimeBoundary),
            "count-boundary" | "count" => Ok(PolicyKind::CountBoundary),
            other => Err(format!("unknown window policy {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: default_queue_capacity() }
    }
}

fn default_queue_capacity() -> usize {
    48
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub producers: usize,
    #[serde(default = "default_worker_count")]
    pub consumers: usize,
    /// Pause after each enqueue, simulating sensor cadence
    #[serde(default = "default_producer_delay_ms")]
    pub producer_delay_ms: u64,
    /// Pause after each absorbed reading
    #[serde(default)]
    pub consumer_delay_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            producers: default_worker_count(),
            consumers: default_worker_count(),
            producer_delay_ms: default_producer_delay_ms(),
            consumer_delay_ms: 0,
        }
    }
}

fn default_worker_count() -> usize {
    1
}

fn default_producer_delay_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_policy")]
    pub policy: PolicyKind,
    /// Readings per window (count-boundary only)
    #[serde(default)]
    pub interval: Option<u64>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { policy: default_policy(), interval: None }
    }
}

fn default_policy() -> PolicyKind {
    PolicyKind::TimeBoundary
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Known traffic light domain
    #[serde(default = "default_lights")]
    pub lights: Vec<u32>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self { top_n: default_top_n(), lights: default_lights() }
    }
}

fn default_top_n() -> usize {
    3
}

fn default_lights() -> Vec<u32> {
    vec![1, 2, 3]
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_file")]
    pub file: String,
    /// Ignore readings after this time of day (HH:MM:SS)
    #[serde(default)]
    pub cutoff: Option<String>,
    #[serde(default)]
    pub on_malformed: MalformedPolicy,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { file: default_source_file(), cutoff: None, on_malformed: MalformedPolicy::Skip }
    }
}

fn default_source_file() -> String {
    "log.txt".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReportConfig {
    /// JSONL report file (disabled when absent)
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    /// Periodic metrics log interval (0 to disable)
    #[serde(default)]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    queue_capacity: usize,
    producers: usize,
    consumers: usize,
    producer_delay_ms: u64,
    consumer_delay_ms: u64,
    policy: PolicyKind,
    window_interval: Option<u64>,
    top_n: usize,
    lights: Vec<LightId>,
    source_file: String,
    cutoff: Option<String>,
    on_malformed: MalformedPolicy,
    report_file: Option<String>,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            producers: 1,
            consumers: 1,
            producer_delay_ms: default_producer_delay_ms(),
            consumer_delay_ms: 0,
            policy: PolicyKind::TimeBoundary,
            window_interval: None,
            top_n: default_top_n(),
            lights: default_lights().into_iter().map(LightId).collect(),
            source_file: default_source_file(),
            cutoff: None,
            on_malformed: MalformedPolicy::Skip,
            report_file: None,
            metrics_interval_secs: 0,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            queue_capacity: toml_config.queue.capacity,
            producers: toml_config.workers.producers,
            consumers: toml_config.workers.consumers,
            producer_delay_ms: toml_config.workers.producer_delay_ms,
            consumer_delay_ms: toml_config.workers.consumer_delay_ms,
            policy: toml_config.window.policy,
            window_interval: toml_config.window.interval,
            top_n: toml_config.ranking.top_n,
            lights: toml_config.ranking.lights.into_iter().map(LightId).collect(),
            source_file: toml_config.source.file,
            cutoff: toml_config.source.cutoff,
            on_malformed: toml_config.source.on_malformed,
            report_file: toml_config.report.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Check every option the pipeline depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.producers == 0 {
            return Err(ConfigError::NoProducers);
        }
        if self.consumers == 0 {
            return Err(ConfigError::NoConsumers);
        }
        if self.top_n == 0 {
            return Err(ConfigError::ZeroTopN);
        }
        let distinct = self.distinct_lights();
        if distinct == 0 {
            return Err(ConfigError::NoLights);
        }
        if self.top_n > distinct {
            return Err(ConfigError::TopNExceedsLights { top_n: self.top_n, lights: distinct });
        }
        self.window_policy()?;
        self.cutoff()?;
        Ok(())
    }

    /// Resolved window policy
    pub fn window_policy(&self) -> Result<WindowPolicy, ConfigError> {
        match self.policy {
            PolicyKind::TimeBoundary => Ok(WindowPolicy::TimeBoundary),
            PolicyKind::CountBoundary => {
                let interval = self.window_interval.ok_or(ConfigError::MissingWindowInterval)?;
                WindowPolicy::count(interval)
            }
        }
    }

    /// Parsed source cutoff, if configured
    pub fn cutoff(&self) -> Result<Option<chrono::NaiveTime>, ConfigError> {
        match &self.cutoff {
            None => Ok(None),
            Some(raw) => parse_timestamp(raw)
                .map(Some)
                .ok_or_else(|| ConfigError::InvalidCutoff(raw.clone())),
        }
    }

    /// Options for the line-oriented record source
    pub fn source_options(&self) -> Result<SourceOptions, ConfigError> {
        Ok(SourceOptions {
            cutoff: self.cutoff()?,
            on_malformed: self.on_malformed,
            known_lights: Some(self.lights.clone()),
        })
    }

    fn distinct_lights(&self) -> usize {
        let mut ids = self.lights.clone();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    // Getters for all config fields
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn producers(&self) -> usize {
        self.producers
    }

    pub fn consumers(&self) -> usize {
        self.consumers
    }

    pub fn producer_delay(&self) -> Duration {
        Duration::from_millis(self.producer_delay_ms)
    }

    pub fn consumer_delay(&self) -> Duration {
        Duration::from_millis(self.consumer_delay_ms)
    }

    pub fn policy(&self) -> PolicyKind {
        self.policy
    }

    pub fn window_interval(&self) -> Option<u64> {
        self.window_interval
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    pub fn lights(&self) -> &[LightId] {
        &self.lights
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn on_malformed(&self) -> MalformedPolicy {
        self.on_malformed
    }

    pub fn report_file(&self) -> Option<&str> {
        self.report_file.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    // Builder methods for command line overrides and tests
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_workers(mut self, producers: usize, consumers: usize) -> Self {
        self.producers = producers;
        self.consumers = consumers;
        self
    }

    pub fn with_delays(mut self, producer_ms: u64, consumer_ms: u64) -> Self {
        self.producer_delay_ms = producer_ms;
        self.consumer_delay_ms = consumer_ms;
        self
    }

    pub fn with_policy(mut self, policy: PolicyKind, interval: Option<u64>) -> Self {
        self.policy = policy;
        if interval.is_some() {
            self.window_interval = interval;
        }
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_lights(mut self, lights: &[u32]) -> Self {
        self.lights = lights.iter().copied().map(LightId).collect();
        self
    }

    pub fn with_source_file(mut self, file: &str) -> Self {
        self.source_file = file.to_string();
        self
    }

    pub fn with_cutoff(mut self, cutoff: Option<&str>) -> Self {
        self.cutoff = cutoff.map(str::to_string);
        self
    }

    pub fn with_report_file(mut self, file: Option<&str>) -> Self {
        self.report_file = file.map(str::to_string);
        self
    }

    pub fn with_metrics_interval_secs(mut self, secs: u64) -> Self {
        self.metrics_interval_secs = secs;
        self
    }
}
