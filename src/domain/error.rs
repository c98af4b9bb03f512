//! Error taxonomy
//!
//! End of stream is not an error: sources return `Ok(None)` and the queue
//! returns `None` from `dequeue` once closed and drained.

use crate::domain::types::LightId;
use thiserror::Error;

/// Returned by `BoundedQueue::enqueue` after `close()`; carries the rejected item
#[derive(Debug, Error, PartialEq, Eq)]
#[error("enqueue on closed queue")]
pub struct ClosedQueueError<T>(pub T);

impl<T> ClosedQueueError<T> {
    /// Recover the item that could not be enqueued
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Raised by sources; never seen inside the core
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record at line {line}: {reason}")]
    Malformed { line: u64, reason: String },
    #[error("unknown traffic light {light} at line {line}")]
    UnknownLight { line: u64, light: LightId },
}

/// Invalid configuration, surfaced before any worker is spawned
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("queue capacity must be positive")]
    ZeroCapacity,
    #[error("producer count must be positive")]
    NoProducers,
    #[error("consumer count must be positive")]
    NoConsumers,
    #[error("top_n must be positive")]
    ZeroTopN,
    #[error("at least one traffic light must be configured")]
    NoLights,
    #[error("top_n {top_n} exceeds the {lights} known traffic lights")]
    TopNExceedsLights { top_n: usize, lights: usize },
    #[error("count-boundary policy requires a window interval")]
    MissingWindowInterval,
    #[error("window interval must be positive")]
    ZeroWindowInterval,
    #[error("invalid cutoff timestamp {0:?}, expected HH:MM:SS")]
    InvalidCutoff(String),
}

/// Failure of a whole pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("source failed: {0}")]
    Source(#[from] SourceError),
    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),
}
