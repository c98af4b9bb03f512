//! Pipeline - wires producers and consumers around one queue and one aggregator
//!
//! The pipeline owns the `BoundedQueue` and the `WindowAggregator`; workers run
//! on scoped threads and borrow them, so nothing outlives a run. Configuration
//! is validated in `new`, before any thread exists.

use crate::domain::error::{ConfigError, PipelineError};
use crate::domain::types::Event;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::report_sink::ReportSink;
use crate::io::source::Source;
use crate::services::bounded_queue::{BoundedQueue, QueueStats};
use crate::services::window::{WindowAggregator, WindowPolicy};
use crate::services::worker::{ConsumerWorker, ProducerWorker, WorkerContext};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Outcome of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Readings accepted by the queue
    pub events_produced: u64,
    /// Readings absorbed by the aggregator
    pub events_absorbed: u64,
    /// Reports emitted, including the end-of-stream one
    pub windows_reported: u64,
    /// Readings refused by a closed queue
    pub events_rejected: u64,
    /// Records the source dropped (malformed or past cutoff)
    pub records_skipped: u64,
    pub queue: QueueStats,
}

/// Concurrent bounded-queue aggregation pipeline
pub struct Pipeline {
    queue: BoundedQueue<Event>,
    aggregator: WindowAggregator,
    sink: Arc<dyn ReportSink>,
    metrics: Arc<Metrics>,
    producers: usize,
    consumers: usize,
    top_n: usize,
    producer_delay: Duration,
    consumer_delay: Duration,
    metrics_interval: Option<Duration>,
}

impl Pipeline {
    /// Validate `config` and build the shared queue and aggregator
    pub fn new(
        config: &Config,
        sink: Arc<dyn ReportSink>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = config.window_policy()?;

        let metrics_interval = match config.metrics_interval_secs() {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            queue: BoundedQueue::new(config.queue_capacity())?,
            aggregator: WindowAggregator::new(policy),
            sink,
            metrics,
            producers: config.producers(),
            consumers: config.consumers(),
            top_n: config.top_n(),
            producer_delay: config.producer_delay(),
            consumer_delay: config.consumer_delay(),
            metrics_interval,
        })
    }

    pub fn policy(&self) -> WindowPolicy {
        self.aggregator.policy()
    }

    /// Run to completion: drain `source`, report every window, shut down cleanly
    pub fn run<S: Source>(self, source: S) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        info!(
            producers = %self.producers,
            consumers = %self.consumers,
            capacity = %self.queue.capacity(),
            policy = %self.policy().as_str(),
            top_n = %self.top_n,
            "pipeline_started"
        );

        let ctx = WorkerContext::new(
            &self.queue,
            &self.aggregator,
            self.sink.as_ref(),
            self.metrics.as_ref(),
            source,
            self.top_n,
            self.producers,
            self.consumers,
        )
        .with_delays(self.producer_delay, self.consumer_delay);

        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let panicked = thread::scope(|scope| {
            let ctx = &ctx;

            let reporter = self.metrics_interval.map(|interval| {
                let metrics = self.metrics.as_ref();
                scope.spawn(move || loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => metrics.report().log(),
                        _ => break,
                    }
                })
            });

            let consumers: Vec<_> = (0..self.consumers)
                .map(|id| scope.spawn(move || ConsumerWorker::new(id, ctx).run()))
                .collect();
            let producers: Vec<_> = (0..self.producers)
                .map(|id| scope.spawn(move || ProducerWorker::new(id, ctx).run()))
                .collect();

            let mut panicked = 0usize;
            for handle in producers.into_iter().chain(consumers) {
                if handle.join().is_err() {
                    panicked += 1;
                }
            }

            drop(stop_tx);
            if let Some(reporter) = reporter {
                let _ = reporter.join();
            }
            panicked
        });

        let skipped = ctx.source.lock().rejected();
        self.metrics.record_records_skipped(skipped);

        // Every consumer has exited: the stream is over
        if let Some(snapshot) = self.aggregator.finish() {
            ctx.publish(&snapshot);
        }

        let summary = RunSummary {
            events_produced: self.metrics.events_produced(),
            events_absorbed: self.aggregator.absorbed(),
            windows_reported: self.metrics.windows_reported(),
            events_rejected: self.metrics.enqueue_rejected(),
            records_skipped: skipped,
            queue: self.queue.stats(),
        };

        info!(
            produced = %summary.events_produced,
            absorbed = %summary.events_absorbed,
            windows = %summary.windows_reported,
            rejected = %summary.events_rejected,
            skipped = %summary.records_skipped,
            queue_peak = %summary.queue.peak_depth,
            producer_waits = %summary.queue.producer_waits,
            consumer_waits = %summary.queue.consumer_waits,
            elapsed_ms = %started.elapsed().as_millis(),
            "pipeline_finished"
        );

        if panicked > 0 {
            error!(panicked = %panicked, "pipeline_workers_panicked");
            return Err(PipelineError::WorkerPanicked(panicked));
        }
        if let Some(e) = ctx.take_source_error() {
            return Err(PipelineError::Source(e));
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::SourceError;
    use crate::domain::types::{parse_timestamp, LightId, WindowKey};
    use crate::infra::config::PolicyKind;
    use crate::io::report_sink::MemorySink;
    use crate::io::source::IterSource;

    fn readings(specs: &[(&str, u32, u32)]) -> Vec<Event> {
        specs
            .iter()
            .enumerate()
            .map(|(i, (ts, light, count))| {
                Event::new(i as u64, parse_timestamp(ts).unwrap(), LightId(*light), *count)
            })
            .collect()
    }

    fn fast_config() -> Config {
        Config::default().with_delays(0, 0).with_queue_capacity(4)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(Metrics::new());

        let err = Pipeline::new(&fast_config().with_top_n(5), sink.clone(), metrics.clone());
        assert!(matches!(err, Err(ConfigError::TopNExceedsLights { .. })));

        let err = Pipeline::new(&fast_config().with_workers(1, 0), sink, metrics);
        assert!(matches!(err, Err(ConfigError::NoConsumers)));
    }

    #[test]
    fn test_time_boundary_run_reports_each_hour() {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(Metrics::new());
        let pipeline = Pipeline::new(&fast_config().with_top_n(2), sink.clone(), metrics).unwrap();

        let events = readings(&[
            ("09:58:00", 1, 5),
            ("09:58:00", 2, 9),
            ("09:58:00", 3, 9),
            ("09:59:30", 1, 3),
            ("10:00:05", 1, 1),
            ("10:00:05", 3, 4),
        ]);
        let summary = pipeline.run(IterSource::new(events)).unwrap();

        assert_eq!(summary.events_produced, 6);
        assert_eq!(summary.events_absorbed, 6);
        assert_eq!(summary.windows_reported, 2);

        let reports = sink.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].key, WindowKey::Hour(9));
        assert_eq!(reports[0].events, 4);
        let top: Vec<(u32, u64)> = reports[0].top.iter().map(|r| (r.light_id.0, r.count)).collect();
        assert_eq!(top, vec![(2, 9), (3, 9)]);

        assert_eq!(reports[1].key, WindowKey::Hour(10));
        assert!(reports[1].is_final);
        assert_eq!(reports[1].top[0].light_id, LightId(3));
    }

    #[test]
    fn test_count_boundary_run_with_final_partial_window() {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(Metrics::new());
        let config = fast_config().with_policy(PolicyKind::CountBoundary, Some(3));
        let pipeline = Pipeline::new(&config, sink.clone(), metrics).unwrap();

        let events = readings(&[
            ("12:00:00", 1, 10),
            ("12:00:00", 2, 20),
            ("12:00:00", 3, 30),
            ("12:05:00", 1, 11),
            ("12:05:00", 2, 21),
            ("12:05:00", 3, 31),
            ("12:10:00", 1, 50),
        ]);
        let summary = pipeline.run(IterSource::new(events)).unwrap();
        assert_eq!(summary.windows_reported, 3);

        let reports = sink.reports();
        assert_eq!(reports[2].key, WindowKey::Index(3));
        assert_eq!(reports[2].events, 1);
        assert!(reports[2].is_final);
        assert_eq!(reports[2].top[0].light_id, LightId(1));
        assert_eq!(reports[2].top[0].count, 50);
    }

    struct FailingSource {
        remaining: u32,
    }

    impl Source for FailingSource {
        fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
            if self.remaining == 0 {
                return Err(SourceError::Malformed { line: 3, reason: "truncated".to_string() });
            }
            self.remaining -= 1;
            Ok(Some(Event::new(0, parse_timestamp("08:00:00").unwrap(), LightId(1), 1)))
        }
    }

    #[test]
    fn test_source_failure_drains_then_errors() {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(Metrics::new());
        let pipeline =
            Pipeline::new(&fast_config().with_workers(2, 2), sink.clone(), metrics.clone()).unwrap();

        let result = pipeline.run(FailingSource { remaining: 2 });
        assert!(matches!(result, Err(PipelineError::Source(SourceError::Malformed { line: 3, .. }))));

        // Readings pulled before the failure were still absorbed and reported
        assert_eq!(metrics.events_absorbed(), 2);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.reports()[0].events, 2);
    }

    #[test]
    fn test_empty_source_reports_nothing() {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(Metrics::new());
        let pipeline = Pipeline::new(&fast_config().with_workers(3, 3), sink.clone(), metrics).unwrap();

        let summary = pipeline.run(IterSource::new(Vec::new())).unwrap();
        assert_eq!(summary.events_absorbed, 0);
        assert_eq!(summary.windows_reported, 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_metrics_reporter_thread_stops() {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(Metrics::new());
        let config = fast_config().with_metrics_interval_secs(1);
        let pipeline = Pipeline::new(&config, sink, metrics).unwrap();

        let events = readings(&[("08:00:00", 1, 1), ("08:00:01", 2, 2)]);
        let summary = pipeline.run(IterSource::new(events)).unwrap();
        assert_eq!(summary.events_absorbed, 2);
    }
}
