//! Producer and consumer workers
//!
//! Producers pull readings from the shared source and push them into the
//! bounded queue. Consumers pop readings, absorb them into the window
//! aggregator and publish a ranked report whenever a window closes.
//!
//! Shutdown handshake: each side keeps a count of live workers. The last
//! producer to leave closes the queue, so consumers drain what is left and
//! then see `None`. The last consumer to leave closes it as well, which only
//! matters if consumers died early: blocked producers then get
//! `ClosedQueueError` instead of waiting forever. Both decrements run from drop
//! guards so a panicking worker still counts down.

use crate::domain::error::{ClosedQueueError, SourceError};
use crate::domain::types::{Event, WindowSnapshot};
use crate::infra::metrics::Metrics;
use crate::io::report_sink::ReportSink;
use crate::io::source::Source;
use crate::services::bounded_queue::BoundedQueue;
use crate::services::ranker;
use crate::services::window::WindowAggregator;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Everything a worker borrows from the running pipeline
pub(crate) struct WorkerContext<'a, S> {
    pub queue: &'a BoundedQueue<Event>,
    pub aggregator: &'a WindowAggregator,
    pub sink: &'a dyn ReportSink,
    pub metrics: &'a Metrics,
    pub source: Mutex<S>,
    pub top_n: usize,
    pub producer_delay: Duration,
    pub consumer_delay: Duration,
    producers_left: AtomicUsize,
    consumers_left: AtomicUsize,
    /// Set once the source fails; remaining producers stop pulling
    source_failed: AtomicBool,
    source_error: Mutex<Option<SourceError>>,
}

impl<'a, S: Source> WorkerContext<'a, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: &'a BoundedQueue<Event>,
        aggregator: &'a WindowAggregator,
        sink: &'a dyn ReportSink,
        metrics: &'a Metrics,
        source: S,
        top_n: usize,
        producers: usize,
        consumers: usize,
    ) -> Self {
        Self {
            queue,
            aggregator,
            sink,
            metrics,
            source: Mutex::new(source),
            top_n,
            producer_delay: Duration::ZERO,
            consumer_delay: Duration::ZERO,
            producers_left: AtomicUsize::new(producers),
            consumers_left: AtomicUsize::new(consumers),
            source_failed: AtomicBool::new(false),
            source_error: Mutex::new(None),
        }
    }

    pub fn with_delays(mut self, producer_delay: Duration, consumer_delay: Duration) -> Self {
        self.producer_delay = producer_delay;
        self.consumer_delay = consumer_delay;
        self
    }

    /// Rank a closed window and hand it to the sink
    pub fn publish(&self, snapshot: &WindowSnapshot) {
        let report = ranker::rank_snapshot(snapshot, self.top_n);
        self.sink.emit(&report);
        self.metrics.record_window_reported();
        debug!(window = %report.key, events = %report.events, "window_reported");
    }

    /// First source error seen during the run, if any
    pub fn take_source_error(&self) -> Option<SourceError> {
        self.source_error.lock().take()
    }

    fn record_source_error(&self, error: SourceError) {
        self.source_failed.store(true, Ordering::Release);
        let mut slot = self.source_error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}

/// Counts a producer out on drop; the last one closes the queue
struct ProducerExit<'c, 'a, S> {
    ctx: &'c WorkerContext<'a, S>,
    id: usize,
}

impl<S> Drop for ProducerExit<'_, '_, S> {
    fn drop(&mut self) {
        let remaining = self.ctx.producers_left.fetch_sub(1, Ordering::AcqRel) - 1;
        if thread::panicking() {
            error!(producer = %self.id, "producer_panicked");
        }
        if remaining == 0 {
            self.ctx.queue.close();
            info!(producer = %self.id, "queue_closed_by_last_producer");
        }
    }
}

/// Counts a consumer out on drop; the last one closes the queue
struct ConsumerExit<'c, 'a, S> {
    ctx: &'c WorkerContext<'a, S>,
    id: usize,
}

impl<S> Drop for ConsumerExit<'_, '_, S> {
    fn drop(&mut self) {
        let remaining = self.ctx.consumers_left.fetch_sub(1, Ordering::AcqRel) - 1;
        if thread::panicking() {
            error!(consumer = %self.id, "consumer_panicked");
        }
        if remaining == 0 && !self.ctx.queue.is_closed() {
            warn!(consumer = %self.id, "queue_closed_by_last_consumer");
            self.ctx.queue.close();
        }
    }
}

/// Moves readings from the source into the queue
pub(crate) struct ProducerWorker<'c, 'a, S> {
    id: usize,
    ctx: &'c WorkerContext<'a, S>,
}

impl<'c, 'a, S: Source> ProducerWorker<'c, 'a, S> {
    pub fn new(id: usize, ctx: &'c WorkerContext<'a, S>) -> Self {
        Self { id, ctx }
    }

    /// Run until the source is exhausted, fails, or the queue refuses items
    pub fn run(self) -> u64 {
        let ctx = self.ctx;
        let _exit = ProducerExit { ctx, id: self.id };
        let mut produced = 0u64;
        debug!(producer = %self.id, "producer_started");

        while !ctx.source_failed.load(Ordering::Acquire) {
            // Hold the source lock only while pulling, never across enqueue
            let next = ctx.source.lock().next_event();
            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(e) => {
                    error!(producer = %self.id, error = %e, "source_failed");
                    ctx.metrics.record_source_error();
                    ctx.record_source_error(e);
                    break;
                }
            };

            let sequence = event.sequence;
            let wait_start = Instant::now();
            match ctx.queue.enqueue(event) {
                Ok(()) => {
                    let wait_us = wait_start.elapsed().as_micros() as u64;
                    ctx.metrics.record_enqueued(wait_us, ctx.queue.len());
                    produced += 1;
                }
                Err(ClosedQueueError(_)) => {
                    error!(producer = %self.id, sequence = %sequence, "enqueue_on_closed_queue");
                    ctx.metrics.record_enqueue_rejected();
                    break;
                }
            }

            if !ctx.producer_delay.is_zero() {
                thread::sleep(ctx.producer_delay);
            }
        }

        debug!(producer = %self.id, produced = %produced, "producer_stopped");
        produced
    }
}

/// Drains the queue into the aggregator and publishes closed windows
pub(crate) struct ConsumerWorker<'c, 'a, S> {
    id: usize,
    ctx: &'c WorkerContext<'a, S>,
}

impl<'c, 'a, S: Source> ConsumerWorker<'c, 'a, S> {
    pub fn new(id: usize, ctx: &'c WorkerContext<'a, S>) -> Self {
        Self { id, ctx }
    }

    /// Run until the queue is closed and empty
    pub fn run(self) -> u64 {
        let ctx = self.ctx;
        let _exit = ConsumerExit { ctx, id: self.id };
        let mut absorbed = 0u64;
        debug!(consumer = %self.id, "consumer_started");

        loop {
            let wait_start = Instant::now();
            let Some(event) = ctx.queue.dequeue() else {
                break;
            };
            let wait_us = wait_start.elapsed().as_micros() as u64;
            ctx.metrics.record_dequeued(wait_us, ctx.queue.len());

            // Publish under the aggregator lock so sinks see windows in closure order
            ctx.aggregator.absorb_with(event, |snapshot| ctx.publish(snapshot));
            ctx.metrics.record_absorbed();
            absorbed += 1;

            if !ctx.consumer_delay.is_zero() {
                thread::sleep(ctx.consumer_delay);
            }
        }

        debug!(consumer = %self.id, absorbed = %absorbed, "consumer_stopped");
        absorbed
    }
}
