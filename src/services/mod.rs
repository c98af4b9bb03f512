//! Services - the concurrent aggregation core
//!
//! This module contains the pipeline and the pieces it wires together:
//! - `bounded_queue` - blocking, closable FIFO between producers and consumers
//! - `window` - windowed aggregation and boundary detection
//! - `ranker` - deterministic top-N ranking of closed windows
//! - `worker` - producer and consumer worker loops and shutdown handshake
//! - `pipeline` - worker lifecycle and reporting

pub mod bounded_queue;
pub mod pipeline;
pub mod ranker;
pub mod window;
pub(crate) mod worker;

// Re-export commonly used types
pub use bounded_queue::{BoundedQueue, QueueStats};
pub use pipeline::{Pipeline, RunSummary};
pub use ranker::{rank, rank_snapshot};
pub use window::{WindowAggregator, WindowPolicy};
