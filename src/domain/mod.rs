//! Domain models - core value types and error taxonomy
//!
//! This module contains the canonical data types used throughout the system:
//! - `Event` - one immutable sensor reading
//! - `LightId` - traffic light identifier
//! - `WindowSnapshot` / `WindowReport` - closed-window tables and ranked reports
//! - `error` - queue, source, configuration and pipeline errors

pub mod error;
pub mod types;

// Re-export commonly used types at module level
pub use error::{ClosedQueueError, ConfigError, PipelineError, SourceError};
pub use types::{Event, LightId, RankedLight, WindowKey, WindowReport, WindowSnapshot};
