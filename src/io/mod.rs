//! IO modules - collaborators at the edges of the pipeline
//!
//! This module contains the external interfaces:
//! - `source` - reading sources (line-oriented record files, in-memory iterators)
//! - `report_sink` - report destinations (structured log, JSONL file, memory)

pub mod report_sink;
pub mod source;

// Re-export commonly used types
pub use report_sink::{FanoutSink, JsonlSink, LogSink, MemorySink, ReportSink};
pub use source::{IterSource, LineSource, MalformedPolicy, Source, SourceOptions};
