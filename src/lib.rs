// src/lib.rs
//! Streaming classifier for access-style logs.
//!
//! Lines are read one at a time, classified by their embedded HTTP status
//! code, counted, and the error lines are appended to an output file. A
//! [`Summary`] is produced only after that file is confirmed on stable storage.

pub mod classifier;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod summary;

pub use error::*;

pub use classifier::{Category, Classification, Classifier, DEFAULT_STATUS_PATTERN};
pub use pipeline::aggregator::{Aggregator, Counters, OutputRecord, Route};
pub use pipeline::config::{ErrorStrategy, OpenMode, PipelineConfig};
pub use pipeline::state::PipelineState;
pub use pipeline::stream::LogPipeline;
pub use sink::{Capacity, CommitReceipt, DurableWrite, PendingCommit, ResultSink};
pub use source::{LineSource, RawLine, SourceLine};
pub use summary::{Summary, SummaryReporter, TracingReporter};
pub use tokio_util::sync::CancellationToken;
