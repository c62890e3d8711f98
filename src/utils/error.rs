//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.

use thiserror::Error;

/// Errors that can occur while reading and decoding perf script text
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed header `{header}`: {reason}")]
    MalformedHeader { header: String, reason: String },

    #[error("Failed to read event stream: {0}")]
    Io(#[from] std::io::Error),
}

impl ParseError {
    pub(crate) fn malformed(header: &str, reason: impl Into<String>) -> Self {
        Self::MalformedHeader {
            header: header.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while loading a VizTracer snapshot
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to read snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),
}

/// Native and Python stacks could not be spliced together
#[derive(Error, Debug)]
pub enum CorrelationError {
    #[error(
        "Stack traces could not be matched for thread {thread_id} at {timestamp_us}us: \
         {native_slices} eval-loop slice(s) in the native stack vs \
         {language_segments} Python segment(s) (use --allow-mismatch to keep going)"
    )]
    Mismatch {
        thread_id: u32,
        timestamp_us: f64,
        native_slices: usize,
        language_segments: usize,
    },
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),

    #[error("Failed to render flamegraph: {0}")]
    Flamegraph(String),
}

/// Errors that end a conversion pass
#[derive(Error, Debug)]
pub enum TraceError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    #[error("Failed to write output: {0}")]
    Output(std::io::Error),

    /// The consumer of our output went away; not a failure.
    #[error("Output pipe closed")]
    PipeClosed,
}

impl TraceError {
    /// Classify a write failure, a closed pipe stops the pass gracefully
    pub fn from_write(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::BrokenPipe {
            Self::PipeClosed
        } else {
            Self::Output(err)
        }
    }
}

/// Non-fatal inconsistencies in a capture, reported and then recovered from
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Anomaly {
    #[error(
        "thread {holder} already seems to hold the GIL, {overlap_us} us overlap with {thread_id}"
    )]
    LockOwnershipOverlap {
        holder: u32,
        thread_id: u32,
        overlap_us: f64,
    },

    #[error("thread {thread_id} drops the GIL but never took it (maybe we missed it at capture start?)")]
    DropWithoutTake { thread_id: u32 },

    #[error("thread {thread_id} switched out at {timestamp_us}us without being seen running")]
    SchedulingHistoryGap { thread_id: u32, timestamp_us: f64 },
}
