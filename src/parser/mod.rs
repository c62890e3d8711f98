//! Trace parsing and schema definitions.
//!
//! This module handles:
//! - Framing raw perf script text into records
//! - Decoding header lines (two historical layouts)
//! - Classifying scheduler events
//! - Defining the timeline output schema

pub mod events;
pub mod header;
pub mod sched_event;
pub mod schema;

// Re-export main types
pub use events::{HeaderLines, RawRecord, RecordStream};
pub use header::DecodedHeader;
pub use sched_event::SchedEvent;
pub use schema::{Phase, TimelineEvent, TraceDocument, TrackId};
