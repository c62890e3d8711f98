//! Language-level call-tree snapshots.
//!
//! The correlator only sees the [`LanguageSnapshot`] trait; VizTracer JSON is
//! the one source we load today.

pub mod tree;
pub mod viztracer;

pub use tree::{call_chain, CallSpan, CallTreeSnapshot, FrameId, LanguageSnapshot, SnapshotFrame};
pub use viztracer::{load_snapshot, parse_snapshot};
