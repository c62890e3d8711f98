//! Native stack processing.
//!
//! - `correlator`: splice Python frames from a snapshot into native stacks
//! - `collapse`: fold weighted stacks for flamegraphs

pub mod collapse;
pub mod correlator;

pub use collapse::{fold_frames, frame_symbol, write_collapsed, CollapsedStack, StackFolder};
pub use correlator::{
    correlate_stack, find_eval_slices, language_segments, render_frame, strip_above_marker,
    CorrelateOptions, CorrelatorConfig, StackCorrelator,
};
