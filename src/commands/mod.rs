//! CLI command implementations.
//!
//! Each command is implemented in its own module. The `run_*` functions work
//! on readers and writers; the `execute_*` functions open the files named by
//! their arguments and call them.

pub mod gil;
pub mod inject;
pub mod models;
pub mod offgil;
pub mod sched;
pub mod utils;

use crate::utils::error::TraceError;
use log::info;
use std::io;

// Re-export main command functions
pub use gil::{execute_gil, run_gil};
pub use inject::{execute_inject, run_inject};
pub use models::{GilArgs, InjectArgs, OffgilArgs, RunOutcome, SchedArgs};
pub use offgil::{execute_offgil, run_offgil};
pub use sched::{execute_sched, run_sched};
pub use utils::{display_version, open_input, validate_timeline_file, PhaseCounts};

/// Classify a failed write
///
/// A closed pipe is `Ok(())`: the caller stops and reports success. Anything
/// else is fatal.
pub(crate) fn closed_pipe(err: io::Error) -> Result<(), TraceError> {
    match TraceError::from_write(err) {
        TraceError::PipeClosed => {
            info!("Output closed, stopping early");
            Ok(())
        }
        other => Err(other),
    }
}
