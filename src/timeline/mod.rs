//! State machines turning decoded events into timeline events.
//!
//! - `scheduler`: per-thread run/sleep segments from `sched:*` tracepoints
//! - `gil`: GIL hold/wait segments and statistics from CPython uprobes

pub mod gil;
pub mod scheduler;

pub use gil::{GilConfig, GilMachine, GilProbe, GilSummary, ProbePatterns, ThreadLockStats};
pub use scheduler::{Emission, SchedOptions, SchedulerMachine, ThreadRunState};
