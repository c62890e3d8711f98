//! GIL Trace Studio
//!
//! Timelines of where Python threads run, sleep and wait for the GIL.
//!
//! This crate provides the core implementation for the `gil-trace` CLI
//! tool. It reads `perf script` text (scheduler tracepoints and CPython GIL
//! uprobes) and a VizTracer snapshot, and produces:
//!
//! - Trace Event Format JSON with run/sleep segments and GIL hold flows
//! - a per-thread hold/wait/neither breakdown of the GIL
//! - `perf script` output with Python frames spliced into native stacks
//! - collapsed stacks and flamegraphs of time spent waiting for the GIL
//!
//! ## Getting Started
//!
//! ```bash
//! perf script --no-inline -i perf-sched.data | gil-trace sched -o sched.json
//! perf script --no-inline -i perf-gil.data | gil-trace gil -o gil.json
//! perf script --no-inline -i perf-sched.data \
//!     | gil-trace offgil --snapshot viztracer.json --flamegraph offgil.svg
//! ```

pub mod commands;
pub mod output;
pub mod parser;
pub mod snapshot;
pub mod stack;
pub mod timeline;
pub mod utils;
