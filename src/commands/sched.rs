//! Sched command implementation.
//!
//! The sched command:
//! 1. Frames `perf script` output into records
//! 2. Runs the scheduler state machine over them
//! 3. Streams run/sleep segments as timeline JSON

use super::models::{RunOutcome, SchedArgs};
use super::{closed_pipe, open_input};
use crate::output::{open_output, TraceEventWriter};
use crate::parser::RecordStream;
use crate::timeline::{SchedOptions, SchedulerMachine};
use anyhow::{Context, Result};
use log::{debug, info};
use std::io::{BufRead, Write};
use std::time::Instant;

/// Execute the sched command
///
/// **Public** - main entry point called from main.rs
pub fn execute_sched(args: SchedArgs) -> Result<RunOutcome> {
    let start_time = Instant::now();

    let input = open_input(args.input.as_deref())?;
    let output = open_output(args.output.as_deref()).context("Failed to open timeline output")?;

    let outcome = run_sched(input, output, &args.options)?;

    info!(
        "Sched conversion completed in {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(outcome)
}

/// Convert a scheduler event stream into timeline JSON
///
/// # Errors
/// * Unreadable input
/// * A header that cannot be decoded, unless `skip_malformed` is set
/// * Output failures other than a closed pipe
pub fn run_sched<R: BufRead, W: Write>(
    reader: R,
    writer: W,
    options: &SchedOptions,
) -> Result<RunOutcome> {
    let mut outcome = RunOutcome::default();
    let mut machine = SchedulerMachine::new(options.clone());

    let mut timeline = match TraceEventWriter::new(writer) {
        Ok(timeline) => timeline,
        Err(e) => {
            closed_pipe(e)?;
            outcome.stopped_early = true;
            return Ok(outcome);
        }
    };

    for record in RecordStream::new(reader) {
        let record = record.context("Failed to read perf script input")?;
        outcome.records += 1;

        let emissions = machine
            .process_record(&record)
            .with_context(|| format!("Error for event: {}", record.header))?;

        for emission in emissions {
            if let Err(e) = timeline.write_event(&emission.event) {
                closed_pipe(e)?;
                outcome.stopped_early = true;
                return Ok(outcome);
            }
            outcome.emitted += 1;
        }
    }

    if let Err(e) = timeline.finish() {
        closed_pipe(e)?;
        outcome.stopped_early = true;
    }

    if machine.history_gaps() > 0 {
        debug!(
            "{} switch events dropped for threads never seen running",
            machine.history_gaps()
        );
    }
    info!(
        "Converted {} records into {} events",
        outcome.records, outcome.emitted
    );
    Ok(outcome)
}
