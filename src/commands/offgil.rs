//! Offgil command implementation.
//!
//! The offgil command:
//! 1. Runs the scheduler state machine to find sleeps spent waiting for the GIL
//! 2. Correlates the stack that sent each thread to sleep
//! 3. Optionally drops frames above the GIL acquire function
//! 4. Folds the stacks, weighted by sleep time, for flamegraph tools

use super::models::{OffgilArgs, RunOutcome};
use super::{closed_pipe, open_input};
use crate::output::{open_output, write_flamegraph};
use crate::parser::RecordStream;
use crate::snapshot::{load_snapshot, LanguageSnapshot};
use crate::stack::{
    strip_above_marker, write_collapsed, CollapsedStack, CorrelatorConfig, StackCorrelator,
    StackFolder,
};
use crate::timeline::{SchedOptions, SchedulerMachine};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::io::BufRead;
use std::time::Instant;

/// Execute the offgil command
///
/// **Public** - main entry point called from main.rs
pub fn execute_offgil(args: OffgilArgs) -> Result<RunOutcome> {
    let start_time = Instant::now();

    info!("Loading snapshot");
    let snapshot = load_snapshot(&args.snapshot)
        .with_context(|| format!("Failed to load snapshot {}", args.snapshot.display()))?;

    let input = open_input(args.input.as_deref())?;
    let (mut outcome, stacks) = run_offgil(input, &snapshot, &args)?;

    let output = open_output(args.output.as_deref()).context("Failed to open stack output")?;
    if let Err(e) = write_collapsed(&stacks, output) {
        closed_pipe(e)?;
        outcome.stopped_early = true;
    }

    if let Some(svg_path) = &args.flamegraph {
        if stacks.is_empty() {
            warn!("No {} sleeps found, skipping flamegraph", args.state);
        } else {
            write_flamegraph(&stacks, &args.flamegraph_config, svg_path)
                .context("Failed to write flamegraph SVG")?;
            info!("✓ Flamegraph written to: {}", svg_path.display());
        }
    }

    info!(
        "Offgil analysis completed in {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(outcome)
}

/// Collect weighted sleep stacks
///
/// Each sleep named `args.state` of a thread known to the snapshot adds its
/// correlated stack with the sleep duration (whole microseconds) as weight.
pub fn run_offgil<R, S>(
    reader: R,
    snapshot: &S,
    args: &OffgilArgs,
) -> Result<(RunOutcome, Vec<CollapsedStack>)>
where
    R: BufRead,
    S: LanguageSnapshot + ?Sized,
{
    let mut outcome = RunOutcome::default();
    let options = SchedOptions {
        skip_malformed: args.skip_malformed,
        ..SchedOptions::default()
    }
    .with_running(false)
    .with_sleeping(true);
    let lock_function = options.lock_acquire_function.clone();

    let mut machine = SchedulerMachine::new(options);
    let correlator = StackCorrelator::new(CorrelatorConfig::default(), args.correlate);
    let mut folder = StackFolder::new();

    for record in RecordStream::new(reader) {
        let record = record.context("Failed to read perf script input")?;
        outcome.records += 1;

        let emissions = machine
            .process_record(&record)
            .with_context(|| format!("Error for event: {}", record.header))?;

        for emission in emissions {
            let event = &emission.event;
            if event.name != args.state {
                continue;
            }
            let Some(tid) = event.thread_id() else {
                continue;
            };
            if !snapshot.contains_thread(tid) {
                debug!("Thread {} is not in the snapshot, skipping its sleep", tid);
                continue;
            }

            let mut stack = correlator
                .correlate(&emission.stack, snapshot, tid, event.ts)
                .with_context(|| format!("Error for event: {}", record.header))?;
            if args.strip_take_gil {
                stack = strip_above_marker(&stack, &lock_function);
            }

            // Whole microseconds, truncated
            let weight = event.dur.unwrap_or(0.0).max(0.0) as u64;
            folder.add(&stack, weight);
            outcome.emitted += 1;
        }
    }

    info!(
        "Collected {} {} sleeps from {} records",
        outcome.emitted, args.state, outcome.records
    );
    Ok((outcome, folder.finish()))
}
