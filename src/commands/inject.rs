//! Inject command implementation.
//!
//! Re-emits a `perf script` stream with the Python call chain spliced into
//! every stack of a thread the snapshot knows about. The result can be fed to
//! any tool that reads `perf script` output.

use super::models::{InjectArgs, RunOutcome};
use super::{closed_pipe, open_input};
use crate::output::open_output;
use crate::parser::{DecodedHeader, RecordStream};
use crate::snapshot::{load_snapshot, LanguageSnapshot};
use crate::stack::{CorrelatorConfig, StackCorrelator};
use anyhow::{Context, Result};
use log::info;
use std::io::{self, BufRead, Write};

/// Execute the inject command
///
/// **Public** - main entry point called from main.rs
pub fn execute_inject(args: InjectArgs) -> Result<RunOutcome> {
    info!("Loading snapshot");
    let snapshot = load_snapshot(&args.snapshot)
        .with_context(|| format!("Failed to load snapshot {}", args.snapshot.display()))?;

    let input = open_input(args.input.as_deref())?;
    let output = open_output(args.output.as_deref()).context("Failed to open stack output")?;
    let correlator = StackCorrelator::new(CorrelatorConfig::default(), args.correlate);

    run_inject(input, output, &snapshot, &correlator)
}

/// Correlate every stack in a record stream
///
/// Records of threads missing from the snapshot pass through unchanged.
///
/// # Errors
/// * Unreadable input or an undecodable header
/// * `CorrelationError::Mismatch` from the correlator
/// * Output failures other than a closed pipe
pub fn run_inject<R, W, S>(
    reader: R,
    mut writer: W,
    snapshot: &S,
    correlator: &StackCorrelator,
) -> Result<RunOutcome>
where
    R: BufRead,
    W: Write,
    S: LanguageSnapshot + ?Sized,
{
    let mut outcome = RunOutcome::default();

    for record in RecordStream::new(reader) {
        let record = record.context("Failed to read perf script input")?;
        outcome.records += 1;

        let header = DecodedHeader::parse(&record.header)
            .with_context(|| format!("Error for event: {}", record.header))?;

        let frames = if snapshot.contains_thread(header.thread_id) {
            outcome.emitted += 1;
            correlator
                .correlate(&record.frames, snapshot, header.thread_id, header.timestamp_us)
                .with_context(|| format!("Error for event: {}", record.header))?
        } else {
            record.frames
        };

        if let Err(e) = write_record(&mut writer, &record.header, &frames) {
            closed_pipe(e)?;
            outcome.stopped_early = true;
            return Ok(outcome);
        }
    }

    if let Err(e) = writer.flush() {
        closed_pipe(e)?;
        outcome.stopped_early = true;
    }

    info!(
        "Correlated {} of {} stacks",
        outcome.emitted, outcome.records
    );
    Ok(outcome)
}

/// Header, tab-indented frames, blank line
fn write_record<W: Write>(writer: &mut W, header: &str, frames: &[String]) -> io::Result<()> {
    writeln!(writer, "{}", header)?;
    for frame in frames {
        writeln!(writer, "\t{}", frame)?;
    }
    writeln!(writer)
}
