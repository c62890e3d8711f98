//! Gil command implementation.
//!
//! Turns GIL uprobe hits into hold/wait flows on the timeline and reports how
//! much of its life each thread spent holding, waiting for, or not needing
//! the GIL.

use super::models::{GilArgs, RunOutcome};
use super::utils::is_stdout;
use super::{closed_pipe, open_input};
use crate::output::{open_output, write_summary, TraceEventWriter};
use crate::parser::{DecodedHeader, HeaderLines};
use crate::timeline::{GilConfig, GilMachine, GilSummary};
use anyhow::{Context, Result};
use log::{info, warn};
use std::io::{self, BufRead, Write};

/// Execute the gil command
///
/// **Public** - main entry point called from main.rs
pub fn execute_gil(args: GilArgs) -> Result<(RunOutcome, GilSummary)> {
    let input = open_input(args.input.as_deref())?;
    let output = open_output(args.output.as_deref()).context("Failed to open timeline output")?;

    let (outcome, summary) = run_gil(input, output, &args.config, args.skip_malformed)?;

    // Keep stdout clean when the timeline goes there
    if is_stdout(args.output.as_deref()) {
        print_summary(&summary, io::stderr().lock())?;
    } else {
        print_summary(&summary, io::stdout().lock())?;
    }

    if let Some(path) = &args.summary_json {
        write_summary(&summary, path).context("Failed to write GIL summary")?;
        info!("✓ Summary written to: {}", path.display());
    }

    Ok((outcome, summary))
}

/// Print the summary table, a closed pipe is not an error
fn print_summary<W: Write>(summary: &GilSummary, mut writer: W) -> Result<()> {
    if let Err(e) = writeln!(writer, "{}", summary).and_then(|_| writer.flush()) {
        closed_pipe(e)?;
    }
    Ok(())
}

/// Convert a GIL probe stream into timeline JSON plus a summary
///
/// The summary is computed even when the output pipe closes early, over the
/// lines read until then.
pub fn run_gil<R: BufRead, W: Write>(
    reader: R,
    writer: W,
    config: &GilConfig,
    skip_malformed: bool,
) -> Result<(RunOutcome, GilSummary)> {
    let mut outcome = RunOutcome::default();
    let mut machine = GilMachine::new(config.clone());

    let mut timeline = match TraceEventWriter::new(writer) {
        Ok(timeline) => Some(timeline),
        Err(e) => {
            closed_pipe(e)?;
            outcome.stopped_early = true;
            None
        }
    };

    if let Some(timeline) = timeline.as_mut() {
        for line in HeaderLines::new(reader) {
            let line = line.context("Failed to read perf script input")?;
            outcome.records += 1;

            let header = match DecodedHeader::parse(&line) {
                Ok(header) => header,
                Err(e) if skip_malformed => {
                    warn!("Skipping line: {}", e);
                    continue;
                }
                Err(e) => return Err(e).with_context(|| format!("Error for event: {}", line)),
            };

            let mut closed = false;
            for event in machine.process(&header) {
                if let Err(e) = timeline.write_event(&event) {
                    closed_pipe(e)?;
                    closed = true;
                    break;
                }
                outcome.emitted += 1;
            }
            if closed {
                outcome.stopped_early = true;
                break;
            }
        }
    }

    if let (Some(timeline), false) = (timeline, outcome.stopped_early) {
        if let Err(e) = timeline.finish() {
            closed_pipe(e)?;
            outcome.stopped_early = true;
        }
    }

    if !machine.anomalies().is_empty() {
        warn!(
            "{} GIL anomalies seen, the capture may have started mid-hold",
            machine.anomalies().len()
        );
    }
    info!(
        "Converted {} probe hits into {} events",
        outcome.records, outcome.emitted
    );
    Ok((outcome, machine.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::ThreadLockStats;

    struct FailingWriter(io::ErrorKind);

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(self.0, "write failed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(self.0, "flush failed"))
        }
    }

    fn summary() -> GilSummary {
        GilSummary {
            version: "1.0.0".to_string(),
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            anomalies: 0,
            threads: vec![ThreadLockStats::new(7, 20.0, 8.0, 4.0)],
        }
    }

    #[test]
    fn test_print_summary_writes_table() {
        let mut out = Vec::<u8>::new();
        print_summary(&summary(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Summary of threads:"));
    }

    #[test]
    fn test_print_summary_closed_pipe() {
        assert!(print_summary(&summary(), FailingWriter(io::ErrorKind::BrokenPipe)).is_ok());
        assert!(print_summary(&summary(), FailingWriter(io::ErrorKind::PermissionDenied)).is_err());
    }
}
