use crate::output::read_trace_document;
use crate::utils::config::SCHEMA_VERSION;
use anyhow::{Context, Result};
use log::debug;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Event counts of a timeline, keyed by phase letter
pub type PhaseCounts = BTreeMap<&'static str, usize>;

/// Open a file, or stdin for `None` and `-`
pub fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(path) if path != Path::new("-") => {
            debug!("Reading input from {}", path.display());
            let file = File::open(path)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        _ => {
            debug!("Reading input from stdin");
            Ok(Box::new(BufReader::new(io::stdin())))
        }
    }
}

/// Whether an output path means stdout
pub fn is_stdout(path: Option<&Path>) -> bool {
    path.map_or(true, |p| p == Path::new("-"))
}

/// Validate a timeline JSON file
pub fn validate_timeline_file(file_path: &Path) -> Result<PhaseCounts> {
    println!("Validating timeline: {}", file_path.display());

    let document = read_trace_document(file_path)
        .with_context(|| format!("{} is not a valid timeline", file_path.display()))?;

    let mut counts = PhaseCounts::new();
    for event in &document.trace_events {
        *counts.entry(event.ph.code()).or_insert(0) += 1;
    }

    println!("✓ Valid timeline JSON");
    println!("  Events: {}", document.trace_events.len());
    for (phase, count) in &counts {
        println!("  ph={}: {}", phase, count);
    }

    Ok(counts)
}

/// Display version information
pub fn display_version() {
    println!("GIL Trace Studio v{}", env!("CARGO_PKG_VERSION"));
    println!("Summary Schema: v{}", SCHEMA_VERSION);
    println!();
    println!("Scheduler, GIL and Python call-stack timelines from perf and VizTracer.");
}
