//! Output writers for timelines, summaries and flamegraphs.
//!
//! This module handles writing data in various formats:
//! - Trace Event JSON (streamed or whole documents)
//! - GIL summary JSON
//! - Collapsed stacks and SVG flamegraphs

pub mod json;
pub mod summary;
pub mod svg;

use crate::utils::error::OutputError;
use log::debug;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

// Re-export main functions
pub use json::{read_trace_document, write_trace_document, TraceEventWriter};
pub use summary::{read_summary, write_summary};
pub use svg::{render_flamegraph, write_flamegraph, FlamegraphConfig};

/// Validate that output path is writable
pub(crate) fn validate_output_path(path: &Path) -> Result<(), OutputError> {
    if path.as_os_str().is_empty() {
        return Err(OutputError::InvalidPath("Path is empty".to_string()));
    }

    // Check if we're trying to overwrite a directory
    if path.is_dir() {
        return Err(OutputError::InvalidPath(format!(
            "Path is a directory: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Create a file for writing, making parent directories as needed
pub fn create_output_file(path: &Path) -> Result<BufWriter<File>, OutputError> {
    validate_output_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("Creating parent directories: {}", parent.display());
            std::fs::create_dir_all(parent).map_err(|e| {
                OutputError::InvalidPath(format!(
                    "Cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let file = File::create(path).map_err(OutputError::WriteFailed)?;
    Ok(BufWriter::new(file))
}

/// Open a file, or stdout for `None` and `-`
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, OutputError> {
    match path {
        Some(path) if path != Path::new("-") => {
            debug!("Writing output to {}", path.display());
            Ok(Box::new(create_output_file(path)?))
        }
        _ => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
    }
}

/// Size of a written file, 0 if unknown
pub(crate) fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
