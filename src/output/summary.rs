//! GIL summary JSON output.

use super::{create_output_file, file_size};
use crate::timeline::GilSummary;
use crate::utils::error::OutputError;
use log::{debug, info};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Write the per-thread GIL breakdown as pretty JSON
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::InvalidPath` - Path cannot be created or is invalid
pub fn write_summary(summary: &GilSummary, output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    info!("Writing GIL summary to: {}", output_path.display());

    let mut writer = create_output_file(output_path)?;
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.flush()?;

    info!(
        "Summary written successfully ({} bytes)",
        file_size(output_path)
    );
    Ok(())
}

pub fn read_summary(input_path: impl AsRef<Path>) -> Result<GilSummary, OutputError> {
    let input_path = input_path.as_ref();
    debug!("Reading GIL summary from: {}", input_path.display());

    let file = File::open(input_path)?;
    Ok(serde_json::from_reader(file)?)
}
