//! Trace Event JSON writer.
//!
//! Events are streamed in emission order so long captures never sit in
//! memory; the whole-document helpers are for small files and tests.

use super::{create_output_file, file_size};
use crate::parser::{TimelineEvent, TraceDocument};
use crate::utils::error::OutputError;
use log::{debug, info};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;

/// Streams `{"traceEvents": [...]}` one event at a time
///
/// **Public** - used by every converter command
///
/// The opening bracket is written on construction, the closing one by
/// [`TraceEventWriter::finish`]. Dropping the writer without finishing leaves
/// a truncated document.
pub struct TraceEventWriter<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> TraceEventWriter<W> {
    pub fn new(mut writer: W) -> io::Result<Self> {
        writer.write_all(b"{\"traceEvents\": [")?;
        Ok(Self { writer, written: 0 })
    }

    pub fn write_event(&mut self, event: &TimelineEvent) -> io::Result<()> {
        let separator: &[u8] = if self.written == 0 { b"\n  " } else { b",\n  " };
        self.writer.write_all(separator)?;
        serde_json::to_writer(&mut self.writer, event)?;
        self.written += 1;
        Ok(())
    }

    pub fn write_all<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a TimelineEvent>,
    ) -> io::Result<()> {
        for event in events {
            self.write_event(event)?;
        }
        Ok(())
    }

    /// Events written so far
    pub fn written(&self) -> usize {
        self.written
    }

    /// Close the document and hand back the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.write_all(b"\n]}\n")?;
        self.writer.flush()?;
        debug!("Closed trace document with {} events", self.written);
        Ok(self.writer)
    }
}

/// Write a whole document to a file
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::InvalidPath` - Path cannot be created or is invalid
pub fn write_trace_document(
    document: &TraceDocument,
    output_path: impl AsRef<Path>,
) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    info!("Writing timeline to: {}", output_path.display());

    let mut writer = create_output_file(output_path)?;
    serde_json::to_writer(&mut writer, document)?;
    writer.flush()?;

    info!(
        "Timeline written successfully ({} events, {} bytes)",
        document.trace_events.len(),
        file_size(output_path)
    );
    Ok(())
}

/// Read a timeline document from a JSON file
///
/// # Errors
/// * `OutputError::WriteFailed` - File read error (reusing WriteFailed for I/O)
/// * `OutputError::SerializationFailed` - JSON parse error
pub fn read_trace_document(input_path: impl AsRef<Path>) -> Result<TraceDocument, OutputError> {
    let input_path = input_path.as_ref();
    debug!("Reading timeline from: {}", input_path.display());

    let file = File::open(input_path)?;
    let document: TraceDocument = serde_json::from_reader(BufReader::new(file))?;

    debug!("Timeline loaded: {} events", document.trace_events.len());
    Ok(document)
}
