//! VizTracer JSON loader.
//!
//! Reads `{"traceEvents": [...]}` and builds a [`CallTreeSnapshot`] from the
//! complete (`ph: "X"`) events. Everything else only contributes to the time
//! origin.

use super::tree::{CallSpan, CallTreeSnapshot};
use crate::utils::error::SnapshotError;
use log::{debug, info, warn};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// `func (file:line)`, the shape VizTracer gives interpreted frames
const INTERPRETED_NAME_PATTERN: &str = r"^(.*) \((.*):([0-9]+)\)$";

/// One event as VizTracer writes it
#[derive(Debug, Deserialize)]
struct SnapshotEvent {
    #[serde(default)]
    ph: Option<String>,
    #[serde(default)]
    ts: Option<f64>,
    #[serde(default)]
    dur: Option<f64>,
    #[serde(default)]
    pid: Option<Value>,
    #[serde(default)]
    tid: Option<Value>,
    #[serde(default)]
    name: Option<String>,
}

/// Load a snapshot file
///
/// # Errors
/// * `SnapshotError::Io` - file cannot be read
/// * `SnapshotError::Json` - not valid JSON
/// * `SnapshotError::InvalidFormat` - no `traceEvents` or no timestamps
pub fn load_snapshot(path: impl AsRef<Path>) -> Result<CallTreeSnapshot, SnapshotError> {
    let path = path.as_ref();
    info!("Loading snapshot from {}", path.display());

    let contents = fs::read_to_string(path)?;
    parse_snapshot(&contents)
}

/// Parse snapshot JSON text
pub fn parse_snapshot(json: &str) -> Result<CallTreeSnapshot, SnapshotError> {
    let raw: Value = serde_json::from_str(json)?;
    parse_snapshot_value(&raw)
}

/// Build a snapshot from an already parsed document
pub fn parse_snapshot_value(raw: &Value) -> Result<CallTreeSnapshot, SnapshotError> {
    let events = raw
        .get("traceEvents")
        .and_then(|v| v.as_array())
        .ok_or_else(|| SnapshotError::InvalidFormat("missing traceEvents array".to_string()))?;

    let mut origin: Option<f64> = None;
    let mut spans = Vec::new();
    let mut skipped = 0usize;

    for (idx, value) in events.iter().enumerate() {
        let event = match serde_json::from_value::<SnapshotEvent>(value.clone()) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to parse snapshot event {}: {}", idx, e);
                skipped += 1;
                continue;
            }
        };

        if let Some(ts) = event.ts {
            origin = Some(origin.map_or(ts, |o: f64| o.min(ts)));
        }

        if event.ph.as_deref() != Some("X") {
            continue;
        }

        match span_from_event(&event) {
            Some(span) => spans.push(span),
            None => {
                debug!("Skipping incomplete call event {}", idx);
                skipped += 1;
            }
        }
    }

    let origin = origin.ok_or_else(|| {
        SnapshotError::InvalidFormat("no event carries a timestamp".to_string())
    })?;

    if skipped > 0 {
        warn!("Skipped {} snapshot events", skipped);
    }

    let snapshot = CallTreeSnapshot::from_spans(origin, spans);
    info!(
        "Loaded {} calls across {} threads (origin {}us)",
        snapshot.len(),
        snapshot.threads().count(),
        origin
    );
    Ok(snapshot)
}

fn span_from_event(event: &SnapshotEvent) -> Option<CallSpan> {
    let thread_id = id_value(event.tid.as_ref()?)?;
    let process_id = event.pid.as_ref().and_then(id_value).unwrap_or(thread_id);
    let full_name = event.name.clone()?;
    let (function, filename, line, is_native_extension) = split_name(&full_name);

    Some(CallSpan {
        process_id,
        thread_id,
        start_us: event.ts?,
        duration_us: event.dur.unwrap_or(0.0),
        function,
        full_name,
        filename,
        line,
        is_native_extension,
    })
}

/// Numeric ids, sometimes written as strings
fn id_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(INTERPRETED_NAME_PATTERN).expect("interpreted name pattern is valid")
    })
}

/// Split a call name into (function, file, line, is_native_extension)
fn split_name(full_name: &str) -> (String, Option<String>, Option<u32>, bool) {
    match name_pattern().captures(full_name) {
        Some(caps) => {
            let line = caps[3].parse().ok();
            (caps[1].to_string(), Some(caps[2].to_string()), line, false)
        }
        None => (full_name.to_string(), None, None, true),
    }
}
