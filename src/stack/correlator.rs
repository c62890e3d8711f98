//! Splice Python call chains into native stacks.
//!
//! A native stack (innermost frame first, as `perf script` prints it) shows
//! the interpreter's evaluation loop where Python code runs. The snapshot
//! knows which Python functions those were. We find the eval-loop slices in
//! the native stack, rebuild the Python segments from the snapshot and pair
//! them up, outermost with outermost.

use crate::snapshot::{call_chain, LanguageSnapshot, SnapshotFrame};
use crate::utils::config::{
    EVAL_CONTINUATION_MARKERS, EVAL_ENTRY_MARKERS, EVAL_FRAME_TAG, INTERPRETED_TAG,
    INTERPRETER_INTERNAL_MARKER, KNOWN_BENIGN_MISMATCH_MARKERS, NATIVE_EXTENSION_TAG,
    SYNTHETIC_FRAME_ADDRESS,
};
use crate::utils::error::CorrelationError;
use log::{debug, error, warn};
use std::ops::RangeInclusive;

/// Per-call behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelateOptions {
    /// Tag eval-loop frames with `cpyeval::` instead of replacing them
    pub keep_evaluation_frames: bool,

    /// Return the native stack unchanged when the two sides disagree
    pub allow_mismatch: bool,

    /// Treat known benign mismatches as errors too
    pub pedantic: bool,
}

/// Marker names and rendering tags
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub entry_markers: Vec<String>,
    pub continuation_markers: Vec<String>,
    pub benign_markers: Vec<String>,
    pub internal_marker: String,
    pub interpreted_tag: String,
    pub native_extension_tag: String,
    pub eval_frame_tag: String,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            entry_markers: owned(EVAL_ENTRY_MARKERS),
            continuation_markers: owned(EVAL_CONTINUATION_MARKERS),
            benign_markers: owned(KNOWN_BENIGN_MISMATCH_MARKERS),
            internal_marker: INTERPRETER_INTERNAL_MARKER.to_string(),
            interpreted_tag: INTERPRETED_TAG.to_string(),
            native_extension_tag: NATIVE_EXTENSION_TAG.to_string(),
            eval_frame_tag: EVAL_FRAME_TAG.to_string(),
        }
    }
}

impl CorrelatorConfig {
    pub fn with_benign_markers(mut self, markers: Vec<String>) -> Self {
        self.benign_markers = markers;
        self
    }
}

fn contains_any(frame: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| frame.contains(m.as_str()))
}

/// Correlator bound to one configuration
#[derive(Debug, Clone, Default)]
pub struct StackCorrelator {
    config: CorrelatorConfig,
    options: CorrelateOptions,
}

impl StackCorrelator {
    pub fn new(config: CorrelatorConfig, options: CorrelateOptions) -> Self {
        Self { config, options }
    }

    pub fn options(&self) -> &CorrelateOptions {
        &self.options
    }

    /// Correlate one native stack
    ///
    /// `timestamp_us` is the absolute header time; the snapshot is queried at
    /// `timestamp_us - origin`.
    ///
    /// # Errors
    /// * `CorrelationError::Mismatch` - slice and segment counts differ, no
    ///   benign explanation applies and `allow_mismatch` is off
    pub fn correlate<S: LanguageSnapshot + ?Sized>(
        &self,
        frames: &[String],
        snapshot: &S,
        thread_id: u32,
        timestamp_us: f64,
    ) -> Result<Vec<String>, CorrelationError> {
        let relative_us = timestamp_us - snapshot.origin_us();
        let chain = call_chain(snapshot, thread_id, relative_us);
        let segments = language_segments(&chain, &self.config);
        let slices = find_eval_slices(frames, &self.config);

        if slices.len() == segments.len() {
            return Ok(self.splice(frames, &slices, &segments));
        }

        if !self.options.pedantic {
            if let Some(marker) = self.benign_cause(frames) {
                debug!(
                    "Seen {} in stack of thread {}, ignoring the stack mismatch (use --pedantic to report it)",
                    marker, thread_id
                );
                return Ok(frames.to_vec());
            }
        }

        let report = mismatch_report(frames, &slices, &segments, chain.first().copied());
        if self.options.allow_mismatch {
            warn!(
                "Could not match stacks at {}us for thread {}, keeping the native stack\n{}",
                relative_us, thread_id, report
            );
            return Ok(frames.to_vec());
        }

        error!(
            "Could not match stacks at {}us for thread {}\n{}",
            relative_us, thread_id, report
        );
        Err(CorrelationError::Mismatch {
            thread_id,
            timestamp_us: relative_us,
            native_slices: slices.len(),
            language_segments: segments.len(),
        })
    }

    /// A benign marker, only when no interpreter-internal frame is present
    fn benign_cause(&self, frames: &[String]) -> Option<&str> {
        if frames
            .iter()
            .any(|f| f.contains(self.config.internal_marker.as_str()))
        {
            return None;
        }
        self.config
            .benign_markers
            .iter()
            .find(|marker| frames.iter().any(|f| f.contains(marker.as_str())))
            .map(String::as_str)
    }

    fn splice(
        &self,
        frames: &[String],
        slices: &[RangeInclusive<usize>],
        segments: &[Vec<String>],
    ) -> Vec<String> {
        let mut stack = frames.to_vec();

        // Slices are outermost-first (highest indices first), so splicing one
        // never shifts the next. Segments are innermost-first.
        for (slice, segment) in slices.iter().zip(segments.iter().rev()) {
            let start = *slice.start();
            if self.options.keep_evaluation_frames {
                for frame in &mut stack[slice.clone()] {
                    *frame = tag_frame(frame, &self.config.eval_frame_tag);
                }
                stack.splice(start..start, segment.iter().cloned());
            } else {
                stack.splice(slice.clone(), segment.iter().cloned());
            }
        }

        stack
    }
}

/// Correlate with the default markers and tags
pub fn correlate_stack<S: LanguageSnapshot + ?Sized>(
    frames: &[String],
    snapshot: &S,
    thread_id: u32,
    timestamp_us: f64,
    options: &CorrelateOptions,
) -> Result<Vec<String>, CorrelationError> {
    StackCorrelator::new(CorrelatorConfig::default(), *options).correlate(
        frames,
        snapshot,
        thread_id,
        timestamp_us,
    )
}

/// Render a snapshot frame like a `perf script` frame line
pub fn render_frame(frame: &SnapshotFrame, config: &CorrelatorConfig) -> String {
    let tag = if frame.is_native_extension {
        &config.native_extension_tag
    } else {
        &config.interpreted_tag
    };

    let filename = frame.filename.as_deref().map(|f| {
        if f.contains("frozen") {
            "<frozen>"
        } else {
            f
        }
    });
    let location = match (filename, frame.line) {
        (Some(file), Some(line)) => format!("::{}:{}", file, line),
        (Some(file), None) => format!("::{}", file),
        (None, _) => String::new(),
    };

    format!(
        "{} {}::{}{} ([{}])",
        SYNTHETIC_FRAME_ADDRESS,
        tag,
        frame.function,
        location,
        filename.unwrap_or_default()
    )
}

/// Group a call chain (innermost first) into language segments
///
/// A native-extension frame after interpreted ones opens a new segment;
/// segments without any interpreted frame are folded into the one outward.
pub fn language_segments(chain: &[&SnapshotFrame], config: &CorrelatorConfig) -> Vec<Vec<String>> {
    let mut segments: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_interpreted = false;
    let mut was_interpreted = false;

    for frame in chain {
        let interpreted = !frame.is_native_extension;
        if !interpreted && was_interpreted {
            segments.push(std::mem::take(&mut current));
            current_interpreted = false;
        }
        current.push(render_frame(frame, config));
        current_interpreted |= interpreted;
        was_interpreted = interpreted;
    }

    if current_interpreted {
        segments.push(current);
    } else if let Some(outermost) = segments.last_mut() {
        outermost.extend(current);
    }

    segments
}

/// Eval-loop slices in a native stack, outermost first
///
/// Each range covers frames innermost..=outermost of one slice.
pub fn find_eval_slices(frames: &[String], config: &CorrelatorConfig) -> Vec<RangeInclusive<usize>> {
    let mut slices = Vec::new();
    let mut open: Option<(usize, usize)> = None;

    for (idx, frame) in frames.iter().enumerate().rev() {
        match open {
            None if contains_any(frame, &config.entry_markers) => open = Some((idx, idx)),
            Some((_, outer)) if contains_any(frame, &config.continuation_markers) => {
                open = Some((idx, outer))
            }
            Some((inner, outer)) => {
                slices.push(inner..=outer);
                // A frame that closes a slice may open the next one
                open = contains_any(frame, &config.entry_markers).then_some((idx, idx));
            }
            None => {}
        }
    }

    if let Some((inner, outer)) = open {
        slices.push(inner..=outer);
    }
    slices
}

/// `<address> <tag>::<signature>`, keeping the address column
fn tag_frame(frame: &str, tag: &str) -> String {
    match frame.split_once(' ') {
        Some((address, signature)) => format!("{} {}::{}", address, tag, signature),
        None => format!("{}::{}", tag, frame),
    }
}

/// Keep the last frame containing `marker` and everything outward of it
pub fn strip_above_marker(frames: &[String], marker: &str) -> Vec<String> {
    match frames.iter().rposition(|f| f.contains(marker)) {
        Some(idx) => frames[idx..].to_vec(),
        None => frames.to_vec(),
    }
}

fn mismatch_report(
    frames: &[String],
    slices: &[RangeInclusive<usize>],
    segments: &[Vec<String>],
    location: Option<&SnapshotFrame>,
) -> String {
    let mut report = String::new();

    report.push_str("Snapshot location: ");
    report.push_str(location.map_or("<none>", |f| f.full_name.as_str()));
    report.push('\n');

    report.push_str("Eval-loop slices (innermost..=outermost):\n");
    for slice in slices {
        report.push_str(&format!("  {:?}\n", slice));
    }

    report.push_str("Native stack, * marks the eval loop:\n");
    for (idx, frame) in frames.iter().enumerate() {
        let mark = if slices.iter().any(|s| s.contains(&idx)) {
            '*'
        } else {
            ' '
        };
        report.push_str(&format!("  {:3} {} {}\n", idx, mark, frame));
    }

    report.push_str("Python segments from the snapshot:\n");
    for segment in segments {
        report.push_str("  -----\n");
        for frame in segment {
            report.push_str(&format!("  {}\n", frame));
        }
    }
    report.push_str("  -----");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(frames: &[&str]) -> Vec<String> {
        frames.iter().map(|f| f.to_string()).collect()
    }

    fn frame(function: &str, native: bool) -> SnapshotFrame {
        SnapshotFrame {
            function: function.to_string(),
            full_name: function.to_string(),
            filename: (!native).then(|| "app.py".to_string()),
            line: (!native).then_some(1),
            is_native_extension: native,
            start_us: 0.0,
            end_us: 1.0,
            parent: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_find_eval_slices() {
        let frames = stack(&[
            "1 take_gil",
            "2 call_function",
            "3 PyEval_EvalFrame",
            "4 numpy_sum",
            "5 method_call",
            "6 PyEval_EvalCode",
            "7 main",
        ]);
        let slices = find_eval_slices(&frames, &CorrelatorConfig::default());
        assert_eq!(slices, vec![4..=5, 1..=2]);
    }

    #[test]
    fn test_continuation_without_entry_is_ignored() {
        let frames = stack(&["1 call_function", "2 main"]);
        assert!(find_eval_slices(&frames, &CorrelatorConfig::default()).is_empty());
    }

    #[test]
    fn test_segments_split_on_native_after_python() {
        let inner_c = frame("numpy.sum", true);
        let py_a = frame("compute", false);
        let py_b = frame("main", false);
        let root_c = frame("runner", true);
        let config = CorrelatorConfig::default();

        let segments = language_segments(&[&inner_c, &py_a, &py_b], &config);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 3);

        let segments = language_segments(&[&py_a, &inner_c, &py_b], &config);
        assert_eq!(segments.len(), 2);

        // Trailing native frames join the outermost segment
        let segments = language_segments(&[&py_a, &root_c], &config);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 2);

        assert!(language_segments(&[&root_c], &config).is_empty());
    }

    #[test]
    fn test_render_frame() {
        let config = CorrelatorConfig::default();
        let mut py = frame("fib", false);
        py.filename = Some("<frozen importlib._bootstrap>".to_string());
        py.line = Some(10);

        assert_eq!(
            render_frame(&py, &config),
            "000000000000000000000000 py::fib::<frozen>:10 ([<frozen>])"
        );
        assert_eq!(
            render_frame(&frame("builtins.sum", true), &config),
            "000000000000000000000000 cext::builtins.sum ([])"
        );
    }

    #[test]
    fn test_tag_frame() {
        assert_eq!(tag_frame("7f00 PyEval_EvalCode", "cpyeval"), "7f00 cpyeval::PyEval_EvalCode");
        assert_eq!(tag_frame("PyEval_EvalCode", "cpyeval"), "cpyeval::PyEval_EvalCode");
    }

    #[test]
    fn test_strip_above_marker() {
        let frames = stack(&["1 futex", "2 take_gil", "3 take_gil_wrapper", "4 main"]);
        assert_eq!(
            strip_above_marker(&frames, "take_gil"),
            stack(&["3 take_gil_wrapper", "4 main"])
        );
        assert_eq!(strip_above_marker(&frames, "nothing"), frames);
    }
}
