//! Fold stacks into the collapsed format flamegraph tools read.
//!
//! Format: "outermost;...;innermost weight"
//!
//! Example: "main;py::compute::app.py:10;take_gil 1520"
//! This means: 1520us were spent waiting in take_gil under compute().

use log::debug;
use std::collections::HashMap;
use std::io::{self, Write};

/// A single collapsed stack entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollapsedStack {
    /// Frames joined by `;`, outermost first
    pub stack: String,

    /// Total microseconds attributed to this stack
    pub weight: u64,
}

impl CollapsedStack {
    pub fn new(stack: String, weight: u64) -> Self {
        Self { stack, weight }
    }

    /// `stack weight` line
    pub fn to_line(&self) -> String {
        format!("{} {}", self.stack, self.weight)
    }
}

/// Accumulates weighted stacks by identical call path
#[derive(Debug, Default)]
pub struct StackFolder {
    stack_map: HashMap<String, u64>,
    samples: usize,
}

impl StackFolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one stack (innermost frame first) with its weight
    pub fn add(&mut self, frames: &[String], weight: u64) {
        let key = fold_frames(frames);
        if key.is_empty() {
            return;
        }
        *self.stack_map.entry(key).or_insert(0) += weight;
        self.samples += 1;
    }

    /// Stacks added so far (before merging)
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Merged stacks, heaviest first
    pub fn finish(self) -> Vec<CollapsedStack> {
        let mut stacks: Vec<CollapsedStack> = self
            .stack_map
            .into_iter()
            .map(|(stack, weight)| CollapsedStack::new(stack, weight))
            .collect();

        // Equal weights sort by name so output is stable
        stacks.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.stack.cmp(&b.stack)));

        debug!(
            "Folded {} samples into {} unique stacks",
            self.samples,
            stacks.len()
        );
        stacks
    }
}

/// Frame text without the address column, the `(module)` suffix or the
/// `+0x..` offset
pub fn frame_symbol(frame: &str) -> &str {
    let frame = frame.trim();
    let signature = match frame.split_once(' ') {
        Some((address, rest)) if address.chars().all(|c| c.is_ascii_hexdigit()) => rest,
        _ => frame,
    };

    let signature = match signature.rfind(" (") {
        Some(idx) if signature.ends_with(')') => &signature[..idx],
        _ => signature,
    };

    match signature.rfind("+0x") {
        Some(idx) => &signature[..idx],
        None => signature,
    }
}

/// Innermost-first frames to `outer;...;inner`
pub fn fold_frames(frames: &[String]) -> String {
    frames
        .iter()
        .rev()
        .map(|f| frame_symbol(f).replace(';', ":"))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(";")
}

/// Write collapsed stacks one per line
pub fn write_collapsed<W: Write>(stacks: &[CollapsedStack], mut writer: W) -> io::Result<()> {
    for stack in stacks {
        writeln!(writer, "{}", stack.to_line())?;
    }
    writer.flush()
}
