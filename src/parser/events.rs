//! Framing of `perf script` text into event records.
//!
//! With call graphs enabled, perf prints one block per event:
//!
//! ```text
//! python 302629 [011] 3485124.180312: sched:sched_switch: prev_comm=python prev_pid=302629 ...
//!         ffffffff9700008c __schedule+0x2cc ([kernel.kallsyms])
//!         7f0e5b5e1a3c take_gil+0x12c (/usr/lib/libpython3.9.so)
//!
//! ```
//!
//! The first line is the header, the indented lines are stack frames and a
//! blank line ends the block.

use crate::utils::error::ParseError;
use std::io::BufRead;

/// One header line plus its stack frames, exactly as read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub header: String,
    pub frames: Vec<String>,
}

/// Lazy single-pass iterator over the blocks of a perf script stream
///
/// **Public** - main entry point for framed input
pub struct RecordStream<R> {
    lines: std::io::Lines<R>,
    done: bool,
}

impl<R: BufRead> RecordStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = Result<RawRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut header: Option<String> = None;
        let mut frames = Vec::new();

        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(ParseError::Io(e)));
                }
                None => {
                    self.done = true;
                    // Unterminated trailing block still counts
                    return header.map(|header| Ok(RawRecord { header, frames }));
                }
            };

            let line = line.trim();
            if line.is_empty() {
                match header.take() {
                    Some(header) => return Some(Ok(RawRecord { header, frames })),
                    None => continue,
                }
            }

            if header.is_none() {
                header = Some(line.to_string());
            } else {
                frames.push(line.to_string());
            }
        }
    }
}

/// Iterator over header lines of an unframed stream
///
/// GIL uprobes are usually recorded without call graphs, so perf prints one
/// line per event with no blank separators. Stack frame lines that do show up
/// are skipped.
pub struct HeaderLines<R> {
    lines: std::io::Lines<R>,
}

impl<R: BufRead> HeaderLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for HeaderLines<R> {
    type Item = Result<String, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        for line in self.lines.by_ref() {
            let line = match line {
                Ok(line) => line,
                Err(e) => return Some(Err(ParseError::Io(e))),
            };
            let trimmed = line.trim();
            if trimmed.is_empty() || is_frame_line(&line) {
                continue;
            }
            return Some(Ok(trimmed.to_string()));
        }
        None
    }
}

/// A frame line is indented and starts with a bare hex address
///
/// Headers may be indented too when perf pads the comm column, and a comm can
/// itself be hex (`dd`, `cafe`), so a numeric tid in second place marks a
/// header.
fn is_frame_line(line: &str) -> bool {
    if !line.starts_with(char::is_whitespace) {
        return false;
    }
    let mut tokens = line.split_whitespace();
    let address = tokens
        .next()
        .map_or(false, |token| token.chars().all(|c| c.is_ascii_hexdigit()));
    let tid = tokens.next().map_or(false, |token| {
        token
            .split('/')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
    });
    address && !tid
}
