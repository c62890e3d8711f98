//! Header line decoding.
//!
//! Two layouts exist, told apart by the event name (5th token):
//!
//! ```text
//! tracepoint: python 302629 [011] 3485124.180312: sched:sched_switch: prev_pid=302629 ...
//! counter:    python 302629 3485124.180312: 250000 cycles: ...
//! ```

use crate::utils::config::MICROS_PER_SECOND;
use crate::utils::error::ParseError;
use std::collections::BTreeMap;

/// Typed fields of a perf script header line
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedHeader {
    /// Command name of the task that triggered the event
    pub source: String,

    /// Thread that triggered the event
    pub thread_id: u32,

    /// CPU column, tracepoints only (e.g. "[011]")
    pub cpu: Option<String>,

    /// Event time in microseconds
    pub timestamp_us: f64,

    /// Event name without its trailing colon
    pub event_name: String,

    /// Sample count, counters only
    pub count: Option<String>,

    /// key=value tokens after the event name
    pub attributes: BTreeMap<String, String>,

    /// Every token after the event name, for positional layouts
    pub trailing: Vec<String>,

    pub is_tracepoint: bool,
}

impl DecodedHeader {
    /// Decode a header line
    ///
    /// **Public** - used by every converter
    ///
    /// # Errors
    /// * `ParseError::MalformedHeader` - too few tokens, or a thread id or
    ///   timestamp that is not a number
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            return Err(ParseError::malformed(
                line,
                format!("expected at least 5 fields, found {}", parts.len()),
            ));
        }

        let event_name = parts[4].strip_suffix(':').unwrap_or(parts[4]).to_string();
        let is_tracepoint = event_name.contains(':');

        let (cpu, time_token, count) = if is_tracepoint {
            (Some(parts[2].to_string()), parts[3], None)
        } else {
            (None, parts[2], Some(parts[3].to_string()))
        };

        let thread_id = parse_thread_id(parts[1])
            .ok_or_else(|| ParseError::malformed(line, format!("bad thread id `{}`", parts[1])))?;
        let timestamp_us = parse_timestamp(time_token)
            .ok_or_else(|| ParseError::malformed(line, format!("bad timestamp `{}`", time_token)))?;

        let trailing: Vec<String> = parts[5..].iter().map(|s| s.to_string()).collect();
        let attributes = parse_attributes(&trailing);

        Ok(Self {
            source: parts[0].to_string(),
            thread_id,
            cpu,
            timestamp_us,
            event_name,
            count,
            attributes,
            trailing,
            is_tracepoint,
        })
    }

    /// Look up a key=value attribute
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Accepts `tid` as well as `pid/tid`
fn parse_thread_id(token: &str) -> Option<u32> {
    let tid = token.rsplit('/').next().unwrap_or(token);
    tid.parse().ok()
}

/// Seconds with a trailing colon, e.g. `3485124.180312:`
fn parse_timestamp(token: &str) -> Option<f64> {
    let seconds: f64 = token.strip_suffix(':').unwrap_or(token).parse().ok()?;
    Some(seconds * MICROS_PER_SECOND)
}

/// Collect key=value tokens, anything else is skipped
pub fn parse_attributes<S: AsRef<str>>(tokens: &[S]) -> BTreeMap<String, String> {
    tokens
        .iter()
        .filter_map(|token| token.as_ref().split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
