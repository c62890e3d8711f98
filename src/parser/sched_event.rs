//! Scheduler event classification.
//!
//! Recent perf versions print tracepoint fields as `key=value`. perf 4 used a
//! positional form (`comm:pid [prio] state ==> ...`), so required fields are
//! resolved by trying each layout in order until one works.

use super::header::DecodedHeader;
use crate::utils::config::{
    SCHED_PROCESS_EXEC, SCHED_PROCESS_FORK, SCHED_SWITCH, SCHED_WAKEUP, SCHED_WAKEUP_NEW,
};
use crate::utils::error::ParseError;

/// Events the scheduler state machine understands
#[derive(Debug, Clone, PartialEq)]
pub enum SchedEvent {
    /// `thread_id` leaves the CPU in `prev_state`
    Switch { thread_id: u32, prev_state: String },
    Wakeup { thread_id: u32 },
    WakeupNew { thread_id: u32 },
    Fork { parent_id: u32, child_id: u32 },
    Exec { thread_id: u32 },
    /// Any other tracepoint
    Tracepoint,
    /// Hardware/software counter sample
    Counter { name: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedKind {
    Switch,
    Wakeup,
    WakeupNew,
    Fork,
}

/// One way of reading the required fields out of a header
type LayoutStrategy = fn(&DecodedHeader, SchedKind) -> Result<SchedEvent, String>;

/// Tried in order, first success wins
const LAYOUT_STRATEGIES: &[(&str, LayoutStrategy)] = &[
    ("key=value", from_key_values),
    ("perf4 positional", from_positional),
];

impl SchedEvent {
    /// Classify a decoded header
    ///
    /// # Errors
    /// * `ParseError::MalformedHeader` - none of the layouts could resolve the
    ///   fields this event type requires
    pub fn from_header(header: &DecodedHeader, raw: &str) -> Result<Self, ParseError> {
        if !header.is_tracepoint {
            return Ok(Self::Counter {
                name: header.event_name.clone(),
                value: header.count.clone().unwrap_or_default(),
            });
        }

        let kind = match header.event_name.as_str() {
            SCHED_SWITCH => SchedKind::Switch,
            SCHED_WAKEUP => SchedKind::Wakeup,
            SCHED_WAKEUP_NEW => SchedKind::WakeupNew,
            SCHED_PROCESS_FORK => SchedKind::Fork,
            SCHED_PROCESS_EXEC => {
                return Ok(Self::Exec {
                    thread_id: header.thread_id,
                })
            }
            _ => return Ok(Self::Tracepoint),
        };

        let mut failures = Vec::with_capacity(LAYOUT_STRATEGIES.len());
        for (layout, strategy) in LAYOUT_STRATEGIES {
            match strategy(header, kind) {
                Ok(event) => return Ok(event),
                Err(reason) => failures.push(format!("{}: {}", layout, reason)),
            }
        }

        Err(ParseError::malformed(raw, failures.join("; ")))
    }
}

fn required_id(header: &DecodedHeader, key: &str) -> Result<u32, String> {
    let value = header
        .attr(key)
        .ok_or_else(|| format!("missing `{}`", key))?;
    value
        .parse()
        .map_err(|_| format!("`{}={}` is not a thread id", key, value))
}

fn from_key_values(header: &DecodedHeader, kind: SchedKind) -> Result<SchedEvent, String> {
    Ok(match kind {
        SchedKind::Switch => SchedEvent::Switch {
            thread_id: required_id(header, "prev_pid")?,
            prev_state: header
                .attr("prev_state")
                .ok_or("missing `prev_state`")?
                .to_string(),
        },
        SchedKind::Wakeup => SchedEvent::Wakeup {
            thread_id: required_id(header, "pid")?,
        },
        SchedKind::WakeupNew => SchedEvent::WakeupNew {
            thread_id: required_id(header, "pid")?,
        },
        SchedKind::Fork => SchedEvent::Fork {
            parent_id: required_id(header, "pid")?,
            child_id: required_id(header, "child_pid")?,
        },
    })
}

/// `python:302629 [120] S ==> swapper/11:0 [120]`
fn from_positional(header: &DecodedHeader, kind: SchedKind) -> Result<SchedEvent, String> {
    let first = header.trailing.first().ok_or("no fields after event name")?;
    let (_comm, pid) = first
        .rsplit_once(':')
        .ok_or_else(|| format!("`{}` is not comm:pid", first))?;
    let thread_id: u32 = pid
        .parse()
        .map_err(|_| format!("`{}` is not a thread id", pid))?;

    match kind {
        SchedKind::Switch => {
            let prev_state = header
                .trailing
                .get(2)
                .ok_or("missing previous state column")?
                .clone();
            Ok(SchedEvent::Switch {
                thread_id,
                prev_state,
            })
        }
        SchedKind::Wakeup => Ok(SchedEvent::Wakeup { thread_id }),
        SchedKind::WakeupNew => Ok(SchedEvent::WakeupNew { thread_id }),
        SchedKind::Fork => Err("fork has no positional layout".to_string()),
    }
}
