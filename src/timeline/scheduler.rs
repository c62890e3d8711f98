//! Per-thread run/sleep state from scheduler tracepoints.
//!
//! Running segments go from a wakeup to the next switch-out, sleeping
//! segments from a switch-out to the next wakeup. Sleeping segments carry the
//! stack that sent the thread to sleep, which is what offgil analysis needs.

use crate::parser::{DecodedHeader, Phase, RawRecord, SchedEvent, TimelineEvent, TrackId};
use crate::utils::config::{LOCK_ACQUIRE_FUNCTION, RUNNABLE_STATES};
use crate::utils::error::{Anomaly, ParseError};
use log::{debug, trace, warn};
use serde_json::Value;
use std::collections::HashMap;

pub const CATEGORY_PROCESS_STATE: &str = "process state";
pub const RUNNING: &str = "R";
pub const SLEEPING: &str = "S";
pub const SLEEPING_ON_GIL: &str = "S(GIL)";
const COUNTERS_TRACK: &str = "counters";

/// Knobs for scheduler conversion
#[derive(Debug, Clone)]
pub struct SchedOptions {
    /// Emit running (`R`) segments
    pub store_running: bool,

    /// Emit sleeping (`S`, `S(GIL)`) segments
    pub store_sleeping: bool,

    /// Emit an instant for every tracepoint
    pub all_tracepoints: bool,

    /// Log and skip undecodable records instead of aborting
    pub skip_malformed: bool,

    /// A sleep stack containing this function was waiting for the GIL
    pub lock_acquire_function: String,
}

impl Default for SchedOptions {
    fn default() -> Self {
        Self {
            store_running: false,
            store_sleeping: true,
            all_tracepoints: false,
            skip_malformed: false,
            lock_acquire_function: LOCK_ACQUIRE_FUNCTION.to_string(),
        }
    }
}

impl SchedOptions {
    pub fn with_running(mut self, store_running: bool) -> Self {
        self.store_running = store_running;
        self
    }

    pub fn with_sleeping(mut self, store_sleeping: bool) -> Self {
        self.store_sleeping = store_sleeping;
        self
    }
}

/// The stack a thread had when it went to sleep
#[derive(Debug, Clone, PartialEq)]
pub struct SleepRecord {
    pub since: f64,
    pub stack: Vec<String>,
}

/// What we know about one observed thread
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadRunState {
    pub running_since: Option<f64>,
    pub sleep: Option<SleepRecord>,
}

impl ThreadRunState {
    pub fn is_sleeping(&self) -> bool {
        self.sleep.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.sleep.is_none() && self.running_since.is_some()
    }
}

/// A produced timeline event with the stack it belongs to
///
/// For sleep segments this is the stack captured at switch-out, not the
/// stack of the wakeup record.
#[derive(Debug, Clone)]
pub struct Emission {
    pub event: TimelineEvent,
    pub stack: Vec<String>,
}

/// Scheduler state machine
///
/// Owns every per-thread map; the caller drives it one record at a time.
#[derive(Debug, Default)]
pub struct SchedulerMachine {
    options: SchedOptions,
    threads: HashMap<u32, ThreadRunState>,
    parents: HashMap<u32, u32>,
    first_timestamp: Option<f64>,
    history_gaps: usize,
}

impl SchedulerMachine {
    pub fn new(options: SchedOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Decode and process one raw record
    ///
    /// **Public** - main entry point for the sched converter
    ///
    /// # Errors
    /// * `ParseError::MalformedHeader` - header could not be decoded and
    ///   `skip_malformed` is off
    pub fn process_record(&mut self, record: &RawRecord) -> Result<Vec<Emission>, ParseError> {
        let decoded = DecodedHeader::parse(&record.header)
            .and_then(|header| SchedEvent::from_header(&header, &record.header).map(|e| (header, e)));

        match decoded {
            Ok((header, event)) => Ok(self.process(&header, &event, &record.frames)),
            Err(e) if self.options.skip_malformed => {
                warn!("Skipping record: {}", e);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply one classified event
    pub fn process(
        &mut self,
        header: &DecodedHeader,
        event: &SchedEvent,
        frames: &[String],
    ) -> Vec<Emission> {
        let now = header.timestamp_us;
        let first = *self.first_timestamp.get_or_insert(now);
        trace!("{:13.6}[+{:.4}] {:?}", now / 1e6, (now - first) / 1e6, event);

        let mut out = Vec::new();

        if self.options.all_tracepoints && header.is_tracepoint {
            let tid = header.thread_id;
            out.push(Emission {
                event: TimelineEvent::instant(self.process_of(tid), tid, now, header.event_name.clone(), "g"),
                stack: frames.to_vec(),
            });
        }

        match event {
            SchedEvent::Switch {
                thread_id,
                prev_state,
            } => {
                if let Some(emission) = self.switch_out(*thread_id, prev_state, now, frames) {
                    out.push(emission);
                }
            }
            SchedEvent::Wakeup { thread_id } => {
                if let Some(emission) = self.wake_up(*thread_id, now) {
                    out.push(emission);
                }
            }
            SchedEvent::WakeupNew { thread_id } => {
                debug!("Starting (new) {}", thread_id);
                self.threads.entry(*thread_id).or_default().running_since = Some(now);
            }
            SchedEvent::Fork {
                parent_id,
                child_id,
            } => {
                debug!("Process {} forked {}", parent_id, child_id);
                self.parents.insert(*child_id, *parent_id);
            }
            SchedEvent::Exec { thread_id } => {
                debug!("Starting (exec) {}", thread_id);
            }
            SchedEvent::Counter { name, value } => {
                let event = TimelineEvent::new(COUNTERS_TRACK, now, Phase::Counter, name.clone())
                    .with_arg(name.clone(), counter_value(value));
                out.push(Emission {
                    event,
                    stack: frames.to_vec(),
                });
            }
            SchedEvent::Tracepoint => {
                trace!("Skipping {}", header.event_name);
            }
        }

        out
    }

    fn switch_out(
        &mut self,
        tid: u32,
        prev_state: &str,
        now: f64,
        frames: &[String],
    ) -> Option<Emission> {
        let pid = self.process_of(tid);
        let state = self.threads.entry(tid).or_default();

        if RUNNABLE_STATES.contains(&prev_state) {
            // Preempted, it never really slept: only move the sleep start
            state.sleep = Some(SleepRecord {
                since: now,
                stack: frames.to_vec(),
            });
            return None;
        }

        let Some(running_since) = state.running_since.take() else {
            let gap = Anomaly::SchedulingHistoryGap {
                thread_id: tid,
                timestamp_us: now,
            };
            debug!("Dropping switch: {}", gap);
            self.history_gaps += 1;
            return None;
        };

        let dur = now - running_since;
        debug!("{} will switch to state={}, ran for {}us", tid, prev_state, dur);

        state.sleep = Some(SleepRecord {
            since: now,
            stack: frames.to_vec(),
        });

        self.options.store_running.then(|| Emission {
            event: TimelineEvent::complete(pid, tid, running_since, dur, RUNNING)
                .with_category(CATEGORY_PROCESS_STATE),
            stack: frames.to_vec(),
        })
    }

    fn wake_up(&mut self, tid: u32, now: f64) -> Option<Emission> {
        let pid = self.process_of(tid);
        let lock_function = self.options.lock_acquire_function.clone();
        let store_sleeping = self.options.store_sleeping;
        let state = self.threads.entry(tid).or_default();
        state.running_since = Some(now);

        // First sighting, we did not see it go to sleep
        let sleep = state.sleep.take()?;

        let dur = now - sleep.since;
        let on_gil = in_stack(&lock_function, &sleep.stack);
        debug!(
            "Waking up {}{}, slept for {}us",
            tid,
            if on_gil { " (recovering from GIL)" } else { "" },
            dur
        );
        trace!("Stack when going to sleep:\n\t{}", sleep.stack.join("\n\t"));

        if !store_sleeping {
            return None;
        }

        let (name, color) = if on_gil {
            (SLEEPING_ON_GIL, "terrible")
        } else {
            (SLEEPING, "bad")
        };
        Some(Emission {
            event: TimelineEvent::complete(pid, tid, sleep.since, dur, name)
                .with_category(CATEGORY_PROCESS_STATE)
                .with_color(color),
            stack: sleep.stack,
        })
    }

    /// Row the thread is grouped under (its parent if we saw the fork)
    fn process_of(&self, tid: u32) -> TrackId {
        TrackId::Id(self.parents.get(&tid).copied().unwrap_or(tid))
    }

    pub fn thread_state(&self, tid: u32) -> Option<&ThreadRunState> {
        self.threads.get(&tid)
    }

    pub fn parent_of(&self, tid: u32) -> Option<u32> {
        self.parents.get(&tid).copied()
    }

    /// Switch events dropped because the thread was never seen running
    pub fn history_gaps(&self) -> usize {
        self.history_gaps
    }
}

/// Substring membership over a frame list
pub fn in_stack(function: &str, stack: &[String]) -> bool {
    stack.iter().any(|frame| frame.contains(function))
}

fn counter_value(raw: &str) -> Value {
    raw.parse::<u64>()
        .map(Value::from)
        .or_else(|_| raw.parse::<f64>().map(Value::from))
        .unwrap_or_else(|_| Value::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(tid: u32, ts: f64, event: &str) -> DecodedHeader {
        DecodedHeader {
            source: "python".to_string(),
            thread_id: tid,
            cpu: Some("[000]".to_string()),
            timestamp_us: ts,
            event_name: event.to_string(),
            count: None,
            attributes: Default::default(),
            trailing: Vec::new(),
            is_tracepoint: true,
        }
    }

    fn switch(tid: u32, state: &str) -> SchedEvent {
        SchedEvent::Switch {
            thread_id: tid,
            prev_state: state.to_string(),
        }
    }

    #[test]
    fn test_switch_without_history_is_dropped() {
        let mut machine = SchedulerMachine::new(SchedOptions::default().with_running(true));
        let out = machine.process(&header(5, 1.0, "sched:sched_switch"), &switch(5, "S"), &[]);

        assert!(out.is_empty());
        assert_eq!(machine.history_gaps(), 1);
        assert!(!machine.thread_state(5).unwrap().is_sleeping());
    }

    #[test]
    fn test_runnable_switch_moves_sleep_start() {
        let mut machine = SchedulerMachine::new(SchedOptions::default().with_running(true));
        machine.process(&header(5, 1.0, "sched:sched_wakeup_new"), &SchedEvent::WakeupNew { thread_id: 5 }, &[]);
        let out = machine.process(&header(5, 4.0, "sched:sched_switch"), &switch(5, "R"), &[]);

        assert!(out.is_empty());
        let state = machine.thread_state(5).unwrap();
        assert_eq!(state.sleep.as_ref().unwrap().since, 4.0);
        assert_eq!(state.running_since, Some(1.0));
    }

    #[test]
    fn test_counter_value_types() {
        assert_eq!(counter_value("12"), Value::from(12u64));
        assert_eq!(counter_value("1.5"), Value::from(1.5));
        assert_eq!(counter_value("n/a"), Value::from("n/a"));
    }
}
