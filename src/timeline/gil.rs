//! GIL ownership from CPython uprobes.
//!
//! Four probes are recorded with `perf record -e 'python:*gil*'`:
//! `take_gil` (wants the GIL), `take_gil__return` (got it), `drop_gil`
//! (wants to release) and `drop_gil__return` (released). From those we draw
//! hold intervals per thread and sum up hold and wait time.

use crate::parser::{DecodedHeader, Phase, TimelineEvent, TrackId};
use crate::utils::config::{
    DEFAULT_MIN_HOLD_US, DROP_PROBE, DROP_PROBE_RETURN, FLOW_JITTER_US, SCHEMA_VERSION, TAKE_PROBE,
    TAKE_PROBE_RETURN,
};
use crate::utils::error::Anomaly;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

pub const CATEGORY_GIL: &str = "GIL state";

/// Which probe an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GilProbe {
    WantAcquire,
    AcquireConfirmed,
    WantRelease,
    ReleaseConfirmed,
    Unrecognized,
}

/// Probe name patterns
#[derive(Debug, Clone)]
pub struct ProbePatterns {
    take: Regex,
    take_return: Regex,
    drop: Regex,
    drop_return: Regex,
}

impl ProbePatterns {
    /// Build from custom patterns
    ///
    /// # Errors
    /// Returns the regex error for the first invalid pattern
    pub fn new(
        take: &str,
        take_return: &str,
        drop: &str,
        drop_return: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            take: Regex::new(take)?,
            take_return: Regex::new(take_return)?,
            drop: Regex::new(drop)?,
            drop_return: Regex::new(drop_return)?,
        })
    }

    /// Classify an event name, entry probes are checked before return probes
    pub fn classify(&self, event_name: &str) -> GilProbe {
        if self.take.is_match(event_name) {
            GilProbe::WantAcquire
        } else if self.take_return.is_match(event_name) {
            GilProbe::AcquireConfirmed
        } else if self.drop.is_match(event_name) {
            GilProbe::WantRelease
        } else if self.drop_return.is_match(event_name) {
            GilProbe::ReleaseConfirmed
        } else {
            GilProbe::Unrecognized
        }
    }
}

impl Default for ProbePatterns {
    fn default() -> Self {
        // The built-in patterns are constants known to compile
        Self {
            take: Regex::new(TAKE_PROBE).expect("valid take probe pattern"),
            take_return: Regex::new(TAKE_PROBE_RETURN).expect("valid take return pattern"),
            drop: Regex::new(DROP_PROBE).expect("valid drop probe pattern"),
            drop_return: Regex::new(DROP_PROBE_RETURN).expect("valid drop return pattern"),
        }
    }
}

/// GIL conversion configuration
#[derive(Debug, Clone)]
pub struct GilConfig {
    pub probes: ProbePatterns,

    /// Async (`b`/`e`) flows draw above the thread's events, sync (`B`/`E`)
    /// ones go to a separate `<pid>-GIL` process row
    pub as_async: bool,

    /// Emit GIL-take / GIL-drop instants
    pub show_instant: bool,

    /// Only draw the hold itself, not the take/drop request phases
    pub only_lock: bool,

    /// Holds shorter than this are not drawn
    pub min_hold_us: f64,
}

impl Default for GilConfig {
    fn default() -> Self {
        Self {
            probes: ProbePatterns::default(),
            as_async: true,
            show_instant: true,
            only_lock: false,
            min_hold_us: DEFAULT_MIN_HOLD_US,
        }
    }
}

impl GilConfig {
    pub fn with_async(mut self, as_async: bool) -> Self {
        self.as_async = as_async;
        self
    }

    pub fn with_only_lock(mut self, only_lock: bool) -> Self {
        self.only_lock = only_lock;
        self
    }

    pub fn with_min_hold(mut self, min_hold_us: f64) -> Self {
        self.min_hold_us = min_hold_us;
        self
    }
}

/// Timestamps of one thread's interaction with the GIL
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LockOwnership {
    pub wants_acquire: Option<f64>,
    pub holds_since: Option<f64>,
    pub wants_release: Option<f64>,
    pub first_seen: f64,
    pub last_seen: f64,
    pub hold_us: f64,
    pub wait_us: f64,
}

/// GIL state machine
#[derive(Debug)]
pub struct GilMachine {
    config: GilConfig,
    threads: BTreeMap<u32, LockOwnership>,
    /// First thread seen, taken as the traced process
    process_id: Option<u32>,
    first_timestamp: Option<f64>,
    ignored: HashSet<String>,
    anomalies: Vec<Anomaly>,
}

impl GilMachine {
    pub fn new(config: GilConfig) -> Self {
        Self {
            config,
            threads: BTreeMap::new(),
            process_id: None,
            first_timestamp: None,
            ignored: HashSet::new(),
            anomalies: Vec::new(),
        }
    }

    /// Apply one decoded probe event
    ///
    /// **Public** - main entry point for the gil converter
    pub fn process(&mut self, header: &DecodedHeader) -> Vec<TimelineEvent> {
        let tid = header.thread_id;
        let now = header.timestamp_us;
        let pid = *self.process_id.get_or_insert(tid);
        let first = *self.first_timestamp.get_or_insert(now);

        let probe = self.config.probes.classify(&header.event_name);
        if probe == GilProbe::Unrecognized {
            if self.ignored.insert(header.event_name.clone()) {
                info!("ignoring {}", header.event_name);
            }
            return Vec::new();
        }

        let thread = self.threads.entry(tid).or_insert_with(|| LockOwnership {
            first_seen: now,
            last_seen: now,
            ..Default::default()
        });
        thread.first_seen = thread.first_seen.min(now);
        thread.last_seen = thread.last_seen.max(now);

        match probe {
            GilProbe::WantAcquire => {
                thread.wants_acquire = Some(now);
                vec![gil_instant(pid, tid, now, "take", "bad")]
            }
            GilProbe::AcquireConfirmed => {
                self.acquire(tid, now);
                Vec::new()
            }
            GilProbe::WantRelease => {
                thread.wants_release = Some(now);
                vec![gil_instant(pid, tid, now, "drop", "bad")]
            }
            GilProbe::ReleaseConfirmed => self.release(pid, tid, now, first),
            GilProbe::Unrecognized => Vec::new(),
        }
    }

    fn acquire(&mut self, tid: u32, now: f64) {
        for (&holder, other) in &self.threads {
            if holder == tid {
                continue;
            }
            let Some(since) = other.holds_since else {
                continue;
            };
            let gap = now - since;
            if gap < 0.0 {
                let anomaly = Anomaly::LockOwnershipOverlap {
                    holder,
                    thread_id: tid,
                    overlap_us: -gap,
                };
                warn!("Anomaly: {}", anomaly);
                self.anomalies.push(anomaly);
            }
        }

        if let Some(thread) = self.threads.get_mut(&tid) {
            thread.holds_since = Some(now);
            let wanted = thread.wants_acquire.unwrap_or(now);
            thread.wait_us += now - thread.first_seen.max(wanted);
        }
    }

    fn release(&mut self, pid: u32, tid: u32, now: f64, first: f64) -> Vec<TimelineEvent> {
        let Some(thread) = self.threads.get_mut(&tid) else {
            return Vec::new();
        };

        let take = match thread.holds_since.take() {
            Some(take) => take,
            None => {
                let anomaly = Anomaly::DropWithoutTake { thread_id: tid };
                warn!("Anomaly: {}", anomaly);
                self.anomalies.push(anomaly);
                first
            }
        };

        let duration = now - take;
        thread.hold_us += duration;
        // Requests belong to this hold only, a later take must not reuse them
        let wants_acquire = thread.wants_acquire.take();
        let wants_release = thread.wants_release.take();

        if duration < self.config.min_hold_us {
            debug!("Ignoring {}us duration GIL lock", duration);
            return Vec::new();
        }

        let label = format!("{} us", duration);
        let mut events = Vec::new();

        if self.config.show_instant {
            // Both instants go out only after the drop, so 0 duration holds can be skipped
            events.push(gil_instant(pid, tid.to_string(), take, "GIL-take", "terrible"));
            events.push(
                gil_instant(pid, tid.to_string(), now, "GIL-drop", "good")
                    .with_arg("duration", label.clone()),
            );
        }

        let (begin, end) = Phase::flow_pair(self.config.as_async);
        let id = flow_id(now);
        let track = if self.config.as_async {
            TrackId::Id(pid)
        } else {
            TrackId::Label(format!("{}-GIL", pid))
        };
        let flow = |ph: Phase, ts: f64, name: &str, color: &str| {
            TimelineEvent::new(track.clone(), ts, ph, name)
                .with_tid(tid.to_string())
                .with_category(CATEGORY_GIL)
                .with_arg("duration", label.clone())
                .with_id(id)
                .with_color(color)
        };

        let show_requests = !self.config.only_lock;
        // [called take [got it [still dropping]]]
        if let (true, Some(wanted)) = (show_requests, wants_acquire) {
            events.push(flow(begin, wanted, "GIL(take)", "bad"));
        }
        events.push(flow(begin, take + FLOW_JITTER_US, "GIL", "terrible"));
        if let (true, Some(dropping)) = (show_requests, wants_release) {
            events.push(flow(begin, dropping, "GIL(drop)", "terrible"));
            events.push(flow(end, now, "GIL(drop)", "terrible"));
        }
        events.push(flow(end, now, "GIL", "terrible"));
        if let (true, Some(_)) = (show_requests, wants_acquire) {
            events.push(flow(end, now, "GIL(take)", "bad"));
        }

        events
    }

    /// Anomalies logged so far
    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn ownership(&self, tid: u32) -> Option<&LockOwnership> {
        self.threads.get(&tid)
    }

    /// Close the pass and compute the per-thread breakdown
    pub fn finish(self) -> GilSummary {
        let threads = self
            .threads
            .iter()
            .map(|(&tid, t)| ThreadLockStats::new(tid, t.last_seen - t.first_seen, t.hold_us, t.wait_us))
            .collect();

        GilSummary {
            version: SCHEMA_VERSION.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            anomalies: self.anomalies.len(),
            threads,
        }
    }
}

/// Request instants share the scheduler rows (numeric tid), hold instants use
/// a label so they group with the flows
fn gil_instant(
    pid: u32,
    tid: impl Into<TrackId>,
    ts: f64,
    name: &str,
    color: &str,
) -> TimelineEvent {
    TimelineEvent::instant(pid, tid, ts, name, "t")
        .with_category(CATEGORY_GIL)
        .with_color(color)
}

/// Flow ids are the release time in nanoseconds, unique per hold
fn flow_id(release_us: f64) -> u64 {
    (release_us * 1e3).round() as u64
}

/// Hold/wait breakdown of one thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadLockStats {
    pub thread_id: u32,
    pub total_us: f64,
    pub holding_us: f64,
    pub waiting_us: f64,
    pub neither_us: f64,
    pub holding_pct: f64,
    pub waiting_pct: f64,
    pub neither_pct: f64,
}

impl ThreadLockStats {
    pub fn new(thread_id: u32, total_us: f64, holding_us: f64, waiting_us: f64) -> Self {
        let neither_us = total_us - holding_us - waiting_us;
        let pct = |part: f64| if total_us > 0.0 { part / total_us * 100.0 } else { 0.0 };
        Self {
            thread_id,
            total_us,
            holding_us,
            waiting_us,
            neither_us,
            holding_pct: pct(holding_us),
            waiting_pct: pct(waiting_us),
            neither_pct: pct(neither_us),
        }
    }
}

/// End-of-stream GIL report, separate from the event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GilSummary {
    pub version: String,
    pub generated_at: String,
    pub anomalies: usize,
    pub threads: Vec<ThreadLockStats>,
}

impl GilSummary {
    pub fn thread(&self, tid: u32) -> Option<&ThreadLockStats> {
        self.threads.iter().find(|t| t.thread_id == tid)
    }

    /// Per-thread totals keyed by thread id
    pub fn by_thread(&self) -> HashMap<u32, &ThreadLockStats> {
        self.threads.iter().map(|t| (t.thread_id, t)).collect()
    }
}

impl fmt::Display for GilSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Summary of threads:")?;
        writeln!(f)?;
        writeln!(
            f,
            "{:>10} {:>14} {:>9} {:>10} {:>11}",
            "TID", "total(us)", "no gil%", "has gil%", "gil wait%"
        )?;
        writeln!(f, "{}", "-".repeat(58))?;
        for t in &self.threads {
            writeln!(
                f,
                "{:>10} {:>14.1} {:>9.1} {:>10.1} {:>11.1}",
                t.thread_id, t.total_us, t.neither_pct, t.holding_pct, t.waiting_pct
            )?;
        }
        writeln!(f)?;
        write!(
            f,
            "High 'no gil' is good, we like low 'has gil', and we don't want 'gil wait'."
        )
    }
}
