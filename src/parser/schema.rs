//! Output JSON schema definitions for timeline data.
//!
//! Follows the Trace Event Format understood by chrome://tracing, Perfetto
//! and VizTracer's report builder, so our output can be merged with theirs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Top-level document written to JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceDocument {
    #[serde(rename = "traceEvents")]
    pub trace_events: Vec<TimelineEvent>,
}

/// Process or thread row in the timeline
///
/// Usually a numeric id, but some rows are labels (`"counters"`,
/// `"1234-GIL"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackId {
    Id(u32),
    Label(String),
}

impl From<u32> for TrackId {
    fn from(id: u32) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for TrackId {
    fn from(label: &str) -> Self {
        Self::Label(label.to_string())
    }
}

impl From<String> for TrackId {
    fn from(label: String) -> Self {
        Self::Label(label)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Label(label) => f.write_str(label),
        }
    }
}

/// Event phase (`ph`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "X")]
    Complete,
    #[serde(rename = "i")]
    Instant,
    #[serde(rename = "b")]
    AsyncBegin,
    #[serde(rename = "e")]
    AsyncEnd,
    #[serde(rename = "B")]
    Begin,
    #[serde(rename = "E")]
    End,
    #[serde(rename = "C")]
    Counter,
}

impl Phase {
    /// The `ph` letter
    pub fn code(&self) -> &'static str {
        match self {
            Phase::Complete => "X",
            Phase::Instant => "i",
            Phase::AsyncBegin => "b",
            Phase::AsyncEnd => "e",
            Phase::Begin => "B",
            Phase::End => "E",
            Phase::Counter => "C",
        }
    }

    /// Begin/end pair for a flow, async ones nest above the thread's events
    pub fn flow_pair(as_async: bool) -> (Phase, Phase) {
        if as_async {
            (Phase::AsyncBegin, Phase::AsyncEnd)
        } else {
            (Phase::Begin, Phase::End)
        }
    }
}

/// A single timeline event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub pid: TrackId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<TrackId>,

    /// Start time in microseconds
    pub ts: f64,

    /// Duration in microseconds (complete events only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur: Option<f64>,

    pub ph: Phase,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cat: Option<String>,

    /// Instant scope: "t" thread, "p" process, "g" global
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,

    /// Flow correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Reserved color name ("good", "bad", "terrible", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
}

impl TimelineEvent {
    pub fn new(pid: impl Into<TrackId>, ts: f64, ph: Phase, name: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            tid: None,
            ts,
            dur: None,
            ph,
            name: name.into(),
            cat: None,
            s: None,
            args: None,
            id: None,
            cname: None,
        }
    }

    /// Complete (`X`) event spanning `[ts, ts + dur)`
    pub fn complete(
        pid: impl Into<TrackId>,
        tid: impl Into<TrackId>,
        ts: f64,
        dur: f64,
        name: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(pid, ts, Phase::Complete, name).with_tid(tid);
        event.dur = Some(dur);
        event
    }

    /// Instant (`i`) event with the given scope
    pub fn instant(
        pid: impl Into<TrackId>,
        tid: impl Into<TrackId>,
        ts: f64,
        name: impl Into<String>,
        scope: &str,
    ) -> Self {
        let mut event = Self::new(pid, ts, Phase::Instant, name).with_tid(tid);
        event.s = Some(scope.to_string());
        event
    }

    pub fn with_tid(mut self, tid: impl Into<TrackId>) -> Self {
        self.tid = Some(tid.into());
        self
    }

    pub fn with_category(mut self, cat: impl Into<String>) -> Self {
        self.cat = Some(cat.into());
        self
    }

    pub fn with_color(mut self, cname: impl Into<String>) -> Self {
        self.cname = Some(cname.into());
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Thread id as a number, when the row is not a label
    pub fn thread_id(&self) -> Option<u32> {
        match &self.tid {
            Some(TrackId::Id(id)) => Some(*id),
            Some(TrackId::Label(label)) => label.parse().ok(),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_event_fields() {
        let event = TimelineEvent::complete(1u32, 100u32, 10.0, 5.0, "R").with_category("process state");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(
            value,
            json!({"pid": 1, "tid": 100, "ts": 10.0, "dur": 5.0, "ph": "X", "name": "R", "cat": "process state"})
        );
    }

    #[test]
    fn test_label_tracks_and_phases() {
        let event = TimelineEvent::new("7-GIL", 1.5, Phase::Begin, "GIL")
            .with_tid("7")
            .with_id(1500)
            .with_arg("duration", "3 us");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["pid"], json!("7-GIL"));
        assert_eq!(value["ph"], json!("B"));
        assert_eq!(value["id"], json!(1500));
        assert_eq!(value["args"]["duration"], json!("3 us"));
        assert!(value.get("dur").is_none());
        assert_eq!(event.thread_id(), Some(7));
    }

    #[test]
    fn test_flow_pair() {
        assert_eq!(Phase::flow_pair(true), (Phase::AsyncBegin, Phase::AsyncEnd));
        assert_eq!(Phase::flow_pair(false), (Phase::Begin, Phase::End));
    }
}
