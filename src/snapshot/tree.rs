//! Per-thread call trees with time-based lookup.

use std::collections::{HashMap, HashSet};

/// Index of a frame in a snapshot
pub type FrameId = usize;

/// One call in the language-level trace
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFrame {
    /// Short function name (`fib`, `builtins.print`)
    pub function: String,

    /// Name exactly as recorded (`fib (/src/app.py:3)`)
    pub full_name: String,

    pub filename: Option<String>,
    pub line: Option<u32>,

    /// C code called from Python rather than Python code
    pub is_native_extension: bool,

    /// Start/end relative to the snapshot origin, microseconds
    pub start_us: f64,
    pub end_us: f64,

    pub parent: Option<FrameId>,
    pub children: Vec<FrameId>,
}

impl SnapshotFrame {
    fn contains(&self, ts: f64) -> bool {
        self.start_us <= ts && ts <= self.end_us
    }
}

/// Read-only query interface into a language-level snapshot
pub trait LanguageSnapshot {
    /// Innermost frame running on `thread_id` at `timestamp_us` (relative to
    /// the origin)
    fn active_frame(&self, thread_id: u32, timestamp_us: f64) -> Option<FrameId>;

    fn frame(&self, id: FrameId) -> &SnapshotFrame;

    /// Whether the snapshot knows this process or thread id
    fn contains_thread(&self, thread_id: u32) -> bool;

    /// Earliest timestamp in the snapshot, absolute microseconds
    fn origin_us(&self) -> f64;
}

/// Frames from the active one at `timestamp_us` up to its root, innermost first
pub fn call_chain<S: LanguageSnapshot + ?Sized>(
    snapshot: &S,
    thread_id: u32,
    timestamp_us: f64,
) -> Vec<&SnapshotFrame> {
    let mut chain = Vec::new();
    let mut current = snapshot.active_frame(thread_id, timestamp_us);
    while let Some(id) = current {
        let frame = snapshot.frame(id);
        chain.push(frame);
        current = frame.parent;
    }
    chain
}

/// A complete call, absolute times in microseconds
#[derive(Debug, Clone, PartialEq)]
pub struct CallSpan {
    pub process_id: u32,
    pub thread_id: u32,
    pub start_us: f64,
    pub duration_us: f64,
    pub function: String,
    pub full_name: String,
    pub filename: Option<String>,
    pub line: Option<u32>,
    pub is_native_extension: bool,
}

/// Arena of call trees, one forest per thread
#[derive(Debug, Clone, Default)]
pub struct CallTreeSnapshot {
    frames: Vec<SnapshotFrame>,
    roots: HashMap<u32, Vec<FrameId>>,
    known_ids: HashSet<u32>,
    origin_us: f64,
}

impl CallTreeSnapshot {
    /// Nest calls by time interval
    ///
    /// A call is a child of the innermost open call it starts in.
    pub fn from_spans(origin_us: f64, mut spans: Vec<CallSpan>) -> Self {
        // Parents first: earlier start, then longer duration
        spans.sort_by(|a, b| {
            a.thread_id
                .cmp(&b.thread_id)
                .then(a.start_us.total_cmp(&b.start_us))
                .then(b.duration_us.total_cmp(&a.duration_us))
        });

        let mut snapshot = Self {
            origin_us,
            ..Default::default()
        };
        let mut open: Vec<FrameId> = Vec::new();
        let mut open_thread = None;

        for span in spans {
            snapshot.known_ids.insert(span.process_id);
            snapshot.known_ids.insert(span.thread_id);

            if open_thread != Some(span.thread_id) {
                open.clear();
                open_thread = Some(span.thread_id);
            }

            let start_us = span.start_us - origin_us;
            let end_us = start_us + span.duration_us;

            while let Some(&top) = open.last() {
                if start_us >= snapshot.frames[top].end_us {
                    open.pop();
                } else {
                    break;
                }
            }

            let id = snapshot.frames.len();
            let parent = open.last().copied();
            snapshot.frames.push(SnapshotFrame {
                function: span.function,
                full_name: span.full_name,
                filename: span.filename,
                line: span.line,
                is_native_extension: span.is_native_extension,
                start_us,
                end_us,
                parent,
                children: Vec::new(),
            });

            match parent {
                Some(parent) => snapshot.frames[parent].children.push(id),
                None => snapshot.roots.entry(span.thread_id).or_default().push(id),
            }
            open.push(id);
        }

        snapshot
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Thread ids that have call trees
    pub fn threads(&self) -> impl Iterator<Item = u32> + '_ {
        self.roots.keys().copied()
    }

    /// Sibling (sorted by start) running at `ts`
    fn find_in(&self, siblings: &[FrameId], ts: f64) -> Option<FrameId> {
        let idx = siblings.partition_point(|&id| self.frames[id].start_us <= ts);
        let candidate = *siblings.get(idx.checked_sub(1)?)?;
        self.frames[candidate].contains(ts).then_some(candidate)
    }
}

impl LanguageSnapshot for CallTreeSnapshot {
    fn active_frame(&self, thread_id: u32, timestamp_us: f64) -> Option<FrameId> {
        let roots = self.roots.get(&thread_id)?;
        let mut current = self.find_in(roots, timestamp_us)?;
        while let Some(child) = self.find_in(&self.frames[current].children, timestamp_us) {
            current = child;
        }
        Some(current)
    }

    fn frame(&self, id: FrameId) -> &SnapshotFrame {
        &self.frames[id]
    }

    fn contains_thread(&self, thread_id: u32) -> bool {
        self.known_ids.contains(&thread_id)
    }

    fn origin_us(&self) -> f64 {
        self.origin_us
    }
}
