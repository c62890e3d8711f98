use crate::output::FlamegraphConfig;
use crate::stack::CorrelateOptions;
use crate::timeline::{GilConfig, SchedOptions};
use crate::timeline::scheduler::SLEEPING_ON_GIL;
use std::path::PathBuf;

/// Arguments for the sched command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone, Default)]
pub struct SchedArgs {
    /// perf script text, stdin when `None` or `-`
    pub input: Option<PathBuf>,

    /// Timeline JSON, stdout when `None` or `-`
    pub output: Option<PathBuf>,

    pub options: SchedOptions,
}

/// Arguments for the gil command
#[derive(Debug, Clone, Default)]
pub struct GilArgs {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub config: GilConfig,

    /// Log and skip undecodable lines instead of aborting
    pub skip_malformed: bool,

    /// Also write the per-thread breakdown as JSON
    pub summary_json: Option<PathBuf>,
}

/// Arguments for the inject command
#[derive(Debug, Clone)]
pub struct InjectArgs {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,

    /// VizTracer JSON
    pub snapshot: PathBuf,

    pub correlate: CorrelateOptions,
}

impl Default for InjectArgs {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            snapshot: PathBuf::from("viztracer.json"),
            correlate: CorrelateOptions::default(),
        }
    }
}

/// Arguments for the offgil command
#[derive(Debug, Clone)]
pub struct OffgilArgs {
    pub input: Option<PathBuf>,

    /// Collapsed stacks, stdout when `None` or `-`
    pub output: Option<PathBuf>,

    pub snapshot: PathBuf,
    pub correlate: CorrelateOptions,

    /// Sleep event name to collect
    pub state: String,

    /// Drop frames above the GIL acquire function
    pub strip_take_gil: bool,

    pub skip_malformed: bool,

    /// Also render an SVG flamegraph here
    pub flamegraph: Option<PathBuf>,
    pub flamegraph_config: FlamegraphConfig,
}

impl Default for OffgilArgs {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            snapshot: PathBuf::from("viztracer.json"),
            correlate: CorrelateOptions::default(),
            state: SLEEPING_ON_GIL.to_string(),
            strip_take_gil: true,
            skip_malformed: false,
            flamegraph: None,
            flamegraph_config: FlamegraphConfig::default(),
        }
    }
}

/// What a conversion pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// Records (or lines) read
    pub records: usize,

    /// Events or stacks written
    pub emitted: usize,

    /// Output pipe closed before the input ended
    pub stopped_early: bool,
}
