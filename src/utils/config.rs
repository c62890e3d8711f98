//! Configuration and constants for the CLI.

/// Current output schema version (GIL summary JSON)
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Time unit conversion for perf timestamps (seconds -> microseconds)
pub const MICROS_PER_SECOND: f64 = 1e6;

// Scheduler tracepoint names as printed by `perf script`
pub const SCHED_SWITCH: &str = "sched:sched_switch";
pub const SCHED_WAKEUP: &str = "sched:sched_wakeup";
pub const SCHED_WAKEUP_NEW: &str = "sched:sched_wakeup_new";
pub const SCHED_PROCESS_FORK: &str = "sched:sched_process_fork";
pub const SCHED_PROCESS_EXEC: &str = "sched:sched_process_exec";

/// `prev_state` values meaning the task was preempted while still runnable
pub const RUNNABLE_STATES: &[&str] = &["R", "R+"];

/// Function whose presence in a sleep stack means the thread waited for the GIL
pub const LOCK_ACQUIRE_FUNCTION: &str = "take_gil";

// Default uprobe patterns for the GIL (anchored at the start, like re.match)
pub const TAKE_PROBE: &str = r"^python:take_gil(_\d)?$";
pub const TAKE_PROBE_RETURN: &str = r"^python:take_gil__return";
pub const DROP_PROBE: &str = r"^python:drop_gil(_\d)?$";
pub const DROP_PROBE_RETURN: &str = r"^python:drop_gil__return";

/// GIL holds shorter than this are not drawn (still counted in the summary)
pub const DEFAULT_MIN_HOLD_US: f64 = 1.0;

/// Added to the hold start so begin sorts after the take instant (1 ns)
pub const FLOW_JITTER_US: f64 = 1e-3;

// Native frames delimiting the CPython evaluation loop.
// A slice starts with an entry marker and extends over continuation markers.
pub const EVAL_ENTRY_MARKERS: &[&str] = &["PyEval_Eval"];
pub const EVAL_CONTINUATION_MARKERS: &[&str] = &[
    "PyEval_Eval",
    "PyFunction_FastCall",
    "function_code_fastcall",
    "method_call",
    "call_function",
    "PyCFunction_FastCall",
    "PyObject_FastCall",
];

/// Thread bootstrap/teardown helpers that commonly cause harmless mismatches
pub const KNOWN_BENIGN_MISMATCH_MARKERS: &[&str] = &[
    "pythread_wrapper",
    "switch_fpu_return",
    "do_fork",
    "ret_from_fork",
    "start_thread",
];

/// Any frame containing this is interpreter-internal code
pub const INTERPRETER_INTERNAL_MARKER: &str = "_Py";

/// Placeholder address for frames synthesized from the snapshot
pub const SYNTHETIC_FRAME_ADDRESS: &str = "000000000000000000000000";

// Tags for rendered frames
pub const INTERPRETED_TAG: &str = "py";
pub const NATIVE_EXTENSION_TAG: &str = "cext";
pub const EVAL_FRAME_TAG: &str = "cpyeval";
