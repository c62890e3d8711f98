use gil_trace_studio::commands::{
    execute_gil, run_inject, run_offgil, run_sched, validate_timeline_file, GilArgs, OffgilArgs,
};
use gil_trace_studio::output::read_summary;
use gil_trace_studio::snapshot::{parse_snapshot, CallTreeSnapshot};
use gil_trace_studio::stack::{CorrelateOptions, CorrelatorConfig, StackCorrelator};
use gil_trace_studio::timeline::SchedOptions;
use pretty_assertions::assert_eq;
use std::io::{self, Cursor, Write};
use tempfile::tempdir;

fn snapshot() -> CallTreeSnapshot {
    parse_snapshot(
        r#"{"traceEvents": [
            {"ph": "X", "pid": 7, "tid": 7, "ts": 0, "dur": 100, "name": "main (app.py:1)"},
            {"ph": "X", "pid": 7, "tid": 7, "ts": 10, "dur": 50, "name": "compute (app.py:10)"}
        ]}"#,
    )
    .unwrap()
}

fn wakeup(tid: u32, ts: &str) -> String {
    format!(
        "python {tid} [000] {ts} sched:sched_wakeup: comm=python pid={tid} prio=120 target_cpu=000"
    )
}

fn switch(tid: u32, ts: &str, state: &str) -> String {
    format!(
        "python {tid} [000] {ts} sched:sched_switch: prev_comm=python prev_pid={tid} prev_prio=120 \
         prev_state={state} ==> next_comm=swapper/0 next_pid=0 next_prio=120"
    )
}

const GIL_SLEEP_STACK: &str = "\tffffffff8100 __schedule+0x2cc ([kernel.kallsyms])\n\
    \t7f0001 take_gil+0x1c (/usr/bin/python3.9)\n\
    \t7f0002 _PyEval_EvalFrameDefault+0x55 (/usr/bin/python3.9)\n\
    \t7f0003 PyEval_EvalCode+0x20 (/usr/bin/python3.9)\n\
    \t7f0004 Py_RunMain+0x100 (/usr/bin/python3.9)\n\
    \t7f0005 __libc_start_main+0xf3 (/usr/lib/libc-2.31.so)\n";

fn gil_sleep_input() -> String {
    format!(
        "{}\n\n{}\n{}\n{}\n\n",
        wakeup(7, "0.000010:"),
        switch(7, "0.000020:", "S"),
        GIL_SLEEP_STACK,
        wakeup(7, "0.000120:")
    )
}

/// Accepts nothing
struct FailingWriter(io::ErrorKind);

impl Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(self.0, "write failed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(self.0, "flush failed"))
    }
}

#[test]
fn test_offgil_folds_gil_sleeps() {
    let (outcome, stacks) =
        run_offgil(Cursor::new(gil_sleep_input()), &snapshot(), &OffgilArgs::default()).unwrap();

    assert_eq!(outcome.emitted, 1);
    assert_eq!(stacks.len(), 1);
    assert_eq!(
        stacks[0].stack,
        "__libc_start_main;Py_RunMain;py::main::app.py:1;py::compute::app.py:10;take_gil"
    );
    assert_eq!(stacks[0].weight, 100);
}

#[test]
fn test_offgil_keeps_frames_above_take_gil_when_asked() {
    let args = OffgilArgs {
        strip_take_gil: false,
        ..OffgilArgs::default()
    };
    let (_, stacks) = run_offgil(Cursor::new(gil_sleep_input()), &snapshot(), &args).unwrap();

    assert!(stacks[0].stack.ends_with(";take_gil;__schedule"));
}

#[test]
fn test_offgil_skips_unknown_threads_and_other_states() {
    let other_state = OffgilArgs {
        state: "S".to_string(),
        ..OffgilArgs::default()
    };
    let (outcome, stacks) =
        run_offgil(Cursor::new(gil_sleep_input()), &snapshot(), &other_state).unwrap();
    assert_eq!(outcome.emitted, 0);
    assert!(stacks.is_empty());

    let unknown = parse_snapshot(
        r#"{"traceEvents": [{"ph": "X", "pid": 9, "tid": 9, "ts": 0, "dur": 1, "name": "x (a.py:1)"}]}"#,
    )
    .unwrap();
    let (outcome, _) =
        run_offgil(Cursor::new(gil_sleep_input()), &unknown, &OffgilArgs::default()).unwrap();
    assert_eq!(outcome.records, 3);
    assert_eq!(outcome.emitted, 0);
}

#[test]
fn test_inject_rewrites_known_threads() {
    let input = format!(
        "{}\n{}\n\n{}\n\tffff01 __schedule ([kernel.kallsyms])\n\n",
        switch(7, "0.000030:", "S"),
        GIL_SLEEP_STACK.trim_end(),
        switch(8, "0.000030:", "S"),
    );
    let correlator = StackCorrelator::new(CorrelatorConfig::default(), CorrelateOptions::default());

    let mut out = Vec::<u8>::new();
    let outcome = run_inject(Cursor::new(input), &mut out, &snapshot(), &correlator).unwrap();
    assert_eq!(outcome.records, 2);
    assert_eq!(outcome.emitted, 1);

    let text = String::from_utf8(out).unwrap();
    let expected = format!(
        "{}\n\
         \tffffffff8100 __schedule+0x2cc ([kernel.kallsyms])\n\
         \t7f0001 take_gil+0x1c (/usr/bin/python3.9)\n\
         \t000000000000000000000000 py::compute::app.py:10 ([app.py])\n\
         \t000000000000000000000000 py::main::app.py:1 ([app.py])\n\
         \t7f0004 Py_RunMain+0x100 (/usr/bin/python3.9)\n\
         \t7f0005 __libc_start_main+0xf3 (/usr/lib/libc-2.31.so)\n\
         \n\
         {}\n\
         \tffff01 __schedule ([kernel.kallsyms])\n\
         \n",
        switch(7, "0.000030:", "S"),
        switch(8, "0.000030:", "S"),
    );
    assert_eq!(text, expected);
}

#[test]
fn test_inject_mismatch_fails() {
    // Eval loop in the native stack but the snapshot has nothing at 500us
    let input = format!("{}\n{}\n", switch(7, "0.000500:", "S"), GIL_SLEEP_STACK);
    let correlator = StackCorrelator::new(CorrelatorConfig::default(), CorrelateOptions::default());

    let err = run_inject(Cursor::new(input), Vec::<u8>::new(), &snapshot(), &correlator).unwrap_err();
    assert!(format!("{:#}", err).contains("could not be matched"));
}

#[test]
fn test_closed_pipe_stops_gracefully() {
    let input = format!("{}\n\n{}\n\n", wakeup(1, "0.000001:"), switch(1, "0.000002:", "S"));
    let options = SchedOptions::default().with_running(true);

    let outcome = run_sched(
        Cursor::new(input.clone()),
        FailingWriter(io::ErrorKind::BrokenPipe),
        &options,
    )
    .unwrap();
    assert!(outcome.stopped_early);
    assert_eq!(outcome.emitted, 0);

    let result = run_sched(
        Cursor::new(input),
        FailingWriter(io::ErrorKind::PermissionDenied),
        &options,
    );
    assert!(result.is_err());
}

#[test]
fn test_validate_timeline_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sched.json");
    let input = format!("{}\n\n{}\n\n", wakeup(1, "0.000001:"), switch(1, "0.000002:", "S"));

    let file = std::fs::File::create(&path).unwrap();
    run_sched(Cursor::new(input), file, &SchedOptions::default().with_running(true)).unwrap();

    let counts = validate_timeline_file(&path).unwrap();
    assert_eq!(counts.get("X"), Some(&1));
    assert_eq!(counts.len(), 1);

    std::fs::write(&path, "{\"traceEvents\": [").unwrap();
    assert!(validate_timeline_file(&path).is_err());
}

#[test]
fn test_execute_gil_with_files() {
    let dir = tempdir().unwrap();
    let input_path = dir.path().join("gil.txt");
    let timeline_path = dir.path().join("out/gil.json");
    let summary_path = dir.path().join("out/summary.json");

    std::fs::write(
        &input_path,
        "python 7 [000] 0.000000: python:take_gil: (55d0a1b2c3d4)\n\
         python 7 [000] 0.000002: python:take_gil__return: (55d0a1b2c3d4)\n\
         python 7 [000] 0.000010: python:drop_gil__return: (55d0a1b2c3d4)\n",
    )
    .unwrap();

    let (outcome, summary) = execute_gil(GilArgs {
        input: Some(input_path),
        output: Some(timeline_path.clone()),
        summary_json: Some(summary_path.clone()),
        ..GilArgs::default()
    })
    .unwrap();

    assert_eq!(outcome.records, 3);
    assert!(validate_timeline_file(&timeline_path).is_ok());

    let written = read_summary(&summary_path).unwrap();
    assert_eq!(written.threads, summary.threads);
    let stats = written.thread(7).unwrap();
    assert_eq!(stats.waiting_us, 2.0);
    assert_eq!(stats.holding_us, 8.0);
}
