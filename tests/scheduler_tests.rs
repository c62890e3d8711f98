use gil_trace_studio::commands::run_sched;
use gil_trace_studio::parser::{Phase, RawRecord, TraceDocument, TrackId};
use gil_trace_studio::timeline::{SchedOptions, SchedulerMachine};
use pretty_assertions::assert_eq;
use std::io::Cursor;

fn record(header: &str, frames: &[&str]) -> RawRecord {
    RawRecord {
        header: header.to_string(),
        frames: frames.iter().map(|f| f.to_string()).collect(),
    }
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

fn convert(input: &str, options: &SchedOptions) -> TraceDocument {
    let mut out = Vec::<u8>::new();
    let outcome = run_sched(Cursor::new(input), &mut out, options).unwrap();
    assert!(!outcome.stopped_early);
    serde_json::from_slice(&out).unwrap()
}

#[test]
fn test_running_segment_has_exact_duration() {
    let input = format!(
        "{}\n\n{}\n\tffffffff8100 __schedule+0x2cc ([kernel.kallsyms])\n\n",
        wakeup(100, "0.000010:"),
        switch(100, "0.000015:", "S")
    );
    let doc = convert(&input, &SchedOptions::default().with_running(true));

    assert_eq!(doc.trace_events.len(), 1);
    let event = &doc.trace_events[0];
    assert_eq!(event.tid, Some(TrackId::Id(100)));
    assert_eq!(event.pid, TrackId::Id(100));
    assert_eq!(event.ts, 10.0);
    assert_eq!(event.dur, Some(5.0));
    assert_eq!(event.name, "R");
    assert_eq!(event.ph, Phase::Complete);
}

#[test]
fn test_running_is_off_by_default() {
    let input = format!("{}\n\n{}\n\n", wakeup(100, "0.000010:"), switch(100, "0.000015:", "S"));
    assert!(convert(&input, &SchedOptions::default()).trace_events.is_empty());
}

#[test]
fn test_runnable_switch_emits_nothing_but_moves_sleep_start() {
    let mut machine = SchedulerMachine::new(SchedOptions::default().with_running(true));
    machine.process_record(&record(&wakeup(5, "0.000010:"), &[])).unwrap();

    let out = machine
        .process_record(&record(&switch(5, "0.000020:", "R+"), &["1 preempt"]))
        .unwrap();
    assert!(out.is_empty());

    let state = machine.thread_state(5).unwrap();
    let sleep = state.sleep.as_ref().unwrap();
    assert_eq!(sleep.since, 20.0);
    assert_eq!(sleep.stack, vec!["1 preempt".to_string()]);
}

#[test]
fn test_sleep_named_after_cause() {
    let mut machine = SchedulerMachine::new(SchedOptions::default());
    machine.process_record(&record(&wakeup(7, "0.000010:"), &[])).unwrap();
    machine.process_record(&record(&wakeup(8, "0.000010:"), &[])).unwrap();

    machine
        .process_record(&record(
            &switch(7, "0.000020:", "S"),
            &["ffff01 __schedule ([kernel.kallsyms])", "7f01 take_gil+0x1c (python3)"],
        ))
        .unwrap();
    machine
        .process_record(&record(
            &switch(8, "0.000020:", "S"),
            &["ffff01 __schedule ([kernel.kallsyms])", "7f02 futex_wait (libc.so.6)"],
        ))
        .unwrap();

    // The wakeup's own stack does not matter, the one captured at switch-out does
    let gil = machine
        .process_record(&record(&wakeup(7, "0.000100:"), &["7f09 other"]))
        .unwrap();
    let plain = machine
        .process_record(&record(&wakeup(8, "0.000200:"), &[]))
        .unwrap();

    assert_eq!(gil.len(), 1);
    assert_eq!(gil[0].event.name, "S(GIL)");
    assert_eq!(gil[0].event.cname.as_deref(), Some("terrible"));
    assert_eq!(gil[0].event.ts, 20.0);
    assert_eq!(gil[0].event.dur, Some(80.0));
    assert_eq!(gil[0].stack.len(), 2);

    assert_eq!(plain.len(), 1);
    assert_eq!(plain[0].event.name, "S");
    assert_eq!(plain[0].event.cname.as_deref(), Some("bad"));
    assert_eq!(plain[0].event.cat.as_deref(), Some("process state"));
}

#[test]
fn test_forked_threads_grouped_under_parent() {
    let input = format!(
        "python 10 [000] 0.000001: sched:sched_process_fork: comm=python pid=10 child_comm=python child_pid=11\n\n\
         {}\n\n{}\n\n",
        wakeup(11, "0.000010:"),
        switch(11, "0.000030:", "D")
    );
    let doc = convert(&input, &SchedOptions::default().with_running(true));

    assert_eq!(doc.trace_events.len(), 1);
    assert_eq!(doc.trace_events[0].pid, TrackId::Id(10));
    assert_eq!(doc.trace_events[0].tid, Some(TrackId::Id(11)));
}

#[test]
fn test_perf4_layout() {
    let input = "python 100 [000] 0.000010: sched:sched_wakeup: python:100 [120] success=1 CPU:000\n\n\
                 python 100 [000] 0.000025: sched:sched_switch: python:100 [120] S ==> swapper/0:0 [120]\n\n";
    let doc = convert(input, &SchedOptions::default().with_running(true));

    assert_eq!(doc.trace_events.len(), 1);
    assert_eq!(doc.trace_events[0].dur, Some(15.0));
}

#[test]
fn test_counters_and_all_tracepoints() {
    let input = "python 100 0.000010: 250000 cycles: \n\n\
                 python 100 [000] 0.000011: irq:irq_handler_entry: irq=5 name=eth0\n\n";
    let options = SchedOptions {
        all_tracepoints: true,
        ..SchedOptions::default()
    };
    let doc = convert(input, &options);

    assert_eq!(doc.trace_events.len(), 2);
    let counter = &doc.trace_events[0];
    assert_eq!(counter.ph, Phase::Counter);
    assert_eq!(counter.pid, TrackId::Label("counters".to_string()));
    assert_eq!(
        counter.args.as_ref().unwrap().get("cycles"),
        Some(&serde_json::Value::from(250000u64))
    );

    let instant = &doc.trace_events[1];
    assert_eq!(instant.ph, Phase::Instant);
    assert_eq!(instant.name, "irq:irq_handler_entry");
    assert_eq!(instant.s.as_deref(), Some("g"));
}

#[test]
fn test_malformed_header_aborts_unless_skipped() {
    let input = "python 100 [000] 0.000010: sched:sched_switch: prev_comm=python\n\n";

    let mut out = Vec::<u8>::new();
    let err = run_sched(Cursor::new(input), &mut out, &SchedOptions::default()).unwrap_err();
    assert!(format!("{:#}", err).contains("sched:sched_switch"));

    let options = SchedOptions {
        skip_malformed: true,
        ..SchedOptions::default()
    };
    assert!(convert(input, &options).trace_events.is_empty());
}
