use gil_trace_studio::snapshot::{call_chain, load_snapshot, LanguageSnapshot};
use gil_trace_studio::utils::SnapshotError;
use pretty_assertions::assert_eq;
use std::io::Write;
use tempfile::NamedTempFile;

const SNAPSHOT: &str = r#"{
    "traceEvents": [
        {"ph": "M", "pid": 40, "tid": 40, "name": "process_name", "args": {"name": "python"}},
        {"ph": "X", "pid": 40, "tid": 41, "ts": 5000.5, "dur": 900, "name": "run (/srv/worker.py:20)"},
        {"ph": "X", "pid": 40, "tid": 41, "ts": 5100.5, "dur": 200, "name": "step (/srv/worker.py:31)"},
        {"ph": "X", "pid": 40, "tid": 41, "ts": 5150.5, "dur": 20, "name": "<built-in method acquire of _thread.lock object>"},
        {"ph": "X", "pid": 40, "tid": 41, "ts": 5400.5, "dur": 100, "name": "step (/srv/worker.py:31)"},
        {"ph": "X", "pid": 40, "tid": 42, "ts": 5200.5, "dur": 50, "name": "_find_and_load (<frozen importlib._bootstrap>:1002)"},
        {"ph": "i", "pid": 40, "tid": 41, "ts": 6000.0, "name": "marker", "s": "t"}
    ],
    "viztracer_metadata": {"version": "0.15.6"}
}"#;

fn write_snapshot(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn names<S: LanguageSnapshot>(snapshot: &S, tid: u32, ts: f64) -> Vec<String> {
    call_chain(snapshot, tid, ts)
        .iter()
        .map(|f| f.function.clone())
        .collect()
}

#[test]
fn test_load_snapshot_from_file() {
    let file = write_snapshot(SNAPSHOT);
    let snapshot = load_snapshot(file.path()).unwrap();

    assert_eq!(snapshot.len(), 5);
    assert_eq!(snapshot.origin_us(), 5000.5);
    assert!(snapshot.contains_thread(40));
    assert!(snapshot.contains_thread(41));
    assert!(!snapshot.contains_thread(43));

    let mut threads: Vec<u32> = snapshot.threads().collect();
    threads.sort_unstable();
    assert_eq!(threads, vec![41, 42]);
}

#[test]
fn test_lookup_is_relative_to_origin() {
    let snapshot = load_snapshot(write_snapshot(SNAPSHOT).path()).unwrap();

    assert_eq!(
        names(&snapshot, 41, 160.0),
        vec!["<built-in method acquire of _thread.lock object>", "step", "run"]
    );
    assert_eq!(names(&snapshot, 41, 250.0), vec!["step", "run"]);
    assert_eq!(names(&snapshot, 41, 350.0), vec!["run"]);
    // Second call of step is a sibling of the first
    assert_eq!(names(&snapshot, 41, 450.0), vec!["step", "run"]);
    assert!(names(&snapshot, 41, 950.0).is_empty());
}

#[test]
fn test_frame_metadata() {
    let snapshot = load_snapshot(write_snapshot(SNAPSHOT).path()).unwrap();

    let chain = call_chain(&snapshot, 41, 160.0);
    let native = chain[0];
    assert!(native.is_native_extension);
    assert_eq!(native.filename, None);
    assert_eq!(native.line, None);

    let step = chain[1];
    assert!(!step.is_native_extension);
    assert_eq!(step.filename.as_deref(), Some("/srv/worker.py"));
    assert_eq!(step.line, Some(31));
    assert_eq!(step.full_name, "step (/srv/worker.py:31)");
    assert_eq!(step.start_us, 100.0);
    assert_eq!(step.end_us, 300.0);

    let frozen = call_chain(&snapshot, 42, 210.0);
    assert_eq!(frozen.len(), 1);
    assert_eq!(
        frozen[0].filename.as_deref(),
        Some("<frozen importlib._bootstrap>")
    );
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_snapshot(dir.path().join("viztracer.json")).unwrap_err();
    assert!(matches!(err, SnapshotError::Io(_)));
}

#[test]
fn test_not_json() {
    let file = write_snapshot("this is not json");
    let err = load_snapshot(file.path()).unwrap_err();
    assert!(matches!(err, SnapshotError::Json(_)));
}
