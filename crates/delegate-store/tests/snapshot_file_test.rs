//! Snapshot file integration tests: save/load round trip and corrupt-file
//! quarantine.

use std::fs;

use delegate_store::{
    LoadOutcome, PersistedEntry, PersistedSnapshot, SnapshotFile, TaskInvocation, TaskRecord,
    TaskState,
};

// ===========================================================================
// Helpers
// ===========================================================================

fn finished_entry(id: &str, state: TaskState) -> PersistedEntry {
    let mut record = TaskRecord::queued(id, "finder", "look around", "find it", 1_000);
    record.state = state;
    record.ended_at_epoch_ms = Some(1_500);
    record.updated_at_epoch_ms = 1_500;
    if state == TaskState::Failed {
        record.last_error_code = Some("backend_timeout".to_string());
        record.last_error_message = Some("timed out".to_string());
    }
    PersistedEntry {
        record,
        summary: format!("{id} {state}"),
        output: Some(format!("output of {id}")),
        backend: "simulate".to_string(),
        provider: Some("local".to_string()),
        model: None,
        runtime: None,
        route: None,
        invocation: TaskInvocation {
            cwd: Some("/work".to_string()),
            batch_id: None,
            batch_index: None,
        },
        follow_up_prompts: Vec::new(),
    }
}

// ===========================================================================
// Round trip
// ===========================================================================

#[test]
fn save_then_load_returns_same_entries() {
    let dir = tempfile::tempdir().unwrap();
    let file = SnapshotFile::new(dir.path().join("nested").join("tasks.json"));

    let snapshot = PersistedSnapshot::new(
        2_000,
        vec![
            finished_entry("a", TaskState::Succeeded),
            finished_entry("b", TaskState::Failed),
            finished_entry("c", TaskState::Cancelled),
        ],
    );
    file.save(&snapshot).unwrap();

    match file.load(3_000).unwrap() {
        LoadOutcome::Loaded(loaded) => assert_eq!(loaded, snapshot),
        other => panic!("expected Loaded, got {other:?}"),
    }
}

#[test]
fn save_leaves_no_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");
    let file = SnapshotFile::new(&path);

    file.save(&PersistedSnapshot::new(1, Vec::new())).unwrap();

    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["tasks.json".to_string()]);
}

// ===========================================================================
// Corruption
// ===========================================================================

#[test]
fn non_json_file_is_quarantined_with_original_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");
    fs::write(&path, b"this is { not json").unwrap();
    let file = SnapshotFile::new(&path);

    let recovery = match file.load(42).unwrap() {
        LoadOutcome::Recovered(r) => r,
        other => panic!("expected Recovered, got {other:?}"),
    };

    assert_eq!(recovery.quarantined_path, dir.path().join("tasks.json.corrupt-42"));
    assert!(!path.exists(), "original path should be moved aside");
    assert_eq!(
        fs::read(&recovery.quarantined_path).unwrap(),
        b"this is { not json"
    );
}

#[test]
fn schema_mismatch_is_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");
    fs::write(&path, r#"{"schemaVersion": 9, "savedAtEpochMs": 0, "entries": []}"#).unwrap();

    let outcome = SnapshotFile::new(&path).load(7).unwrap();
    match outcome {
        LoadOutcome::Recovered(r) => assert!(r.reason.contains("schema version")),
        other => panic!("expected Recovered, got {other:?}"),
    }
}

#[test]
fn repeated_quarantine_does_not_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");
    let file = SnapshotFile::new(&path);

    fs::write(&path, "first").unwrap();
    let first = match file.load(5).unwrap() {
        LoadOutcome::Recovered(r) => r.quarantined_path,
        other => panic!("expected Recovered, got {other:?}"),
    };

    fs::write(&path, "second").unwrap();
    let second = match file.load(5).unwrap() {
        LoadOutcome::Recovered(r) => r.quarantined_path,
        other => panic!("expected Recovered, got {other:?}"),
    };

    assert_ne!(first, second);
    assert_eq!(fs::read_to_string(first).unwrap(), "first");
    assert_eq!(fs::read_to_string(second).unwrap(), "second");
}
