//! Integration tests for the `delegate` binary.
//!
//! Each test points the binary at its own registry file and config
//! directory, runs it on the simulate backend, and inspects stdout.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde_json::Value;

use delegate_store::{PersistedEntry, PersistedSnapshot, SnapshotFile, TaskInvocation, TaskState};
use delegate_test_utils::{TestRegistryPath, sample_record, temp_registry_path};

// -----------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------

fn delegate(registry: &TestRegistryPath, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_delegate"));
    cmd.env("XDG_CONFIG_HOME", registry.dir())
        .env("XDG_STATE_HOME", registry.dir())
        .env_remove("DELEGATE_REGISTRY_PATH")
        .env_remove("DELEGATE_BACKEND")
        .env_remove("DELEGATE_RUNTIME")
        .env_remove("DELEGATE_STREAMING_FALLBACK")
        .env_remove("DELEGATE_MAX_CONCURRENCY")
        .env_remove("RUST_LOG")
        .arg("--registry-path")
        .arg(registry.path())
        .args(["--backend", "simulate"])
        .args(args);
    cmd
}

fn run(registry: &TestRegistryPath, args: &[&str]) -> Output {
    delegate(registry, args)
        .stdin(Stdio::null())
        .output()
        .expect("failed to run delegate")
}

fn run_with_stdin(registry: &TestRegistryPath, args: &[&str], input: &str) -> Output {
    let mut child = delegate(registry, args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn delegate");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(input.as_bytes())
        .expect("failed to write stdin");
    child.wait_with_output().expect("failed to wait for delegate")
}

fn json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}):\n{stdout}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn start_finder(registry: &TestRegistryPath) -> String {
    let output = run(
        registry,
        &["--json", "start", "finder", "-d", "find main", "-p", "where is main?"],
    );
    assert!(output.status.success(), "start failed: {output:?}");
    let result = json(&output);
    result["task_id"].as_str().expect("task_id").to_string()
}

fn seed(path: &Path, records: Vec<delegate_store::TaskRecord>) {
    let entries = records
        .into_iter()
        .map(|record| PersistedEntry {
            record,
            summary: String::new(),
            output: None,
            backend: "simulate".to_string(),
            provider: None,
            model: None,
            runtime: None,
            route: None,
            invocation: TaskInvocation::default(),
            follow_up_prompts: Vec::new(),
        })
        .collect();
    SnapshotFile::new(path)
        .save(&PersistedSnapshot::new(1_500, entries))
        .expect("seed snapshot");
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[test]
fn subagents_hide_internal_entries() {
    let registry = temp_registry_path();

    let output = run(&registry, &["--json", "subagents"]);
    assert!(output.status.success());
    let names: Vec<String> = json(&output)
        .as_array()
        .expect("array")
        .iter()
        .map(|d| d["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&"finder".to_string()));
    assert!(!names.contains(&"summarizer".to_string()));

    let output = run(&registry, &["--json", "subagents", "--all"]);
    assert!(json(&output)
        .as_array()
        .unwrap()
        .iter()
        .any(|d| d["name"] == "summarizer"));
}

#[test]
fn started_task_is_visible_to_a_later_process() {
    let registry = temp_registry_path();
    let id = start_finder(&registry);
    assert!(registry.exists(), "registry file should be written");

    let output = run(&registry, &["--json", "status", &id]);
    assert!(output.status.success(), "{output:?}");
    let result = json(&output);
    assert_eq!(result["op"], "status");
    assert_eq!(result["items"][0]["task_id"], id.as_str());
    assert_eq!(result["items"][0]["state"], "succeeded");
}

#[test]
fn unknown_subagent_fails_with_exit_code() {
    let registry = temp_registry_path();
    let output = run(
        &registry,
        &["--json", "start", "wizard", "-d", "magic", "-p", "do it"],
    );
    assert_eq!(output.status.code(), Some(1));
    let result = json(&output);
    assert_eq!(result["status"], "failed");
    assert_eq!(result["error_code"], "unknown_subagent");
    assert!(result["error_message"].as_str().unwrap().contains("finder"));
}

#[test]
fn prompt_is_read_from_stdin() {
    let registry = temp_registry_path();
    let output = run_with_stdin(
        &registry,
        &["--json", "start", "finder", "-d", "from stdin"],
        "where is main?\n",
    );
    assert!(output.status.success(), "{output:?}");
    assert_eq!(json(&output)["state"], "succeeded");
}

#[test]
fn batch_runs_every_item() {
    let registry = temp_registry_path();
    let batch = r#"[
        {"subagent_type": "finder", "description": "one", "prompt": "a"},
        {"subagent_type": "nobody", "description": "two", "prompt": "b"},
        {"subagent_type": "general", "description": "three", "prompt": "c"}
    ]"#;
    let output = run_with_stdin(&registry, &["--json", "batch", "-", "--parallel"], batch);
    let result = json(&output);
    assert_eq!(result["batch_status"], "partial");
    let items = result["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["state"], "succeeded");
    assert_eq!(items[1]["error_code"], "unknown_subagent");
    assert_eq!(items[2]["state"], "succeeded");
}

#[test]
fn cancel_of_unknown_task_reports_not_found() {
    let registry = temp_registry_path();
    let output = run(&registry, &["--json", "cancel", "no-such-task"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(json(&output)["error_code"], "task_not_found");
}

#[test]
fn cancel_of_finished_task_is_a_no_op() {
    let registry = temp_registry_path();
    let id = start_finder(&registry);
    let output = run(&registry, &["--json", "cancel", &id]);
    assert!(output.status.success(), "{output:?}");
    let result = json(&output);
    assert_eq!(result["cancel_applied"], false);
    assert_eq!(result["previous_status"], "succeeded");
}

#[test]
fn recover_settles_orphans() {
    let registry = temp_registry_path();
    seed(
        registry.path(),
        vec![
            sample_record("orphan-running", TaskState::Running),
            sample_record("orphan-queued", TaskState::Queued),
        ],
    );

    let output = run(&registry, &["--json", "recover"]);
    assert!(output.status.success(), "{output:?}");
    let mut recovered: Vec<String> = json(&output)["recovered"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    recovered.sort();
    assert_eq!(recovered, vec!["orphan-queued", "orphan-running"]);

    let output = run(&registry, &["--json", "status", "orphan-running", "orphan-queued"]);
    let result = json(&output);
    assert_eq!(result["items"][0]["state"], "failed");
    assert_eq!(result["items"][0]["error_code"], "task_orphaned");
    assert_eq!(result["items"][1]["state"], "cancelled");

    let output = run(&registry, &["--json", "recover"]);
    assert!(json(&output)["recovered"].as_array().unwrap().is_empty());
}

#[test]
fn corrupt_registry_is_quarantined_not_fatal() {
    let registry = temp_registry_path();
    delegate_test_utils::write_corrupt_file(&registry, "{\"version\": ");

    let id = start_finder(&registry);
    assert!(!id.is_empty());
    let file_name = registry
        .path()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    let quarantined = registry.files_with_prefix(&format!("{file_name}.corrupt-"));
    assert_eq!(quarantined.len(), 1, "corrupt file should be moved aside");
}

#[test]
fn session_answers_each_request() {
    let registry = temp_registry_path();
    let input = concat!(
        r#"{"request_id": "r1", "operation": {"op": "start", "subagent_type": "finder", "description": "d", "prompt": "p"}}"#,
        "\n",
        r#"{"request_id": "r2", "operation": {"op": "status", "ids": ["missing"]}}"#,
        "\n",
        "garbage\n",
    );
    let output = run_with_stdin(&registry, &["session"], input);
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let responses: Vec<Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is JSON"))
        .collect();
    assert_eq!(responses.len(), 3, "{stdout}");

    let by_id = |id: &str| {
        responses
            .iter()
            .find(|r| r["request_id"] == id)
            .unwrap_or_else(|| panic!("no response for {id}"))
    };
    assert_eq!(by_id("r1")["result"]["state"], "succeeded");
    assert_eq!(by_id("r2")["result"]["items"][0]["error_code"], "task_not_found");
    assert!(responses.iter().any(|r| r["request_id"].is_null() && r["error"].is_string()));
}

#[test]
fn init_writes_config_under_xdg_home() {
    let registry = temp_registry_path();
    let output = run(&registry, &["init"]);
    assert!(output.status.success(), "{output:?}");
    let config = registry.dir().join("delegate").join("config.toml");
    assert!(config.exists());

    let output = run(&registry, &["init"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("already exists"));
}
