use std::ffi::OsStr;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::{json, Value};
use tempfile::TempDir;

fn run_jm<I, S>(root: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_jm"))
        .arg("--data-dir")
        .arg(root.join("json_data"))
        .arg("--backups-dir")
        .arg(root.join("backups"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute jm binary: {err}"))
}

fn run_json<I, S>(root: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_jm(root, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "jm command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn temp_root() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"))
}

fn write_input(root: &Path, name: &str, value: &Value) -> String {
    let path = root.join(name);
    fs::write(&path, value.to_string())
        .unwrap_or_else(|err| panic!("failed to write input {}: {err}", path.display()));
    path.to_string_lossy().into_owned()
}

#[test]
fn restore_on_empty_layout_prints_defaults() {
    let root = temp_root();
    let value = run_json(root.path(), ["restore"]);
    assert_eq!(value["contract_version"], "cli.v1");
    assert_eq!(value["entriesByTopic"], json!({}));
    assert_eq!(value["currentTopic"], Value::Null);
}

#[test]
fn sync_restore_and_backup_flow() {
    let root = temp_root();
    let input = write_input(
        root.path(),
        "sync.json",
        &json!({
            "entriesByTopic": {"Topic A": [{"id": "a"}], "Topic B": []},
            "currentTopic": "Topic A"
        }),
    );

    let saved = run_json(root.path(), ["sync", "--in", input.as_str()]);
    assert_eq!(saved["status"], "ok");
    assert_eq!(saved["saved"], json!(["Topic_A.json", "Topic_B.json"]));

    let restored = run_json(root.path(), ["restore"]);
    assert_eq!(restored["entriesByTopic"]["Topic A"], json!([{"id": "a"}]));
    assert_eq!(restored["currentTopic"], "Topic A");

    let created = run_json(root.path(), ["backup", "create"]);
    assert_eq!(created["backups_count"], 1);
    let filename = created["filename"].as_str().unwrap_or_default().to_string();
    assert!(root.path().join("backups").join(&filename).is_file());

    let listed = run_json(root.path(), ["backup", "list"]);
    assert_eq!(listed["backups"][0]["filename"], filename.as_str());

    let second = run_jm(root.path(), ["backup", "create"]);
    assert!(!second.status.success(), "second backup inside cooldown must fail");
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stderr.contains("cooldown"), "stderr: {stderr}");
}

#[test]
fn graph_sync_and_show_round_trip() {
    let root = temp_root();
    let payload = json!({
        "booksMeta": {"b1": {"id": "doc1"}},
        "graphConnections": {"doc1": [{"to": "doc2"}]}
    });
    let input = write_input(root.path(), "graph.json", &payload);

    let saved = run_json(root.path(), ["graph", "sync", "--in", input.as_str()]);
    assert_eq!(saved["status"], "ok");

    let shown = run_json(root.path(), ["graph", "show"]);
    assert_eq!(shown["booksMeta"], payload["booksMeta"]);
    assert_eq!(shown["graphConnections"], payload["graphConnections"]);
}

#[test]
fn backup_without_data_directory_fails() {
    let root = temp_root();
    let output = run_jm(root.path(), ["backup", "create"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "stderr: {stderr}");
}
