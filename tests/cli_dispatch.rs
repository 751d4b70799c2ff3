use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use uuid::Uuid;

fn unique_workspace(prefix: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{prefix}-{}", Uuid::now_v7()));
    std::fs::create_dir_all(&path).expect("workspace should be creatable");
    path
}

fn run_diary(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_diary"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("DIARY_LOG")
        .env("NO_COLOR", "1")
        .output()
        .expect("diary command should run")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "expected success but failed.\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn assert_failure(output: &Output) {
    assert!(
        !output.status.success(),
        "expected failure but command succeeded.\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn parse_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be valid json")
}

#[test]
fn status_before_init_reports_missing_components() {
    let root = unique_workspace("diary-cli-status");
    let config = root.join(".diary/config.toml");

    let output = run_diary(&config, &["status", "--json"]);
    assert_success(&output);
    let statuses = parse_json(&output);
    let statuses = statuses.as_array().expect("status should be an array");
    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[0]["component"], "conf");
    assert_eq!(statuses[0]["ready"], true);
    assert_eq!(statuses[1]["component"], "database");
    assert_eq!(statuses[1]["ready"], false);
    assert_eq!(statuses[2]["component"], "storage");
    assert_eq!(statuses[2]["ready"], false);
    assert!(!config.exists(), "status must not create the config");

    let storage = run_diary(&config, &["status", "storage"]);
    assert_failure(&storage);
    assert!(String::from_utf8_lossy(&storage.stdout).contains("storage [NOT READY]"));
    assert_success(&run_diary(&config, &["status", "conf"]));

    let unknown = run_diary(&config, &["status", "printer"]);
    assert_failure(&unknown);
    assert!(String::from_utf8_lossy(&unknown.stderr).contains("printer"));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn init_then_entry_lifecycle() {
    let root = unique_workspace("diary-cli-entries");
    let config = root.join(".diary/config.toml");

    assert_success(&run_diary(&config, &["init"]));
    assert!(config.exists());
    assert!(root.join(".diary/storage").is_dir());
    assert!(root.join(".diary/diary.sqlite").exists());

    assert_success(&run_diary(
        &config,
        &["new", "First day", "--text", "hello", "--date", "2024-03-01"],
    ));
    assert_success(&run_diary(&config, &["new", "Second day"]));

    let listed = parse_json(&run_diary(&config, &["ls", "--json"]));
    let entries = listed.as_array().expect("ls should be an array");
    assert_eq!(entries.len(), 2);
    let first = entries
        .iter()
        .find(|entry| entry["title"] == "First day")
        .expect("first entry should be listed");
    assert_eq!(first["date"], "2024-03-01");
    let id = first["id"].as_i64().expect("id should be numeric").to_string();

    assert_success(&run_diary(&config, &["edit", &id, "--title", "Renamed"]));
    let shown = parse_json(&run_diary(&config, &["show", &id, "--json"]));
    assert_eq!(shown["title"], "Renamed");
    assert_eq!(shown["text"], "hello");

    let empty_edit = run_diary(&config, &["edit", &id]);
    assert_failure(&empty_edit);

    assert_success(&run_diary(&config, &["rm", &id]));
    assert_failure(&run_diary(&config, &["show", &id]));
    let listed = parse_json(&run_diary(&config, &["ls", "--json"]));
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn new_rejects_overlong_title_and_bad_date() {
    let root = unique_workspace("diary-cli-invalid");
    let config = root.join("config.toml");

    let long_title = "x".repeat(81);
    assert_failure(&run_diary(&config, &["new", &long_title]));
    assert_failure(&run_diary(&config, &["new", "ok", "--date", "2024-13-40"]));

    let listed = parse_json(&run_diary(&config, &["ls", "--json"]));
    assert_eq!(listed.as_array().map(Vec::len), Some(0));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn attach_detach_removes_unreferenced_files() {
    let root = unique_workspace("diary-cli-files");
    let config = root.join(".diary/config.toml");
    let source = root.join("note.txt");
    std::fs::write(&source, "attached text\n").expect("source should be writable");
    let source_arg = source.to_str().expect("utf8 path");

    assert_success(&run_diary(&config, &["new", "With file"]));
    let listed = parse_json(&run_diary(&config, &["ls", "--json"]));
    let entry_id = listed[0]["id"].as_i64().expect("id").to_string();

    let attached = run_diary(
        &config,
        &["attach", &entry_id, source_arg, "--date", "2024-03-05"],
    );
    assert_success(&attached);
    let stored = root.join(".diary/storage/2024/03/note.txt");
    assert!(stored.is_file());

    let files = parse_json(&run_diary(&config, &["files", "--entry", &entry_id, "--json"]));
    let files = files.as_array().expect("files should be an array");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], "note.txt");
    assert_eq!(files[0]["location"], "2024/03");
    assert_eq!(files[0]["type"], "txt");
    let file_id = files[0]["id"].as_i64().expect("file id").to_string();

    let info = parse_json(&run_diary(&config, &["file-info", &file_id, "--json"]));
    assert_eq!(info["size"], 14);
    assert_eq!(info["entries"][0].as_i64().map(|id| id.to_string()), Some(entry_id.clone()));

    assert_success(&run_diary(&config, &["detach", &entry_id, &file_id]));
    assert!(!stored.exists());
    assert!(!root.join(".diary/storage/2024").exists());
    assert!(root.join(".diary/storage").is_dir());

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn config_values_persist_between_runs() {
    let root = unique_workspace("diary-cli-config");
    let config = root.join(".diary/config.toml");

    assert_success(&run_diary(&config, &["config", "set", "theme", "dark", "-s", "ui"]));
    let got = run_diary(&config, &["config", "get", "theme", "-s", "ui"]);
    assert_success(&got);
    assert_eq!(String::from_utf8_lossy(&got.stdout).trim(), "dark");

    let all = parse_json(&run_diary(&config, &["config", "list", "--json"]));
    let values = all.as_array().expect("config list should be an array");
    assert!(values
        .iter()
        .any(|value| value["section"] == "storage" && value["key"] == "root"));

    let exported = run_diary(&config, &["config", "export", "--format", "json"]);
    assert_success(&exported);
    let exported = parse_json(&exported);
    assert_eq!(exported["ui"]["theme"], "dark");

    assert_success(&run_diary(&config, &["config", "unset", "theme", "-s", "ui"]));
    assert_failure(&run_diary(&config, &["config", "get", "theme", "-s", "ui"]));

    assert_success(&run_diary(&config, &["config", "remove-section", "ui"]));
    assert_failure(&run_diary(&config, &["config", "remove-section", "ui"]));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn completions_print_script_for_named_shell() {
    let root = unique_workspace("diary-cli-completions");
    let output = run_diary(&root.join("config.toml"), &["completions", "bash"]);
    assert_success(&output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("diary"));
    assert!(!root.join("config.toml").exists());
    let _ = std::fs::remove_dir_all(root);
}
