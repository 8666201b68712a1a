#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use jsonschema::JSONSchema;
use serde_json::Value;
use ulid::Ulid;

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn read_json(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse {}: {err}", path.display()))
}

fn assert_schema(schema_name: &str, value: &Value) {
    let schema_path = repo_root().join("contracts/v1/schemas").join(schema_name);
    let schema = read_json(&schema_path);
    let compiled = JSONSchema::compile(&schema)
        .unwrap_or_else(|err| panic!("failed to compile {}: {err}", schema_path.display()));
    if let Some(errors) = compiled
        .validate(value)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
    {
        panic!(
            "schema validation failed for {}:\n{}\nvalue={value}",
            schema_path.display(),
            errors.join("\n")
        );
    }
}

fn temp_db(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("bt-contract-{label}-{}.sqlite3", Ulid::new()))
}

fn bt_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_bt"));
    command.arg("--db").arg(db_path);
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run bt command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn bt_json(db_path: &Path, args: &[&str]) -> Value {
    let output = bt_output(db_path, args);
    assert!(
        output.status.success(),
        "bt {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    stdout_json(&output)
}

fn create_fixture_bug(db_path: &Path, title: &str, priority: &str) -> Value {
    bt_json(
        db_path,
        &[
            "bugs",
            "create",
            "--title",
            title,
            "--description",
            "Clicking save closes the editor",
            "--reporter",
            "Jane Doe",
            "--priority",
            priority,
            "--tag",
            "editor",
        ],
    )
}

fn cleanup(db_path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut path = db_path.as_os_str().to_owned();
        path.push(suffix);
        let _ = fs::remove_file(PathBuf::from(path));
    }
}

#[test]
fn help_contract_lists_expected_subcommands() {
    let output = match Command::new(env!("CARGO_BIN_EXE_bt"))
        .args(["bugs", "--help"])
        .output()
    {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["create", "show", "list", "update", "status", "delete"] {
        assert!(
            stdout.contains(required),
            "expected help output to contain subcommand {required}; output={stdout}"
        );
    }
}

#[test]
fn fixtures_match_published_schemas() {
    let fixtures = repo_root().join("contracts/v1/fixtures");
    assert_schema("bug.schema.json", &read_json(&fixtures.join("bug.sample.json")));
    assert_schema(
        "api-envelope.schema.json",
        &read_json(&fixtures.join("validation-error.sample.json")),
    );
}

#[test]
fn create_show_and_delete_emit_bug_contract() {
    let db_path = temp_db("crud");

    let created = create_fixture_bug(&db_path, "Save crashes editor", "high");
    assert_schema("bug.schema.json", &created);
    assert_eq!(created["status"], Value::String("open".to_string()));
    assert_eq!(created["priority"], Value::String("high".to_string()));

    let id = created["id"].as_str().unwrap_or_default().to_string();
    let shown = bt_json(&db_path, &["bugs", "show", "--id", &id]);
    assert_eq!(shown, created);

    let deleted = bt_json(&db_path, &["bugs", "delete", "--id", &id]);
    assert_eq!(deleted["id"], created["id"]);

    let missing = bt_output(&db_path, &["bugs", "show", "--id", &id]);
    assert!(!missing.status.success());
    let stderr = String::from_utf8_lossy(&missing.stderr);
    assert!(stderr.contains("bug not found"), "stderr={stderr}");

    cleanup(&db_path);
}

#[test]
fn update_and_status_change_keep_identity() {
    let db_path = temp_db("update");
    let created = create_fixture_bug(&db_path, "Login fails", "medium");
    let id = created["id"].as_str().unwrap_or_default().to_string();

    let updated = bt_json(
        &db_path,
        &["bugs", "update", "--id", &id, "--assigned-to", "Sam", "--environment", "linux"],
    );
    assert_schema("bug.schema.json", &updated);
    assert_eq!(updated["id"], created["id"]);
    assert_eq!(updated["title"], created["title"]);
    assert_eq!(updated["assignedTo"], Value::String("Sam".to_string()));
    assert_eq!(updated["createdAt"], created["createdAt"]);

    let resolved = bt_json(&db_path, &["bugs", "status", "--id", &id, "--status", "resolved"]);
    assert_eq!(resolved["status"], Value::String("resolved".to_string()));
    assert_eq!(resolved["environment"], Value::String("linux".to_string()));

    cleanup(&db_path);
}

#[test]
fn list_emits_paginated_contract() {
    let db_path = temp_db("list");
    for (index, priority) in ["low", "critical", "high"].iter().enumerate() {
        create_fixture_bug(&db_path, &format!("Bug {index}"), priority);
    }

    let page = bt_json(
        &db_path,
        &["bugs", "list", "--limit", "2", "--sort-by", "priority", "--order", "desc"],
    );
    assert_schema("bug-list.schema.json", &page);
    assert_eq!(page["pagination"]["total"], Value::Number(3_u64.into()));
    assert_eq!(page["pagination"]["pages"], Value::Number(2_u64.into()));
    assert_eq!(page["bugs"][0]["priority"], Value::String("critical".to_string()));
    assert_eq!(page["bugs"][1]["priority"], Value::String("high".to_string()));
    if let Some(bugs) = page["bugs"].as_array() {
        for bug in bugs {
            assert_schema("bug.schema.json", bug);
        }
    }

    let filtered = bt_json(&db_path, &["bugs", "list", "--priority", "low"]);
    assert_eq!(filtered["pagination"]["total"], Value::Number(1_u64.into()));

    cleanup(&db_path);
}

#[test]
fn validation_failures_exit_non_zero_with_every_message() {
    let db_path = temp_db("invalid");

    let output = bt_output(
        &db_path,
        &["bugs", "create", "--title", "   ", "--priority", "urgent"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    for expected in [
        "Title cannot be empty",
        "Description is required and must be a string",
        "Priority must be one of: low, medium, high, critical",
        "Reporter is required and must be a string",
    ] {
        assert!(stderr.contains(expected), "missing {expected}; stderr={stderr}");
    }

    let malformed = bt_output(&db_path, &["bugs", "show", "--id", "invalid-id"]);
    assert!(!malformed.status.success());
    assert!(String::from_utf8_lossy(&malformed.stderr).contains("invalid bug id format"));

    let list = bt_output(&db_path, &["bugs", "list", "--limit", "500"]);
    assert!(!list.status.success());

    cleanup(&db_path);
}

#[test]
fn db_check_reports_pending_then_current_schema() {
    let db_path = temp_db("schema");

    let pending = bt_json(&db_path, &["db", "check"]);
    assert_schema("schema-status.schema.json", &pending);
    assert_eq!(pending["current_version"], Value::Number(0_u64.into()));
    assert!(!db_path.exists(), "db check must not create {}", db_path.display());

    let migrated = bt_json(&db_path, &["db", "migrate"]);
    assert_schema("schema-status.schema.json", &migrated);
    assert_eq!(migrated["pending_versions"], serde_json::json!([]));

    cleanup(&db_path);
}
