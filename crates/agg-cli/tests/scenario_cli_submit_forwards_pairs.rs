//! Scenario: the `agg` binary end to end against a mock ingestion service.
//!
//! # Invariants under test
//! - `config-hash` prints a stable 64-hex hash for the shipped base config.
//! - `submit` with a batch file joins and forwards completed pairs in one
//!   batch call per partition key; incomplete ids are not forwarded.
//! - A malformed submission is rejected with a VALIDATION error before any
//!   store or sink traffic.
//! - `records`, single-side `submit` and the looping `sweep` refuse the
//!   in-process memory backend; a batch `submit` on it warns.

use std::io::Write;
use std::path::PathBuf;

use httpmock::prelude::*;
use predicates::prelude::*;

fn base_config() -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../config/base.yaml")
        .to_string_lossy()
        .to_string()
}

fn write_temp(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path.to_string_lossy().to_string()
}

#[allow(deprecated)]
fn agg(dir: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("agg").unwrap();
    cmd.current_dir(dir.path()).env("RUST_LOG", "warn");
    cmd
}

#[test]
fn config_hash_is_printed() {
    let dir = tempfile::tempdir().unwrap();
    agg(&dir)
        .args(["config-hash", &base_config()])
        .assert()
        .success()
        .stdout(predicate::str::is_match("config_hash=[0-9a-f]{64}").unwrap());
}

#[test]
fn batch_file_is_joined_and_forwarded() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/ingest/embeddings/batch");
        then.status(200);
    });

    let dir = tempfile::tempdir().unwrap();
    let overlay = write_temp(
        &dir,
        "local.yaml",
        &format!("sink:\n  base_url: \"{}\"\n", server.base_url()),
    );
    let batch = write_temp(
        &dir,
        "batch.json",
        r#"{"embeddings": [
            {"id": "y", "embedding_type": "EMBEDDINGS_TEXT", "embedding": [0.1, 0.2]},
            {"id": "y", "embedding_type": "EMBEDDINGS_IMAGE", "embedding": [0.3]},
            {"id": "z", "embedding_type": "EMBEDDINGS_TEXT", "embedding": [0.4]}
        ]}"#,
    );

    agg(&dir)
        .args(["submit", "--config", &base_config(), "--config", &overlay, "--file", &batch])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed=1"))
        .stdout(predicate::str::contains("forwarded=1"))
        .stderr(predicate::str::contains("discarded at exit"));

    mock.assert();
}

#[test]
fn malformed_submission_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let bad = write_temp(
        &dir,
        "bad.json",
        r#"{"id": "x1", "embedding_type": "EMBEDDINGS_AUDIO", "embedding": [0.1]}"#,
    );

    agg(&dir)
        .args(["submit", "--config", &base_config(), "--file", &bad])
        .assert()
        .failure()
        .stderr(predicate::str::contains("VALIDATION"));
}

#[test]
fn records_need_postgres() {
    let dir = tempfile::tempdir().unwrap();
    agg(&dir)
        .args(["records", "show", "--config", &base_config(), "x1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("store.backend=postgres"));
}

#[test]
fn one_sweep_over_empty_memory_store() {
    let dir = tempfile::tempdir().unwrap();
    agg(&dir)
        .args(["sweep", "--once", "--config", &base_config()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"candidates\": 0"));
}

#[test]
fn single_side_submit_refuses_memory_store() {
    let dir = tempfile::tempdir().unwrap();
    let half = write_temp(
        &dir,
        "half.json",
        r#"{"id": "x1", "embedding_type": "EMBEDDINGS_TEXT", "embedding": [0.1]}"#,
    );

    agg(&dir)
        .args(["submit", "--config", &base_config(), "--file", &half])
        .assert()
        .failure()
        .stderr(predicate::str::contains("store.backend=postgres"));
}

#[test]
fn looping_sweep_refuses_memory_store() {
    let dir = tempfile::tempdir().unwrap();
    agg(&dir)
        .args(["sweep", "--config", &base_config()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("store.backend=postgres"));
}
