//! Integration tests for the `prefgen train` and `prefgen runs` commands.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const RECORDS: &str = r#"[
    {"qid": 1, "history": ["Toy Story (1995)"], "candidate": "Heat (1995)", "preference": "The user likes animation.", "label": "no"},
    {"qid": 2, "history": ["Heat (1995)"], "candidate": "Casino (1995)", "preference": "The user enjoys crime films.", "label": "yes"},
    {"qid": 3, "history": [], "candidate": "Babe (1995)", "preference": "The user prefers family stories.", "label": "yes"}
]"#;

/// Helper to lay out a small dataset under `<temp>/data/ml-100k`
fn init_dataset(temp_dir: &TempDir) {
    let dir = temp_dir.path().join("data").join("ml-100k");
    std::fs::create_dir_all(&dir).unwrap();
    for split in ["train", "val", "test"] {
        std::fs::write(dir.join(format!("{split}.json")), RECORDS).unwrap();
    }
}

fn train_cmd(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("prefgen").unwrap();
    cmd.current_dir(root)
        .arg("train")
        .arg("--data-dir")
        .arg(root.join("data"))
        .arg("--output-dir")
        .arg(root.join("experiments"))
        .arg("--epoch")
        .arg("2")
        .arg("--bs")
        .arg("2")
        .arg("--process-rank")
        .arg("0");
    cmd
}

#[test]
fn test_help() {
    let mut cmd = Command::cargo_bin("prefgen").unwrap();
    cmd.arg("--help").assert().success().stdout(predicate::str::contains("train"));
}

#[test]
fn test_train_rec_p_writes_artifacts() {
    let temp_dir = TempDir::new().unwrap();
    init_dataset(&temp_dir);

    train_cmd(temp_dir.path())
        .arg("--prompt-format")
        .arg("REC-P")
        .assert()
        .success()
        .stdout(predicate::str::contains("Run complete"))
        .stdout(predicate::str::contains("eval_rougeL"));

    let save_dir = temp_dir.path().join("experiments").join("ml-100k-REC-P");
    for file in ["test_results.json", "pred_pre_test.json", "test_new.json", "pred_pre_val.json", "val_new.json", "run_manifest.json"] {
        assert!(save_dir.join(file).exists(), "missing {file}");
    }
}

#[test]
fn test_train_json_output() {
    let temp_dir = TempDir::new().unwrap();
    init_dataset(&temp_dir);

    let output = train_cmd(temp_dir.path())
        .arg("--prompt-format")
        .arg("REC-A")
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["prompt_format"], "REC-A");
    assert_eq!(report["task"], "label_only");
    assert_eq!(report["trained"], true);
    assert!(report["test_metrics"]["eval_loss"].is_number());
    assert_eq!(report["augmented"].as_array().unwrap().len(), 0);
}

#[test]
fn test_train_json_progress_goes_to_log() {
    let temp_dir = TempDir::new().unwrap();
    init_dataset(&temp_dir);

    let output = train_cmd(temp_dir.path())
        .arg("--prompt-format")
        .arg("REC-A")
        .arg("--json")
        .arg("--log-level")
        .arg("info")
        .output()
        .unwrap();
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("run started"), "stderr: {stderr}");
    assert!(stderr.contains("epoch finished"), "stderr: {stderr}");
    // stdout still parses as a single report
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["trained"], true);
}

#[test]
fn test_underscore_flag_aliases() {
    let temp_dir = TempDir::new().unwrap();
    init_dataset(&temp_dir);

    train_cmd(temp_dir.path())
        .arg("--prompt_format")
        .arg("REC-PA")
        .arg("--final_eval")
        .arg("--output_len")
        .arg("16")
        .assert()
        .success();
    assert!(temp_dir.path().join("experiments/ml-100k-REC-PA/test_results.json").exists());
}

#[test]
fn test_invalid_prompt_format_fails() {
    let temp_dir = TempDir::new().unwrap();
    init_dataset(&temp_dir);

    train_cmd(temp_dir.path())
        .arg("--prompt-format")
        .arg("REC-X")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported prompt format"));
}

#[test]
fn test_missing_split_fails() {
    let temp_dir = TempDir::new().unwrap();
    init_dataset(&temp_dir);

    train_cmd(temp_dir.path())
        .arg("--dataset")
        .arg("beauty")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn test_config_file_is_layered_under_flags() {
    let temp_dir = TempDir::new().unwrap();
    init_dataset(&temp_dir);
    std::fs::write(temp_dir.path().join("prefgen.toml"), "prompt_format = \"REC-A\"\nepoch = 50\n").unwrap();

    let output = train_cmd(temp_dir.path()).arg("--json").output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["prompt_format"], "REC-A");
    // --epoch 2 from the command line beats the file
    assert!(report["train"]["epochs_completed"].as_u64().unwrap() <= 2);
}

#[test]
fn test_unknown_config_key_fails() {
    let temp_dir = TempDir::new().unwrap();
    init_dataset(&temp_dir);
    let path = temp_dir.path().join("bad.toml");
    std::fs::write(&path, "epochs = 3\n").unwrap();

    train_cmd(temp_dir.path()).arg("--config").arg(&path).assert().failure();
}

#[test]
fn test_runs_list() {
    let temp_dir = TempDir::new().unwrap();
    init_dataset(&temp_dir);

    let mut cmd = Command::cargo_bin("prefgen").unwrap();
    cmd.current_dir(temp_dir.path())
        .arg("runs")
        .arg("list")
        .arg("--output-dir")
        .arg(temp_dir.path().join("experiments"))
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs found"));

    train_cmd(temp_dir.path()).arg("--prompt-format").arg("REC-A").assert().success();

    let output = Command::cargo_bin("prefgen")
        .unwrap()
        .current_dir(temp_dir.path())
        .arg("runs")
        .arg("list")
        .arg("--output-dir")
        .arg(temp_dir.path().join("experiments"))
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let runs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(runs.as_array().unwrap().len(), 1);
    assert_eq!(runs[0]["dataset"], "ml-100k");
    assert_eq!(runs[0]["trained"], true);
}
