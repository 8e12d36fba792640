use assert_cmd::cargo::cargo_bin_cmd;
use std::fs;
use std::path::{Path, PathBuf};

const FAST_CONFIG: &str = r#"
[correlation]
settling_delay_ms = 0
max_attempts = 2
retry_delay_ms = 10

[stability]
sample_delay_ms = 5
poll_interval_ms = 5
max_wait_ms = 100
"#;

struct Workspace {
    temp: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("videos")).expect("videos dir");
        fs::write(temp.path().join("reelkeeper.toml"), FAST_CONFIG).expect("config");
        Self { temp }
    }

    fn root(&self) -> &Path {
        self.temp.path()
    }

    fn videos(&self) -> PathBuf {
        self.root().join("videos")
    }

    fn command(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("reelkeeper");
        cmd.current_dir(self.root())
            .env_remove("WORKSPACE")
            .arg("--config")
            .arg(self.root().join("reelkeeper.toml"))
            .arg("--video-dir")
            .arg(self.videos());
        cmd
    }
}

fn stdout_of(assert: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8")
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("reelkeeper");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = stdout_of(&out);
    for subcommand in ["correlate", "diagnose", "summary", "cleanup", "validate"] {
        assert!(stdout.contains(subcommand), "missing {subcommand} in help");
    }
    assert!(stdout.contains("--video-dir"));
}

#[test]
fn correlate_matches_and_exits_zero() {
    let ws = Workspace::new();
    fs::write(ws.videos().join("video-abc123def456-chrome.mp4"), vec![0u8; 200_000])
        .expect("recording");

    let out = ws
        .command()
        .args(["correlate", "--test", "login_flow", "--session-id", "abc123def456"])
        .assert()
        .code(0);
    let stdout = stdout_of(&out);
    assert!(stdout.contains("state=matched"));
    assert!(stdout.contains("strategy=identity"));
    assert_eq!(
        fs::metadata(ws.videos().join("login_flow.mp4"))
            .expect("artifact")
            .len(),
        200_000
    );
    assert!(ws.root().join(".reelkeeper").join("events.jsonl").exists());
}

#[test]
fn separate_correlate_runs_keep_each_others_artifacts() {
    let ws = Workspace::new();
    fs::write(ws.videos().join("video-abc123def456-chrome.mp4"), vec![0u8; 200_000])
        .expect("recording");
    ws.command()
        .args(["correlate", "--test", "login_flow", "--session-id", "abc123def456"])
        .assert()
        .code(0);

    let out = ws
        .command()
        .args(["correlate", "--test", "checkout"])
        .assert()
        .code(2);
    assert!(stdout_of(&out).contains("state=missing"));
    assert!(ws.videos().join("login_flow.mp4").exists());
    assert!(!ws.videos().join("checkout.mp4").exists());
}

#[test]
fn correlate_without_recording_exits_two_and_writes_marker() {
    let ws = Workspace::new();
    let out = ws
        .command()
        .args(["correlate", "--test", "checkout"])
        .assert()
        .code(2);
    assert!(stdout_of(&out).contains("state=missing"));
    assert!(ws.videos().join("checkout_MISSING_VIDEO.txt").exists());
}

#[test]
fn correlate_rejects_blank_identity() {
    let ws = Workspace::new();
    ws.command()
        .args(["correlate", "--test", "  ?? "])
        .assert()
        .failure();
}

#[test]
fn validate_reports_missing_directory() {
    let ws = Workspace::new();
    ws.command().arg("validate").assert().success();

    let mut cmd = cargo_bin_cmd!("reelkeeper");
    cmd.current_dir(ws.root())
        .arg("--video-dir")
        .arg(ws.root().join("absent"))
        .arg("validate");
    let out = cmd.assert().code(1);
    assert!(stdout_of(&out).contains("state=invalid"));
}

#[test]
fn diagnose_json_describes_directory() {
    let ws = Workspace::new();
    fs::write(ws.videos().join("video-1.mp4"), vec![0u8; 10]).expect("recording");
    let out = ws.command().args(["diagnose", "--json"]).assert().success();
    let value: serde_json::Value = serde_json::from_str(&stdout_of(&out)).expect("json");
    assert_eq!(value["exists"], serde_json::Value::Bool(true));
    assert_eq!(value["video_files"], serde_json::json!(1));
}

#[test]
fn summary_writes_report_file() {
    let ws = Workspace::new();
    let out = ws.command().arg("summary").assert().success();
    assert!(stdout_of(&out).contains("VIDEO RECORDING SUMMARY REPORT"));
    let written = fs::read_dir(ws.videos())
        .expect("read videos")
        .filter_map(Result::ok)
        .any(|entry| entry.file_name().to_string_lossy().starts_with("video_summary_"));
    assert!(written);
}

#[test]
fn cleanup_requires_age_and_keeps_fresh_files() {
    let ws = Workspace::new();
    ws.command().arg("cleanup").assert().failure();

    fs::write(ws.videos().join("fresh.mp4"), vec![0u8; 10]).expect("recording");
    let out = ws
        .command()
        .args(["cleanup", "--older-than-days", "3"])
        .assert()
        .success();
    assert!(stdout_of(&out).contains("deleted=0"));
    assert!(ws.videos().join("fresh.mp4").exists());
}

#[test]
fn invalid_config_path_exits_nonzero() {
    let ws = Workspace::new();
    let mut cmd = cargo_bin_cmd!("reelkeeper");
    cmd.current_dir(ws.root())
        .arg("--config")
        .arg(ws.root().join("missing.toml"))
        .arg("validate");
    cmd.assert().failure();
}
