pub mod config;
pub mod engine;
pub mod errors;
pub mod finalizer;
pub mod identity;
pub mod logging;
pub mod orchestrator;
pub mod probe;
pub mod registry;
pub mod retention;
pub mod runtime;
pub mod stability;
pub mod strategy;
pub mod summary;
pub mod types;

use chrono::DateTime;
use clap::{error::ErrorKind, Parser, Subcommand, ValueEnum};
use config::{load_config, CliOverrides, EnvMap};
use engine::{StopDisposition, VideoEngine};
use errors::ReelError;
use logging::structured_fallback_line;
use runtime::ProductionRuntime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use summary::format_file_size;
use types::{CorrelationOutcome, Preset};

pub const EXIT_OK: i32 = 0;
pub const EXIT_INVALID: i32 = 1;
pub const EXIT_MISSING: i32 = 2;

#[derive(Debug, Clone, Parser)]
#[command(name = "reelkeeper")]
#[command(about = "Correlate browser test recordings with the tests that produced them")]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true)]
    pub video_dir: Option<PathBuf>,
    #[arg(long, global = true, value_enum)]
    pub profile: Option<CliProfile>,
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Register one test and locate its recording right away.
    Correlate {
        #[arg(long)]
        test: String,
        #[arg(long)]
        session_id: Option<String>,
        #[arg(long)]
        node_host: Option<String>,
        /// RFC 3339 instant the recording began; defaults to now.
        #[arg(long)]
        started_at: Option<String>,
        /// Overall budget for the correlation, settling delay included.
        #[arg(long)]
        deadline_ms: Option<u64>,
    },
    /// Describe the artifact directory.
    Diagnose,
    /// Write a summary report of the artifact directory.
    Summary,
    /// Delete recordings and missing-video markers older than N days.
    Cleanup {
        #[arg(long)]
        older_than_days: u64,
    },
    /// Check that the artifact directories exist and are writable.
    Validate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliProfile {
    Local,
    Ci,
}

impl From<CliProfile> for Preset {
    fn from(value: CliProfile) -> Self {
        match value {
            CliProfile::Local => Preset::Local,
            CliProfile::Ci => Preset::Ci,
        }
    }
}

pub fn run() -> Result<i32, ReelError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| ReelError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &env, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    env: &[(std::ffi::OsString, std::ffi::OsString)],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, ReelError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp
            | ErrorKind::DisplayVersion
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                print!("{error}");
                return Ok(EXIT_OK);
            }
            _ => return Err(ReelError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        video_dir: cli.video_dir.clone(),
        profile: cli.profile.map(Into::into),
    };
    let (cfg, scope) = load_config(
        &overrides,
        cwd,
        &env_to_map(env),
        runtime.file_system.as_ref(),
    )?;
    let engine = VideoEngine::from_runtime(cfg, scope, runtime);
    let output = Output {
        runtime,
        json: cli.json,
    };

    match &cli.command {
        Command::Correlate {
            test,
            session_id,
            node_host,
            started_at,
            deadline_ms,
        } => {
            let start_time = match started_at {
                Some(raw) => parse_started_at(raw)?,
                None => runtime.clock.now(),
            };
            engine.start_recording_at(
                test,
                session_id.as_deref(),
                node_host.as_deref(),
                start_time,
            )?;
            let disposition = engine.finish(test, deadline_ms.map(Duration::from_millis));
            output.correlation(test, &disposition)?;
            Ok(if disposition.artifact_located() {
                EXIT_OK
            } else {
                EXIT_MISSING
            })
        }
        Command::Diagnose => {
            let diagnosis = engine.diagnose();
            if output.json {
                output.json_value(&diagnosis)?;
            } else {
                for line in diagnosis.render_lines() {
                    runtime.terminal.write_line(&line)?;
                }
            }
            Ok(EXIT_OK)
        }
        Command::Summary => {
            let (summary, path) = engine.write_summary();
            if output.json {
                output.json_value(&summary)?;
            } else {
                runtime.terminal.write_line(summary.render().trim_end())?;
                if let Some(path) = path {
                    runtime
                        .terminal
                        .write_line(&format!("written: {}", path.display()))?;
                }
            }
            Ok(EXIT_OK)
        }
        Command::Cleanup { older_than_days } => {
            let report = engine.cleanup_old_artifacts(*older_than_days);
            output.line(
                "cleanup",
                "complete",
                &format!(
                    "deleted={} freed={} failed={}",
                    report.deleted.len(),
                    format_file_size(report.freed_bytes),
                    report.failed.len()
                ),
            )?;
            Ok(EXIT_OK)
        }
        Command::Validate => {
            let report = engine.validate();
            if output.json {
                output.json_value(&report)?;
            } else {
                for check in &report.checks {
                    output.line(
                        check.role,
                        if check.exists && check.writable {
                            "ok"
                        } else {
                            "invalid"
                        },
                        &format!(
                            "path={} exists={} writable={}",
                            check.path.display(),
                            check.exists,
                            check.writable
                        ),
                    )?;
                }
            }
            Ok(if report.is_valid() {
                EXIT_OK
            } else {
                EXIT_INVALID
            })
        }
    }
}

struct Output<'a> {
    runtime: &'a ProductionRuntime,
    json: bool,
}

impl Output<'_> {
    fn line(&self, subject: &str, state: &str, message: &str) -> Result<(), ReelError> {
        let rendered = if self.runtime.terminal.stdout_is_tty() {
            format!("{subject}: {state} ({message})")
        } else {
            structured_fallback_line(subject, state, message)
        };
        self.runtime.terminal.write_line(&rendered)
    }

    fn json_value<T: Serialize>(&self, value: &T) -> Result<(), ReelError> {
        let rendered =
            serde_json::to_string_pretty(value).map_err(|e| ReelError::Io(e.to_string()))?;
        self.runtime.terminal.write_line(&rendered)
    }

    fn correlation(&self, test: &str, disposition: &StopDisposition) -> Result<(), ReelError> {
        match disposition {
            StopDisposition::Skipped => self.line(test, "skipped", "utility test"),
            StopDisposition::NotRegistered => self.line(test, "missing", "not registered"),
            StopDisposition::Correlated(CorrelationOutcome::Matched {
                destination,
                source_name,
                strategy,
                bytes,
                attempts,
            }) => self.line(
                test,
                "matched",
                &format!(
                    "destination={} source={} strategy={} size={} attempts={}",
                    destination.display(),
                    source_name,
                    strategy.as_str(),
                    format_file_size(*bytes),
                    attempts
                ),
            ),
            StopDisposition::Correlated(CorrelationOutcome::Exhausted { reason, attempts }) => {
                self.line(
                    test,
                    "missing",
                    &format!("reason={} attempts={}", reason.as_str(), attempts),
                )
            }
        }
    }
}

fn parse_started_at(raw: &str) -> Result<SystemTime, ReelError> {
    DateTime::parse_from_rfc3339(raw)
        .map(SystemTime::from)
        .map_err(|e| ReelError::Cli(format!("--started-at {raw}: {e}")))
}

fn env_to_map(env: &[(std::ffi::OsString, std::ffi::OsString)]) -> EnvMap {
    let mut map = EnvMap::new();
    for (key, value) in env {
        if let (Some(key), Some(value)) = (key.to_str(), value.to_str()) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::{parse_started_at, run_with_runtime, Cli, Command, EXIT_INVALID, EXIT_OK};
    use crate::runtime::{
        FakeTerminal, ProductionArtifactFs, ProductionClock, ProductionRuntime,
    };
    use clap::Parser;
    use std::ffi::OsString;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn runtime_with(terminal: &FakeTerminal) -> ProductionRuntime {
        ProductionRuntime {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionArtifactFs),
            terminal: Arc::new(terminal.clone()),
        }
    }

    fn args(video_dir: &Path, rest: &[&str]) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("reelkeeper"),
            OsString::from("--video-dir"),
            video_dir.as_os_str().to_os_string(),
        ];
        args.extend(rest.iter().map(OsString::from));
        args
    }

    #[test]
    fn validate_prints_structured_lines_when_not_a_tty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let videos = temp.path().join("videos");
        std::fs::create_dir_all(&videos).expect("videos");
        let terminal = FakeTerminal::new(false);

        let code = run_with_runtime(
            &args(&videos, &["validate"]),
            &[],
            temp.path(),
            &runtime_with(&terminal),
        )
        .expect("run");
        assert_eq!(code, EXIT_OK);
        let lines = terminal.written_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("test=video_dir state=ok"));
    }

    #[test]
    fn validate_fails_for_missing_directory_with_readable_tty_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let terminal = FakeTerminal::new(true);
        let code = run_with_runtime(
            &args(&temp.path().join("absent"), &["validate"]),
            &[],
            temp.path(),
            &runtime_with(&terminal),
        )
        .expect("run");
        assert_eq!(code, EXIT_INVALID);
        assert!(terminal.written_lines()[0].starts_with("video_dir: invalid ("));
    }

    #[test]
    fn unknown_flag_is_a_cli_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let terminal = FakeTerminal::new(false);
        let result = run_with_runtime(
            &args(temp.path(), &["validate", "--bogus"]),
            &[],
            temp.path(),
            &runtime_with(&terminal),
        );
        assert!(matches!(result, Err(crate::errors::ReelError::Cli(_))));
    }

    #[test]
    fn correlate_accepts_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "reelkeeper",
            "correlate",
            "--test",
            "login_flow",
            "--session-id",
            "abc",
            "--profile",
            "ci",
        ])
        .expect("parse");
        assert!(matches!(cli.profile, Some(super::CliProfile::Ci)));
        match cli.command {
            Command::Correlate {
                test, session_id, ..
            } => {
                assert_eq!(test, "login_flow");
                assert_eq!(session_id.as_deref(), Some("abc"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cleanup_requires_age() {
        assert!(Cli::try_parse_from(["reelkeeper", "cleanup"]).is_err());
    }

    #[test]
    fn started_at_parses_rfc3339() {
        assert_eq!(
            parse_started_at("1970-01-01T00:01:40Z").expect("parse"),
            SystemTime::UNIX_EPOCH + Duration::from_secs(100)
        );
        assert!(parse_started_at("yesterday").is_err());
    }
}
