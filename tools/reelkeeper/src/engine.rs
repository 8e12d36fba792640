//! Run-scoped recording context.
//!
//! One `VideoEngine` is built per test run and shared by reference across
//! worker threads. Tests call `start_recording` when a browser session begins
//! and `stop_recording` when it ends; `shutdown` drains whatever is still
//! registered and writes the run summary.

use crate::config::{AppConfig, ArtifactScope, CorrelationConfig};
use crate::errors::ReelError;
use crate::finalizer::{write_missing_marker, ArtifactFinalizer, ClaimSet};
use crate::identity::{is_utility_test, TestIdentity};
use crate::logging::{JsonlLogger, LogEvent};
use crate::orchestrator::RetryOrchestrator;
use crate::probe::{
    diagnose, probe_writable, DirectoryDiagnosis, FileProbe, FinalizedIndex, FINALIZED_LEDGER_FILE,
};
use crate::registry::{SessionRegistry, SessionStart};
use crate::retention::{prune_stale_artifacts, CleanupReport};
use crate::runtime::{ArtifactFs, Clock, ProductionRuntime};
use crate::stability::StabilityValidator;
use crate::strategy::{CorrelationContext, StrategyChain};
use crate::summary::{build_summary, write_summary, OutcomeLedger, RunSummary};
use crate::types::{CorrelationOutcome, SessionRecord, VideoSession};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDisposition {
    Registered(VideoSession),
    /// Setup/teardown hooks are never recorded.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopDisposition {
    Skipped,
    NotRegistered,
    Correlated(CorrelationOutcome),
}

impl StopDisposition {
    /// The boolean surfaced to test frameworks. Skipped tests count as
    /// located since no artifact was expected.
    pub fn artifact_located(&self) -> bool {
        match self {
            Self::Skipped => true,
            Self::NotRegistered => false,
            Self::Correlated(outcome) => outcome.is_matched(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drained: usize,
    pub summary: RunSummary,
    pub summary_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryCheck {
    pub role: &'static str,
    pub path: PathBuf,
    pub exists: bool,
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<DirectoryCheck>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.checks.iter().all(|check| check.exists && check.writable)
    }
}

pub struct VideoEngine {
    config: AppConfig,
    scope: ArtifactScope,
    correlation: CorrelationConfig,
    chain: StrategyChain,
    registry: SessionRegistry,
    ledger: OutcomeLedger,
    finalized: FinalizedIndex,
    claims: ClaimSet,
    fs: Arc<dyn ArtifactFs>,
    clock: Arc<dyn Clock>,
    logger: Option<JsonlLogger>,
}

impl VideoEngine {
    pub fn new(
        config: AppConfig,
        scope: ArtifactScope,
        fs: Arc<dyn ArtifactFs>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let correlation = config.effective_correlation();
        let finalized = FinalizedIndex::with_ledger(scope.output_dir.join(FINALIZED_LEDGER_FILE));
        Self {
            config,
            scope,
            correlation,
            chain: StrategyChain::standard(),
            registry: SessionRegistry::new(),
            ledger: OutcomeLedger::default(),
            finalized,
            claims: ClaimSet::default(),
            fs,
            clock,
            logger: None,
        }
    }

    /// Production wiring: real clock and filesystem, JSONL log at the scope's
    /// log path.
    pub fn from_runtime(config: AppConfig, scope: ArtifactScope, runtime: &ProductionRuntime) -> Self {
        let mut logger = JsonlLogger::new(&scope.log_path);
        logger.budget_bytes = config.logging.budget_bytes;
        Self::new(
            config,
            scope,
            Arc::clone(&runtime.file_system),
            Arc::clone(&runtime.clock),
        )
        .with_logger(logger)
    }

    pub fn with_logger(mut self, logger: JsonlLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scope(&self) -> &ArtifactScope {
        &self.scope
    }

    pub fn correlation(&self) -> CorrelationConfig {
        self.correlation
    }

    /// Fails only when `identity` normalizes to an empty key.
    pub fn start_recording(
        &self,
        identity: &str,
        remote_session_id: Option<&str>,
        node_host: Option<&str>,
    ) -> Result<StartDisposition, ReelError> {
        self.start_recording_at(identity, remote_session_id, node_host, self.clock.now())
    }

    /// As `start_recording`, for callers that learn about a session after it
    /// began.
    pub fn start_recording_at(
        &self,
        identity: &str,
        remote_session_id: Option<&str>,
        node_host: Option<&str>,
        start_time: SystemTime,
    ) -> Result<StartDisposition, ReelError> {
        let test_identity = TestIdentity::parse(identity)?;
        if is_utility_test(&test_identity, &self.config.sessions.skip_patterns) {
            self.log(
                "info",
                "recording_skipped",
                json!({"test": test_identity.as_str(), "reason": "utility_test"}),
            );
            return Ok(StartDisposition::Skipped);
        }

        let registration = self.registry.register(
            identity,
            SessionStart {
                remote_session_id: remote_session_id.map(str::to_string),
                node_host: node_host.map(str::to_string),
            },
            start_time,
        )?;
        if let Some(stale) = &registration.replaced {
            self.log(
                "warn",
                "stale_session_replaced",
                json!({
                    "test": stale.test_identity.as_str(),
                    "remote_session_id": stale.remote_session_id,
                }),
            );
        }
        let session = registration.session;
        self.log(
            "info",
            "recording_started",
            json!({
                "test": session.test_identity.as_str(),
                "remote_session_id": session.remote_session_id,
                "node_host": session.node_host,
            }),
        );
        Ok(StartDisposition::Registered(session))
    }

    /// True when the test's artifact was located (or none was expected).
    /// Never fails the caller.
    pub fn stop_recording(&self, identity: &str) -> bool {
        self.finish(identity, None).artifact_located()
    }

    /// Stops one session, correlating its artifact within `budget` when given.
    pub fn finish(&self, identity: &str, budget: Option<Duration>) -> StopDisposition {
        let Ok(test_identity) = TestIdentity::parse(identity) else {
            return StopDisposition::NotRegistered;
        };
        if is_utility_test(&test_identity, &self.config.sessions.skip_patterns) {
            return StopDisposition::Skipped;
        }
        let Some(session) = self.registry.get(&test_identity) else {
            self.log(
                "warn",
                "session_not_registered",
                json!({"test": test_identity.as_str()}),
            );
            return StopDisposition::NotRegistered;
        };

        let outcome = self.correlate(&session, budget);
        self.registry.release(&session);
        if !outcome.is_matched() {
            self.report_missing(&test_identity);
        }
        self.ledger.record(SessionRecord {
            test_identity: session.test_identity.clone(),
            remote_session_id: session.remote_session_id.clone(),
            node_host: session.node_host.clone(),
            outcome: outcome.clone(),
        });
        StopDisposition::Correlated(outcome)
    }

    fn correlate(&self, session: &VideoSession, budget: Option<Duration>) -> CorrelationOutcome {
        let fs = self.fs.as_ref();
        let clock = self.clock.as_ref();
        let extension = self.config.directory.extension.as_str();
        let validator = || StabilityValidator {
            fs,
            clock,
            config: &self.config.stability,
            min_artifact_bytes: self.correlation.min_artifact_bytes,
        };
        let orchestrator = RetryOrchestrator {
            chain: &self.chain,
            context: CorrelationContext {
                probe: FileProbe {
                    fs,
                    dir: &self.scope.video_dir,
                    extension,
                    finalized: &self.finalized,
                    min_bytes: self.correlation.min_artifact_bytes,
                },
                validator: validator(),
                clock,
                strategies: &self.config.strategies,
                min_artifact_bytes: self.correlation.min_artifact_bytes,
            },
            finalizer: ArtifactFinalizer {
                fs,
                validator: validator(),
                output_dir: &self.scope.output_dir,
                extension,
                stabilization_wait: self.config.stability.max_wait(),
                finalized: &self.finalized,
                claims: &self.claims,
                logger: self.logger.as_ref(),
            },
            clock,
            config: self.correlation,
            logger: self.logger.as_ref(),
        };
        orchestrator.correlate(&session.test_identity, session, budget)
    }

    fn report_missing(&self, identity: &TestIdentity) {
        let diagnosis = self.diagnose();
        self.log(
            "warn",
            "directory_diagnosis",
            serde_json::to_value(&diagnosis).unwrap_or(Value::Null),
        );
        match write_missing_marker(
            self.fs.as_ref(),
            self.clock.as_ref(),
            &self.scope.output_dir,
            identity,
        ) {
            Ok(path) => self.log(
                "info",
                "marker_written",
                json!({"test": identity.as_str(), "path": path.display().to_string()}),
            ),
            Err(error) => self.log(
                "error",
                "marker_write_failed",
                json!({"test": identity.as_str(), "error": error.to_string()}),
            ),
        }
    }

    /// identity -> remote session id for every session still in flight.
    pub fn active_sessions(&self) -> BTreeMap<String, String> {
        self.registry.active_sessions()
    }

    /// Correlates every still-registered session, then writes the summary.
    pub fn shutdown(&self) -> ShutdownReport {
        let pending = self.registry.snapshot();
        for session in &pending {
            let _ = self.finish(session.test_identity.as_str(), None);
        }
        self.log(
            "info",
            "shutdown_drained",
            json!({"drained": pending.len()}),
        );
        let (summary, summary_path) = self.write_summary();
        ShutdownReport {
            drained: pending.len(),
            summary,
            summary_path,
        }
    }

    pub fn summary(&self) -> RunSummary {
        build_summary(
            &self.ledger.snapshot(),
            self.fs.as_ref(),
            &self.scope.output_dir,
            &self.config.directory.extension,
            self.clock.now(),
        )
    }

    pub fn write_summary(&self) -> (RunSummary, Option<PathBuf>) {
        let summary = self.summary();
        let path = match write_summary(self.fs.as_ref(), &summary, self.clock.now()) {
            Ok(path) => path,
            Err(error) => {
                self.log(
                    "error",
                    "summary_write_failed",
                    json!({"error": error.to_string()}),
                );
                None
            }
        };
        if let Some(path) = &path {
            self.log(
                "info",
                "summary_written",
                json!({
                    "path": path.display().to_string(),
                    "sessions": summary.total_sessions,
                    "matched": summary.matched,
                }),
            );
        }
        (summary, path)
    }

    pub fn diagnose(&self) -> DirectoryDiagnosis {
        diagnose(
            self.fs.as_ref(),
            &self.scope.video_dir,
            &self.config.directory.extension,
            &self.finalized,
            self.clock.now(),
        )
    }

    /// Deletes artifacts and markers older than `days` from the video and
    /// output directories.
    pub fn cleanup_old_artifacts(&self, days: u64) -> CleanupReport {
        let older_than = Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY));
        let mut report = CleanupReport::default();
        for dir in self.artifact_dirs() {
            let pruned = prune_stale_artifacts(
                self.fs.as_ref(),
                dir,
                &self.config.directory.extension,
                older_than,
                self.clock.now(),
            );
            report.deleted.extend(pruned.deleted);
            report.failed.extend(pruned.failed);
            report.freed_bytes += pruned.freed_bytes;
        }
        self.log(
            "info",
            "artifacts_pruned",
            json!({
                "older_than_days": days,
                "deleted": report.deleted.len(),
                "freed_bytes": report.freed_bytes,
                "failed": report.failed.len(),
            }),
        );
        report
    }

    pub fn validate(&self) -> ValidationReport {
        let checks = self
            .artifact_dirs()
            .into_iter()
            .zip(["video_dir", "output_dir"])
            .map(|(dir, role)| {
                let exists = self.fs.is_dir(dir);
                DirectoryCheck {
                    role,
                    path: dir.to_path_buf(),
                    exists,
                    writable: exists && probe_writable(self.fs.as_ref(), dir, self.clock.now()),
                }
            })
            .collect();
        ValidationReport { checks }
    }

    fn artifact_dirs(&self) -> Vec<&Path> {
        let mut dirs = vec![self.scope.video_dir.as_path()];
        if self.scope.output_dir != self.scope.video_dir {
            dirs.push(self.scope.output_dir.as_path());
        }
        dirs
    }

    fn log(&self, level: &str, event_type: &str, payload: Value) {
        if let Some(logger) = &self.logger {
            let _ = logger.append(&LogEvent {
                level,
                event_type,
                payload,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{StartDisposition, StopDisposition, VideoEngine};
    use crate::config::{AppConfig, ArtifactScope};
    use crate::runtime::{ArtifactFs, FakeArtifactFs, FakeClock};
    use crate::types::{CorrelationOutcome, ExhaustionReason, StrategyKind};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    const T: u64 = 1_700_000_000;

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn engine(fs: &FakeArtifactFs, clock: &FakeClock) -> VideoEngine {
        let mut config = AppConfig::default();
        config.correlation.settling_delay_ms = Some(0);
        config.correlation.max_attempts = Some(3);
        config.correlation.retry_delay_ms = Some(1_000);
        let scope = ArtifactScope {
            video_dir: PathBuf::from("/videos"),
            output_dir: PathBuf::from("/videos"),
            log_path: PathBuf::from("/logs/events.jsonl"),
        };
        VideoEngine::new(config, scope, Arc::new(fs.clone()), Arc::new(clock.clone()))
    }

    #[test]
    fn identity_scenario_matches_and_retires_source() {
        let fs = FakeArtifactFs::with_dir("/videos");
        let clock = FakeClock::new(t(T));
        let engine = engine(&fs, &clock);
        let started = engine
            .start_recording("login_flow", Some("abc123def456"), None)
            .expect("start");
        assert!(matches!(started, StartDisposition::Registered(_)));

        fs.add_file("/videos/video-abc123def456-chrome.mp4", 2_000_000, t(T + 5));
        clock.advance(Duration::from_secs(30));
        match engine.finish("login_flow", None) {
            StopDisposition::Correlated(CorrelationOutcome::Matched {
                destination,
                strategy,
                bytes,
                ..
            }) => {
                assert_eq!(destination, PathBuf::from("/videos/login_flow.mp4"));
                assert_eq!(strategy, StrategyKind::Identity);
                assert_eq!(bytes, 2_000_000);
            }
            other => panic!("expected match, got {other:?}"),
        }
        assert!(!fs.exists(Path::new("/videos/video-abc123def456-chrome.mp4")));
        assert!(engine.active_sessions().is_empty());
    }

    #[test]
    fn exhaustion_writes_marker_and_returns_false() {
        let fs = FakeArtifactFs::with_dir("/videos");
        let clock = FakeClock::new(t(T));
        let engine = engine(&fs, &clock);
        engine.start_recording("checkout", None, None).expect("start");

        assert!(!engine.stop_recording("checkout"));
        assert!(fs.exists(Path::new("/videos/checkout_MISSING_VIDEO.txt")));
        assert!(!fs.exists(Path::new("/videos/checkout.mp4")));
        let summary = engine.summary();
        assert_eq!(summary.exhausted, 1);
        assert_eq!(summary.missing_markers, vec!["checkout_MISSING_VIDEO.txt"]);
    }

    #[test]
    fn unavailable_directory_is_contained() {
        let fs = FakeArtifactFs::default();
        let clock = FakeClock::new(t(T));
        let engine = engine(&fs, &clock);
        engine.start_recording("search", Some("s1"), None).expect("start");
        match engine.finish("search", None) {
            StopDisposition::Correlated(CorrelationOutcome::Exhausted { reason, attempts }) => {
                assert_eq!(reason, ExhaustionReason::DirectoryUnavailable);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert!(!engine.diagnose().exists);
    }

    #[test]
    fn utility_hooks_are_skipped_on_both_ends() {
        let fs = FakeArtifactFs::with_dir("/videos");
        let clock = FakeClock::new(t(T));
        let engine = engine(&fs, &clock);
        assert_eq!(
            engine.start_recording("Suite Setup", None, None).expect("start"),
            StartDisposition::Skipped
        );
        assert!(engine.active_sessions().is_empty());
        assert!(engine.stop_recording("Suite Setup"));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn empty_identity_fails_start_and_unknown_stop_is_false() {
        let fs = FakeArtifactFs::with_dir("/videos");
        let clock = FakeClock::new(t(T));
        let engine = engine(&fs, &clock);
        assert!(engine.start_recording("  !! ", None, None).is_err());
        assert!(engine.active_sessions().is_empty());
        assert_eq!(engine.finish("never_started", None), StopDisposition::NotRegistered);
    }

    #[test]
    fn shutdown_drains_pending_sessions_and_writes_summary() {
        let fs = FakeArtifactFs::with_dir("/videos");
        let clock = FakeClock::new(t(T));
        let engine = engine(&fs, &clock);
        engine.start_recording("a", None, None).expect("a");
        engine.start_recording("b", None, None).expect("b");
        assert_eq!(engine.active_sessions().len(), 2);

        let report = engine.shutdown();
        assert_eq!(report.drained, 2);
        assert!(engine.active_sessions().is_empty());
        assert_eq!(report.summary.total_sessions, 2);
        assert_eq!(report.summary.missing_markers.len(), 2);
        let path = report.summary_path.expect("summary path");
        assert!(fs.contents(&path).expect("contents").contains("MISSING VIDEOS (2):"));
    }

    #[test]
    fn cleanup_and_validate_cover_the_artifact_directory() {
        let fs = FakeArtifactFs::with_dir("/videos");
        let clock = FakeClock::new(t(T));
        fs.add_file("/videos/old.mp4", 1_000, t(T - 10 * 86_400));
        fs.add_file("/videos/new.mp4", 1_000, t(T - 60));
        let engine = engine(&fs, &clock);

        let report = engine.cleanup_old_artifacts(7);
        assert_eq!(report.deleted, vec![PathBuf::from("/videos/old.mp4")]);
        assert_eq!(report.freed_bytes, 1_000);
        assert!(fs.exists(Path::new("/videos/new.mp4")));

        assert!(engine.validate().is_valid());
        fs.set_read_only(true);
        assert!(!engine.validate().is_valid());
    }
}
