use crate::config::CorrelationConfig;
use crate::finalizer::{ArtifactFinalizer, FinalizeResult};
use crate::identity::TestIdentity;
use crate::logging::{JsonlLogger, LogEvent};
use crate::runtime::Clock;
use crate::strategy::{CorrelationContext, StrategyChain};
use crate::types::{CorrelationOutcome, ExhaustionReason, VideoSession};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime};

/// Drives the strategy chain until a candidate is committed or the attempt
/// budget runs out. All waits block only the calling worker.
pub struct RetryOrchestrator<'a> {
    pub chain: &'a StrategyChain,
    pub context: CorrelationContext<'a>,
    pub finalizer: ArtifactFinalizer<'a>,
    pub clock: &'a dyn Clock,
    pub config: CorrelationConfig,
    pub logger: Option<&'a JsonlLogger>,
}

impl<'a> RetryOrchestrator<'a> {
    /// `budget` caps the whole run including the settling delay; `None`
    /// falls back to the configured deadline, if any. The first attempt always
    /// runs.
    pub fn correlate(
        &self,
        identity: &TestIdentity,
        session: &VideoSession,
        budget: Option<Duration>,
    ) -> CorrelationOutcome {
        let deadline = budget
            .or(self.config.deadline)
            .map(|limit| self.clock.now() + limit);
        self.pause(self.config.settling_delay, deadline);

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0u32;
        for attempt in 1..=max_attempts {
            if attempt > 1 && deadline.is_some_and(|d| self.clock.now() >= d) {
                return self.exhausted(identity, ExhaustionReason::DeadlineReached, attempts);
            }
            attempts = attempt;
            self.log(
                "info",
                "correlation_attempt",
                json!({"test": identity.as_str(), "attempt": attempt, "max_attempts": max_attempts}),
            );

            for strategy in self.chain.iter() {
                let Some(candidate) = strategy.attempt(&self.context, session) else {
                    continue;
                };
                self.log(
                    "info",
                    "strategy_matched",
                    json!({
                        "test": identity.as_str(),
                        "strategy": strategy.kind().as_str(),
                        "candidate": candidate.file_name,
                        "bytes": candidate.len,
                    }),
                );
                match self.finalizer.finalize(&candidate, identity) {
                    FinalizeResult::Committed { destination, bytes } => {
                        self.log(
                            "info",
                            "artifact_finalized",
                            json!({
                                "test": identity.as_str(),
                                "strategy": strategy.kind().as_str(),
                                "source": candidate.file_name,
                                "destination": destination.display().to_string(),
                                "bytes": bytes,
                                "attempt": attempt,
                            }),
                        );
                        return CorrelationOutcome::Matched {
                            destination,
                            source_name: candidate.file_name,
                            strategy: strategy.kind(),
                            bytes,
                            attempts,
                        };
                    }
                    FinalizeResult::Rejected(failure) => {
                        self.log(
                            "warn",
                            "finalize_rejected",
                            json!({
                                "test": identity.as_str(),
                                "strategy": strategy.kind().as_str(),
                                "candidate": candidate.file_name,
                                "reason": failure.describe(),
                            }),
                        );
                    }
                }
            }

            if attempt < max_attempts {
                self.pause(self.config.retry_delay, deadline);
            }
        }

        let reason = if self.context.probe.directory_exists() {
            ExhaustionReason::AttemptsExhausted
        } else {
            ExhaustionReason::DirectoryUnavailable
        };
        self.exhausted(identity, reason, attempts)
    }

    fn exhausted(
        &self,
        identity: &TestIdentity,
        reason: ExhaustionReason,
        attempts: u32,
    ) -> CorrelationOutcome {
        self.log(
            "warn",
            "correlation_exhausted",
            json!({"test": identity.as_str(), "reason": reason.as_str(), "attempts": attempts}),
        );
        CorrelationOutcome::Exhausted { reason, attempts }
    }

    fn pause(&self, wanted: Duration, deadline: Option<SystemTime>) {
        let wait = match deadline {
            Some(deadline) => deadline
                .duration_since(self.clock.now())
                .map(|remaining| remaining.min(wanted))
                .unwrap_or(Duration::ZERO),
            None => wanted,
        };
        let _ = self.clock.sleep_for(wait);
    }

    fn log(&self, level: &str, event_type: &str, payload: Value) {
        if let Some(logger) = self.logger {
            let _ = logger.append(&LogEvent {
                level,
                event_type,
                payload,
            });
        }
    }
}
