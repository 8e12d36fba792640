//! Correlation heuristics, strongest first.
//!
//! Each strategy inspects the artifact directory once and proposes at most one
//! candidate for a session. The order of `StrategyChain::standard` matters:
//! later strategies ignore session identity and are only safe when nothing
//! more specific resolved the session.

use crate::config::StrategyConfig;
use crate::probe::{name_contains, sort_newest_first, FileProbe};
use crate::runtime::Clock;
use crate::stability::StabilityValidator;
use crate::types::{CandidateArtifact, StrategyKind, VideoSession};
use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// Everything one correlation attempt reads from.
pub struct CorrelationContext<'a> {
    pub probe: FileProbe<'a>,
    pub validator: StabilityValidator<'a>,
    pub clock: &'a dyn Clock,
    pub strategies: &'a StrategyConfig,
    pub min_artifact_bytes: u64,
}

pub trait CorrelationStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn attempt(
        &self,
        ctx: &CorrelationContext<'_>,
        session: &VideoSession,
    ) -> Option<CandidateArtifact>;
}

pub struct StrategyChain {
    strategies: Vec<Box<dyn CorrelationStrategy>>,
}

impl StrategyChain {
    pub fn standard() -> Self {
        Self {
            strategies: vec![
                Box::new(IdentityStrategy),
                Box::new(TemporalStrategy),
                Box::new(RecencyStrategy),
                Box::new(NamingPatternStrategy),
            ],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn CorrelationStrategy> {
        self.strategies.iter().map(|strategy| strategy.as_ref())
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.iter().map(|strategy| strategy.kind()).collect()
    }
}

impl Default for StrategyChain {
    fn default() -> Self {
        Self::standard()
    }
}

/// Matches the remote session id embedded in recorder file names.
pub struct IdentityStrategy;

impl IdentityStrategy {
    pub fn patterns(session: &VideoSession, cfg: &StrategyConfig) -> Vec<String> {
        let id = session.remote_session_id.trim().to_lowercase();
        if id.is_empty() {
            return Vec::new();
        }
        let mut patterns = cfg
            .engine_suffixes
            .iter()
            .filter(|suffix| !suffix.trim().is_empty())
            .map(|suffix| format!("{id}-{}", suffix.trim().to_lowercase()))
            .collect::<Vec<_>>();
        patterns.push(format!("session-{id}"));
        patterns.push(id.clone());
        if cfg.identity_prefix_len > 0 && id.chars().count() > cfg.identity_prefix_len {
            patterns.push(id.chars().take(cfg.identity_prefix_len).collect());
        }

        let mut seen = HashSet::new();
        patterns.retain(|pattern| seen.insert(pattern.clone()));
        patterns
    }
}

impl CorrelationStrategy for IdentityStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Identity
    }

    fn attempt(
        &self,
        ctx: &CorrelationContext<'_>,
        session: &VideoSession,
    ) -> Option<CandidateArtifact> {
        if !session.has_remote_session_id() {
            return None;
        }
        let mut rejected: HashSet<PathBuf> = HashSet::new();
        for pattern in Self::patterns(session, ctx.strategies) {
            let mut candidates = ctx.probe.eligible(|c| name_contains(c, &pattern));
            sort_newest_first(&mut candidates);
            for candidate in candidates {
                if rejected.contains(&candidate.path) {
                    continue;
                }
                if ctx.validator.is_stable(&candidate.path) {
                    return Some(candidate);
                }
                rejected.insert(candidate.path);
            }
        }
        None
    }
}

/// Picks the file whose mtime sits closest to the recorded session start.
pub struct TemporalStrategy;

impl CorrelationStrategy for TemporalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Temporal
    }

    fn attempt(
        &self,
        ctx: &CorrelationContext<'_>,
        session: &VideoSession,
    ) -> Option<CandidateArtifact> {
        let window_start = session
            .start_time
            .checked_sub(Duration::from_secs(ctx.strategies.temporal_lookback_secs))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let window_end =
            ctx.clock.now() + Duration::from_secs(ctx.strategies.temporal_lookahead_secs);

        let mut candidates = ctx.probe.eligible(|c| {
            c.modified >= window_start
                && c.modified <= window_end
                && c.len > ctx.min_artifact_bytes
        });
        candidates.sort_by_key(|c| distance(c.modified, session.start_time));

        let closest = candidates.into_iter().next()?;
        ctx.validator.is_stable(&closest.path).then_some(closest)
    }
}

/// Last resort for single-worker runs: the newest sizeable file.
pub struct RecencyStrategy;

impl CorrelationStrategy for RecencyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Recency
    }

    fn attempt(
        &self,
        ctx: &CorrelationContext<'_>,
        _session: &VideoSession,
    ) -> Option<CandidateArtifact> {
        let cutoff = ctx
            .clock
            .now()
            .checked_sub(Duration::from_secs(ctx.strategies.recency_window_secs))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let floor = ctx.strategies.recency_min_bytes.max(ctx.min_artifact_bytes);

        let mut candidates = ctx
            .probe
            .eligible(|c| c.modified >= cutoff && c.len > floor);
        sort_newest_first(&mut candidates);

        let newest = candidates.into_iter().next()?;
        ctx.validator.is_stable(&newest.path).then_some(newest)
    }
}

/// Scans for generic recorder naming conventions near the session start.
pub struct NamingPatternStrategy;

impl NamingPatternStrategy {
    pub fn patterns(cfg: &StrategyConfig, now: SystemTime) -> Vec<String> {
        let local: DateTime<Local> = now.into();
        let mut patterns = cfg
            .name_patterns
            .iter()
            .filter(|pattern| !pattern.trim().is_empty())
            .cloned()
            .collect::<Vec<_>>();
        patterns.push(local.format("%Y-%m-%d").to_string());
        patterns.push(local.format("%H-%M").to_string());
        patterns
    }
}

impl CorrelationStrategy for NamingPatternStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NamingPattern
    }

    fn attempt(
        &self,
        ctx: &CorrelationContext<'_>,
        session: &VideoSession,
    ) -> Option<CandidateArtifact> {
        let window = Duration::from_secs(ctx.strategies.pattern_window_secs);
        let mut rejected: HashSet<PathBuf> = HashSet::new();
        for pattern in Self::patterns(ctx.strategies, ctx.clock.now()) {
            let mut candidates = ctx.probe.eligible(|c| {
                name_contains(c, &pattern) && distance(c.modified, session.start_time) < window
            });
            sort_newest_first(&mut candidates);
            for candidate in candidates {
                if rejected.contains(&candidate.path) {
                    continue;
                }
                if ctx.validator.is_stable(&candidate.path) {
                    return Some(candidate);
                }
                rejected.insert(candidate.path);
            }
        }
        None
    }
}

fn distance(a: SystemTime, b: SystemTime) -> Duration {
    match a.duration_since(b) {
        Ok(delta) => delta,
        Err(err) => err.duration(),
    }
}
