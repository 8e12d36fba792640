use crate::identity::TestIdentity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

pub const UNKNOWN_NODE_HOST: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    #[default]
    Local,
    Ci,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ci => "ci",
        }
    }
}

/// Metadata captured when recording began for one in-flight test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSession {
    pub test_identity: TestIdentity,
    /// Empty when the remote browser session id was unavailable.
    pub remote_session_id: String,
    pub start_time: SystemTime,
    pub node_host: String,
}

impl VideoSession {
    pub fn has_remote_session_id(&self) -> bool {
        !self.remote_session_id.trim().is_empty()
    }
}

/// A directory entry evaluated during one correlation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub len: u64,
    pub modified: SystemTime,
    pub finalized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Identity,
    Temporal,
    Recency,
    NamingPattern,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Temporal => "temporal",
            Self::Recency => "recency",
            Self::NamingPattern => "naming_pattern",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    AttemptsExhausted,
    DeadlineReached,
    DirectoryUnavailable,
}

impl ExhaustionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttemptsExhausted => "attempts_exhausted",
            Self::DeadlineReached => "deadline_reached",
            Self::DirectoryUnavailable => "directory_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationOutcome {
    Matched {
        destination: PathBuf,
        source_name: String,
        strategy: StrategyKind,
        bytes: u64,
        attempts: u32,
    },
    Exhausted {
        reason: ExhaustionReason,
        attempts: u32,
    },
}

impl CorrelationOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Matched { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// One finished correlation, as accumulated for the end-of-run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub test_identity: TestIdentity,
    pub remote_session_id: String,
    pub node_host: String,
    pub outcome: CorrelationOutcome,
}
