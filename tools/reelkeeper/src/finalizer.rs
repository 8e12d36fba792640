use crate::errors::ReelError;
use crate::identity::TestIdentity;
use crate::logging::{JsonlLogger, LogEvent};
use crate::probe::FinalizedIndex;
use crate::runtime::{ArtifactFs, Clock};
use crate::stability::StabilityValidator;
use crate::types::CandidateArtifact;
use chrono::{DateTime, Local};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeResult {
    Committed { destination: PathBuf, bytes: u64 },
    Rejected(FinalizeFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeFailure {
    /// Another worker is finalizing the same source file.
    SourceClaimed,
    SourceIsDestination,
    SourceVanished,
    CopyFailed(String),
    VerificationFailed { copied: u64, observed: Option<u64> },
}

impl FinalizeFailure {
    pub fn describe(&self) -> String {
        match self {
            Self::SourceClaimed => "source is being finalized by another worker".to_string(),
            Self::SourceIsDestination => "source already has the canonical name".to_string(),
            Self::SourceVanished => "source disappeared before copy".to_string(),
            Self::CopyFailed(reason) => format!("copy failed: {reason}"),
            Self::VerificationFailed { copied, observed } => match observed {
                Some(len) => format!("destination holds {len} bytes after copying {copied}"),
                None => format!("destination missing after copying {copied} bytes"),
            },
        }
    }
}

/// Source paths currently being finalized.
#[derive(Debug, Default)]
pub struct ClaimSet {
    claimed: Mutex<HashSet<PathBuf>>,
}

impl ClaimSet {
    fn claim(&self, path: &Path) -> Option<ClaimGuard<'_>> {
        let inserted = self
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf());
        inserted.then(|| ClaimGuard {
            set: self,
            path: path.to_path_buf(),
        })
    }
}

struct ClaimGuard<'a> {
    set: &'a ClaimSet,
    path: PathBuf,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.set
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

/// Copies a matched recording to its canonical name and retires the source.
pub struct ArtifactFinalizer<'a> {
    pub fs: &'a dyn ArtifactFs,
    pub validator: StabilityValidator<'a>,
    pub output_dir: &'a Path,
    pub extension: &'a str,
    pub stabilization_wait: Duration,
    pub finalized: &'a FinalizedIndex,
    pub claims: &'a ClaimSet,
    pub logger: Option<&'a JsonlLogger>,
}

impl<'a> ArtifactFinalizer<'a> {
    pub fn destination_for(&self, identity: &TestIdentity) -> PathBuf {
        self.output_dir
            .join(identity.artifact_file_name(self.extension))
    }

    pub fn finalize(&self, candidate: &CandidateArtifact, identity: &TestIdentity) -> FinalizeResult {
        let destination = self.destination_for(identity);
        if candidate.path == destination {
            return FinalizeResult::Rejected(FinalizeFailure::SourceIsDestination);
        }
        let Some(_claim) = self.claims.claim(&candidate.path) else {
            return FinalizeResult::Rejected(FinalizeFailure::SourceClaimed);
        };

        let settled = self
            .validator
            .await_stabilization(&candidate.path, self.stabilization_wait);
        if !settled.is_acceptable() {
            self.log(
                "warn",
                "source_not_settled",
                json!({
                    "test": identity.as_str(),
                    "source": candidate.file_name,
                    "stabilization": settled.as_str(),
                }),
            );
        }
        if !self.fs.exists(&candidate.path) {
            return FinalizeResult::Rejected(FinalizeFailure::SourceVanished);
        }

        if !self.fs.is_dir(self.output_dir) {
            if let Err(error) = self.fs.create_dir_all(self.output_dir) {
                return FinalizeResult::Rejected(FinalizeFailure::CopyFailed(error.to_string()));
            }
        }
        if self.fs.exists(&destination) {
            if let Err(error) = self.fs.remove_file(&destination) {
                self.log(
                    "warn",
                    "destination_cleanup_failed",
                    json!({"destination": destination.display().to_string(), "error": error.to_string()}),
                );
            }
        }

        let destination_name = identity.artifact_file_name(self.extension);
        self.finalized.record(&destination_name);
        let copied = match self.fs.copy(&candidate.path, &destination) {
            Ok(bytes) => bytes,
            Err(error) => {
                self.discard_partial(&destination);
                return FinalizeResult::Rejected(FinalizeFailure::CopyFailed(error.to_string()));
            }
        };

        let observed = self.fs.metadata(&destination).ok().map(|meta| meta.len);
        let verified = observed
            .is_some_and(|len| len == copied && self.validator.is_viable_size(len));
        if !verified {
            self.discard_partial(&destination);
            return FinalizeResult::Rejected(FinalizeFailure::VerificationFailed {
                copied,
                observed,
            });
        }

        if let Err(error) = self.finalized.persist(self.fs, &destination_name) {
            self.log(
                "warn",
                "ledger_write_failed",
                json!({"destination": destination_name, "error": error.to_string()}),
            );
        }
        if let Err(error) = self.fs.remove_file(&candidate.path) {
            self.log(
                "warn",
                "source_cleanup_failed",
                json!({"source": candidate.file_name, "error": error.to_string()}),
            );
        }

        FinalizeResult::Committed {
            destination,
            bytes: copied,
        }
    }

    fn discard_partial(&self, destination: &Path) {
        if let Some(name) = destination.file_name() {
            self.finalized.release(&name.to_string_lossy());
        }
        if !self.fs.exists(destination) {
            return;
        }
        if let Err(error) = self.fs.remove_file(destination) {
            self.log(
                "warn",
                "destination_cleanup_failed",
                json!({"destination": destination.display().to_string(), "error": error.to_string()}),
            );
        }
    }

    fn log(&self, level: &str, event_type: &str, payload: serde_json::Value) {
        if let Some(logger) = self.logger {
            let _ = logger.append(&LogEvent {
                level,
                event_type,
                payload,
            });
        }
    }
}

/// Writes `<identity>_MISSING_VIDEO.txt` into `dir`.
pub fn write_missing_marker(
    fs: &dyn ArtifactFs,
    clock: &dyn Clock,
    dir: &Path,
    identity: &TestIdentity,
) -> Result<PathBuf, ReelError> {
    let path = dir.join(identity.marker_file_name());
    let stamp: DateTime<Local> = clock.now().into();
    let contents = format!(
        "Video recording was expected but not found for test: {identity}\n\
         Timestamp: {}\n\
         Test execution completed but video file was not generated or found.\n",
        stamp.format("%Y-%m-%d_%H-%M-%S")
    );
    fs.write_string(&path, &contents)?;
    Ok(path)
}
