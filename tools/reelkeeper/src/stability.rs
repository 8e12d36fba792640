use crate::config::StabilityConfig;
use crate::runtime::{ArtifactFs, Clock, EntryMeta};
use std::path::Path;
use std::time::Duration;

/// Result of waiting for a writer to finish with a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stabilization {
    /// Size and mtime held for the required number of consecutive samples.
    Settled { len: u64 },
    /// The wait ran out but the file is large enough to accept anyway.
    Unsettled { len: u64 },
    TooSmall { len: u64 },
    Vanished,
}

impl Stabilization {
    pub fn is_acceptable(self) -> bool {
        matches!(self, Self::Settled { .. } | Self::Unsettled { .. })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Settled { .. } => "settled",
            Self::Unsettled { .. } => "unsettled",
            Self::TooSmall { .. } => "too_small",
            Self::Vanished => "vanished",
        }
    }
}

/// Heuristic completeness check. A paused writer can still read as stable.
pub struct StabilityValidator<'a> {
    pub fs: &'a dyn ArtifactFs,
    pub clock: &'a dyn Clock,
    pub config: &'a StabilityConfig,
    pub min_artifact_bytes: u64,
}

impl<'a> StabilityValidator<'a> {
    pub fn is_viable_size(&self, len: u64) -> bool {
        len > self.min_artifact_bytes
    }

    /// Two samples one `sample_delay` apart must agree on size and mtime.
    pub fn is_stable(&self, path: &Path) -> bool {
        let Ok(first) = self.fs.metadata(path) else {
            return false;
        };
        if !first.is_file || !self.is_viable_size(first.len) {
            return false;
        }
        if self.clock.sleep_for(self.config.sample_delay()).is_err() {
            return false;
        }
        let Ok(second) = self.fs.metadata(path) else {
            return false;
        };
        same_sample(&first, &second) && self.is_viable_size(second.len)
    }

    pub fn await_stabilization(&self, path: &Path, max_wait: Duration) -> Stabilization {
        let deadline = self.clock.now() + max_wait;
        let required = self.config.required_stable_samples.max(1);
        let mut last: Option<EntryMeta> = None;
        let mut stable_samples = 0u32;

        loop {
            let Ok(current) = self.fs.metadata(path) else {
                return Stabilization::Vanished;
            };
            let unchanged = last
                .as_ref()
                .is_some_and(|previous| same_sample(previous, &current));
            if unchanged && self.is_viable_size(current.len) {
                stable_samples += 1;
                if stable_samples >= required {
                    return Stabilization::Settled { len: current.len };
                }
            } else {
                stable_samples = 0;
            }
            last = Some(current);

            if self.clock.now() >= deadline {
                break;
            }
            if self.clock.sleep_for(self.config.poll_interval()).is_err() {
                break;
            }
        }

        match self.fs.metadata(path) {
            Ok(meta) if self.is_viable_size(meta.len) => Stabilization::Unsettled { len: meta.len },
            Ok(meta) => Stabilization::TooSmall { len: meta.len },
            Err(_) => Stabilization::Vanished,
        }
    }
}

fn same_sample(a: &EntryMeta, b: &EntryMeta) -> bool {
    a.len == b.len && a.modified == b.modified
}
