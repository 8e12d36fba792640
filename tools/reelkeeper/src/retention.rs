use crate::errors::ReelError;
use crate::identity::{has_extension, MISSING_MARKER_SUFFIX};
use crate::runtime::ArtifactFs;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const LOG_EXTENSION: &str = "jsonl";

/// Deletes the oldest `*.jsonl` logs in `dir` until the logs fit in
/// `budget_bytes`. Other files in `dir` are neither counted nor touched.
pub fn enforce_total_budget(dir: &Path, budget_bytes: u64) -> Result<Vec<PathBuf>, ReelError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| ReelError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| has_extension(&name.to_string_lossy(), LOG_EXTENSION))
        })
        .collect::<Vec<_>>();

    files.sort_by(|a, b| {
        let ma = fs::metadata(a).ok().and_then(|m| m.modified().ok());
        let mb = fs::metadata(b).ok().and_then(|m| m.modified().ok());
        ma.cmp(&mb)
    });

    let mut total = files
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in files {
        if total <= budget_bytes {
            break;
        }
        let len = fs::metadata(&path)
            .map_err(|e| ReelError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| ReelError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: Vec<PathBuf>,
    pub freed_bytes: u64,
    pub failed: Vec<PathBuf>,
}

/// Deletes video files and missing-artifact markers last modified before
/// `now - older_than`. Entries that cannot be removed are reported, not fatal.
pub fn prune_stale_artifacts(
    fs: &dyn ArtifactFs,
    dir: &Path,
    extension: &str,
    older_than: Duration,
    now: SystemTime,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    let Some(cutoff) = now.checked_sub(older_than) else {
        return report;
    };
    let Ok(entries) = fs.read_dir(dir) else {
        return report;
    };

    for path in entries {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if !has_extension(&name, extension) && !name.ends_with(MISSING_MARKER_SUFFIX) {
            continue;
        }
        let Ok(meta) = fs.metadata(&path) else {
            continue;
        };
        if !meta.is_file || meta.modified >= cutoff {
            continue;
        }
        match fs.remove_file(&path) {
            Ok(()) => {
                report.freed_bytes = report.freed_bytes.saturating_add(meta.len);
                report.deleted.push(path);
            }
            Err(_) => report.failed.push(path),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::{enforce_total_budget, prune_stale_artifacts};
    use crate::runtime::FakeArtifactFs;
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    #[test]
    fn prunes_oldest_files_until_budget_is_met() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.jsonl"), vec![0u8; 40]).expect("a");
        std::thread::sleep(std::time::Duration::from_millis(2));
        fs::write(dir.path().join("b.jsonl"), vec![0u8; 40]).expect("b");

        let deleted = enforce_total_budget(dir.path(), 50).expect("pruned");
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].ends_with("a.jsonl"));
    }

    #[test]
    fn budget_ignores_recordings_sharing_the_log_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("video-other-session.mp4"), vec![0u8; 200]).expect("video");
        fs::write(dir.path().join("checkout_MISSING_VIDEO.txt"), vec![0u8; 200]).expect("marker");
        std::thread::sleep(std::time::Duration::from_millis(2));
        fs::write(dir.path().join("events.jsonl"), vec![0u8; 40]).expect("log");

        let deleted = enforce_total_budget(dir.path(), 50).expect("pruned");
        assert!(deleted.is_empty());
        assert!(dir.path().join("video-other-session.mp4").exists());
        assert!(dir.path().join("checkout_MISSING_VIDEO.txt").exists());
    }

    #[test]
    fn stale_videos_and_markers_are_removed() {
        let day = Duration::from_secs(24 * 60 * 60);
        let now = SystemTime::UNIX_EPOCH + day * 30;
        let fs = FakeArtifactFs::with_dir("/videos");
        fs.add_file("/videos/old.mp4", 700, now - day * 10);
        fs.add_file("/videos/fresh.mp4", 900, now - day);
        fs.add_file("/videos/gone_MISSING_VIDEO.txt", 80, now - day * 9);
        fs.add_file("/videos/notes.txt", 10, now - day * 20);
        fs.add_file("/videos/locked.mp4", 50, now - day * 12);
        fs.fail_removal_of("/videos/locked.mp4");

        let report = prune_stale_artifacts(&fs, Path::new("/videos"), "mp4", day * 7, now);

        assert_eq!(report.deleted.len(), 2);
        assert_eq!(report.freed_bytes, 780);
        assert_eq!(report.failed.len(), 1);
        let mut remaining = fs.file_names(Path::new("/videos"));
        remaining.sort();
        assert_eq!(remaining, vec!["fresh.mp4", "locked.mp4", "notes.txt"]);
    }
}
