use crate::errors::ReelError;
use crate::identity::{has_extension, looks_like_finalized_name};
use crate::runtime::ArtifactFs;
use crate::types::CandidateArtifact;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

const RECENT_MINUTES: u64 = 15;
const OLD_MINUTES: u64 = 60;

/// One canonical artifact name per line, kept next to the artifacts.
pub const FINALIZED_LEDGER_FILE: &str = ".reelkeeper-finalized";

/// Names of canonical artifacts the engine has committed or is committing.
/// Combined with the naming heuristics it keeps the engine from re-selecting
/// its own output. With a ledger, names committed by earlier processes on the
/// same output directory count too.
#[derive(Debug, Default)]
pub struct FinalizedIndex {
    names: Mutex<HashSet<String>>,
    ledger: Option<PathBuf>,
}

impl FinalizedIndex {
    pub fn with_ledger(path: impl Into<PathBuf>) -> Self {
        Self {
            names: Mutex::default(),
            ledger: Some(path.into()),
        }
    }

    pub fn record(&self, file_name: &str) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file_name.to_lowercase());
    }

    pub fn release(&self, file_name: &str) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&file_name.to_lowercase());
    }

    /// Records `file_name` and appends it to the ledger.
    pub fn persist(&self, fs: &dyn ArtifactFs, file_name: &str) -> Result<(), ReelError> {
        self.record(file_name);
        match &self.ledger {
            Some(path) => fs.append_string(path, &format!("{}\n", file_name.to_lowercase())),
            None => Ok(()),
        }
    }

    /// Merges names other processes appended to the ledger. A missing or
    /// unreadable ledger leaves the index as it is.
    pub fn refresh(&self, fs: &dyn ArtifactFs) {
        let Some(path) = &self.ledger else {
            return;
        };
        let Ok(text) = fs.read_to_string(path) else {
            return;
        };
        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            names.insert(line.to_lowercase());
        }
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&file_name.to_lowercase())
    }

    pub fn is_finalized(&self, file_name: &str, extension: &str) -> bool {
        self.contains(file_name) || looks_like_finalized_name(file_name, extension)
    }
}

/// Read-only view over one artifact directory.
pub struct FileProbe<'a> {
    pub fs: &'a dyn ArtifactFs,
    pub dir: &'a Path,
    pub extension: &'a str,
    pub finalized: &'a FinalizedIndex,
    /// Eligible candidates are strictly larger than this.
    pub min_bytes: u64,
}

impl<'a> FileProbe<'a> {
    pub fn directory_exists(&self) -> bool {
        self.fs.is_dir(self.dir)
    }

    /// Every regular file with the artifact extension that satisfies
    /// `predicate`. An unreadable or missing directory yields an empty list;
    /// callers that care check `directory_exists` first.
    pub fn list(&self, predicate: impl Fn(&CandidateArtifact) -> bool) -> Vec<CandidateArtifact> {
        let Ok(entries) = self.fs.read_dir(self.dir) else {
            return Vec::new();
        };
        self.finalized.refresh(self.fs);
        entries
            .into_iter()
            .filter_map(|path| self.candidate(path))
            .filter(|candidate| predicate(candidate))
            .collect()
    }

    /// Like `list`, minus anything already finalized or too small to be a
    /// complete recording.
    pub fn eligible(
        &self,
        predicate: impl Fn(&CandidateArtifact) -> bool,
    ) -> Vec<CandidateArtifact> {
        self.list(|candidate| {
            !candidate.finalized && candidate.len > self.min_bytes && predicate(candidate)
        })
    }

    fn candidate(&self, path: PathBuf) -> Option<CandidateArtifact> {
        let file_name = path.file_name()?.to_string_lossy().to_string();
        if !has_extension(&file_name, self.extension) {
            return None;
        }
        let meta = self.fs.metadata(&path).ok()?;
        if !meta.is_file {
            return None;
        }
        let finalized = self.finalized.is_finalized(&file_name, self.extension);
        Some(CandidateArtifact {
            path,
            file_name,
            len: meta.len,
            modified: meta.modified,
            finalized,
        })
    }
}

pub fn sort_newest_first(candidates: &mut [CandidateArtifact]) {
    candidates.sort_by(|a, b| b.modified.cmp(&a.modified));
}

pub fn name_contains(candidate: &CandidateArtifact, needle: &str) -> bool {
    candidate
        .file_name
        .to_lowercase()
        .contains(&needle.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoCategory {
    RawVideo,
    TestVideo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeCategory {
    Recent,
    Old,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEntry {
    pub name: String,
    pub is_dir: bool,
    pub len: u64,
    pub age_minutes: u64,
    pub video: Option<VideoCategory>,
    pub age: Option<AgeCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryDiagnosis {
    pub dir: PathBuf,
    pub exists: bool,
    pub readable: bool,
    pub writable: bool,
    pub entries: Vec<DiagnosticEntry>,
    pub video_files: usize,
    pub test_videos: usize,
    pub recent_files: usize,
    pub old_files: usize,
}

/// Operator-facing scan of the artifact directory, used when correlation
/// gives up. Never mutates anything except a short-lived write probe.
pub fn diagnose(
    fs: &dyn ArtifactFs,
    dir: &Path,
    extension: &str,
    finalized: &FinalizedIndex,
    now: SystemTime,
) -> DirectoryDiagnosis {
    let mut diagnosis = DirectoryDiagnosis {
        dir: dir.to_path_buf(),
        exists: fs.is_dir(dir),
        readable: false,
        writable: false,
        entries: Vec::new(),
        video_files: 0,
        test_videos: 0,
        recent_files: 0,
        old_files: 0,
    };
    if !diagnosis.exists {
        return diagnosis;
    }

    diagnosis.writable = probe_writable(fs, dir, now);
    let Ok(mut paths) = fs.read_dir(dir) else {
        return diagnosis;
    };
    diagnosis.readable = true;
    finalized.refresh(fs);
    paths.sort();

    for path in paths {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let Ok(meta) = fs.metadata(&path) else {
            continue;
        };
        let age_minutes = now
            .duration_since(meta.modified)
            .map(|age| age.as_secs() / 60)
            .unwrap_or(0);
        let mut entry = DiagnosticEntry {
            name,
            is_dir: !meta.is_file,
            len: meta.len,
            age_minutes,
            video: None,
            age: None,
        };
        if meta.is_file {
            if has_extension(&entry.name, extension) {
                diagnosis.video_files += 1;
                if finalized.is_finalized(&entry.name, extension) {
                    diagnosis.test_videos += 1;
                    entry.video = Some(VideoCategory::TestVideo);
                } else {
                    entry.video = Some(VideoCategory::RawVideo);
                }
            }
            if age_minutes < RECENT_MINUTES {
                diagnosis.recent_files += 1;
                entry.age = Some(AgeCategory::Recent);
            } else if age_minutes > OLD_MINUTES {
                diagnosis.old_files += 1;
                entry.age = Some(AgeCategory::Old);
            }
        }
        diagnosis.entries.push(entry);
    }

    diagnosis
}

pub fn probe_writable(fs: &dyn ArtifactFs, dir: &Path, now: SystemTime) -> bool {
    let nanos = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let probe = dir.join(format!(".reelkeeper_write_probe_{nanos}.tmp"));
    if fs.write_string(&probe, "").is_err() {
        return false;
    }
    let _ = fs.remove_file(&probe);
    true
}

impl DirectoryDiagnosis {
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("directory: {}", self.dir.display()),
            format!("exists: {}", self.exists),
            format!("readable: {}", self.readable),
            format!("writable: {}", self.writable),
        ];
        if !self.exists {
            lines.push("video directory does not exist".to_string());
            return lines;
        }
        if self.entries.is_empty() {
            lines.push("video directory is empty".to_string());
            return lines;
        }
        lines.push(format!("contents ({} entries):", self.entries.len()));
        for entry in &self.entries {
            let mut category = String::new();
            match entry.video {
                Some(VideoCategory::TestVideo) => category.push_str("[TEST VIDEO]"),
                Some(VideoCategory::RawVideo) => category.push_str("[RAW VIDEO]"),
                None => {}
            }
            match entry.age {
                Some(AgeCategory::Recent) => category.push_str("[RECENT]"),
                Some(AgeCategory::Old) => category.push_str("[OLD]"),
                None => {}
            }
            let kind = if entry.is_dir { "DIR" } else { "FILE" };
            lines.push(format!(
                "  [{kind}] {category} {} ({}, {} min old)",
                entry.name,
                crate::summary::format_file_size(entry.len),
                entry.age_minutes
            ));
        }
        lines.push(format!("total entries: {}", self.entries.len()));
        lines.push(format!("video files: {}", self.video_files));
        lines.push(format!("test videos: {}", self.test_videos));
        lines.push(format!("recent files (<{RECENT_MINUTES}min): {}", self.recent_files));
        lines.push(format!("old files (>{OLD_MINUTES}min): {}", self.old_files));
        lines
    }
}
