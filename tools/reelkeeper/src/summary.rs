use crate::errors::ReelError;
use crate::identity::{has_extension, MISSING_MARKER_SUFFIX};
use crate::runtime::ArtifactFs;
use crate::types::{CorrelationOutcome, SessionRecord};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

pub const SUMMARY_FILE_PREFIX: &str = "video_summary_";

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;
const GB: f64 = MB * 1024.0;

pub fn format_file_size(bytes: u64) -> String {
    let value = bytes as f64;
    if value < KB {
        format!("{bytes} B")
    } else if value < MB {
        format!("{:.1} KB", value / KB)
    } else if value < GB {
        format!("{:.1} MB", value / MB)
    } else {
        format!("{:.1} GB", value / GB)
    }
}

/// Outcomes accumulated across one run, in completion order.
#[derive(Debug, Default)]
pub struct OutcomeLedger {
    records: Mutex<Vec<SessionRecord>>,
}

impl OutcomeLedger {
    pub fn record(&self, record: SessionRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeLine {
    pub test: String,
    pub status: &'static str,
    /// Strategy name when matched, exhaustion reason otherwise.
    pub detail: &'static str,
    pub attempts: u32,
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLine {
    pub name: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub generated_at: String,
    pub video_dir: PathBuf,
    pub total_sessions: usize,
    pub matched: usize,
    pub exhausted: usize,
    pub matched_bytes: u64,
    pub outcomes: Vec<OutcomeLine>,
    pub video_files: Vec<FileLine>,
    pub video_bytes: u64,
    pub missing_markers: Vec<String>,
}

/// Aggregates `records` and the current directory contents. Reads only.
pub fn build_summary(
    records: &[SessionRecord],
    fs: &dyn ArtifactFs,
    dir: &Path,
    extension: &str,
    now: SystemTime,
) -> RunSummary {
    let outcomes = records
        .iter()
        .map(|record| match &record.outcome {
            CorrelationOutcome::Matched {
                strategy,
                bytes,
                attempts,
                ..
            } => OutcomeLine {
                test: record.test_identity.to_string(),
                status: "matched",
                detail: strategy.as_str(),
                attempts: *attempts,
                bytes: Some(*bytes),
            },
            CorrelationOutcome::Exhausted { reason, attempts } => OutcomeLine {
                test: record.test_identity.to_string(),
                status: "missing",
                detail: reason.as_str(),
                attempts: *attempts,
                bytes: None,
            },
        })
        .collect::<Vec<_>>();
    let matched = outcomes.iter().filter(|line| line.bytes.is_some()).count();
    let matched_bytes = outcomes.iter().filter_map(|line| line.bytes).sum();

    let mut video_files = Vec::new();
    let mut missing_markers = Vec::new();
    for path in fs.read_dir(dir).unwrap_or_default() {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if name.ends_with(MISSING_MARKER_SUFFIX) {
            missing_markers.push(name);
        } else if has_extension(&name, extension) {
            if let Ok(meta) = fs.metadata(&path) {
                if meta.is_file {
                    video_files.push(FileLine {
                        name,
                        bytes: meta.len,
                    });
                }
            }
        }
    }
    video_files.sort_by(|a, b| a.name.cmp(&b.name));
    missing_markers.sort();
    let video_bytes = video_files.iter().map(|file| file.bytes).sum();

    let generated: DateTime<Local> = now.into();
    RunSummary {
        generated_at: generated.format("%Y-%m-%d %H:%M:%S").to_string(),
        video_dir: dir.to_path_buf(),
        total_sessions: outcomes.len(),
        matched,
        exhausted: outcomes.len() - matched,
        matched_bytes,
        outcomes,
        video_files,
        video_bytes,
        missing_markers,
    }
}

impl RunSummary {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("VIDEO RECORDING SUMMARY REPORT\n");
        out.push_str("=====================================\n");
        out.push_str(&format!("Generated: {}\n", self.generated_at));
        out.push_str(&format!("Video Directory: {}\n\n", self.video_dir.display()));

        out.push_str(&format!(
            "SESSIONS: {} total, {} matched, {} missing\n",
            self.total_sessions, self.matched, self.exhausted
        ));
        for line in &self.outcomes {
            let size = line.bytes.map(format_file_size).unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "- {} [{}] {} after {} attempt(s), {}\n",
                line.test, line.status, line.detail, line.attempts, size
            ));
        }
        out.push_str(&format!(
            "MATCHED SIZE: {}\n\n",
            format_file_size(self.matched_bytes)
        ));

        if self.video_files.is_empty() {
            out.push_str("NO VIDEO FILES FOUND\n");
        } else {
            out.push_str(&format!("VIDEO FILES ({}):\n", self.video_files.len()));
            for file in &self.video_files {
                out.push_str(&format!("- {} ({})\n", file.name, format_file_size(file.bytes)));
            }
            out.push_str(&format!("\nTOTAL SIZE: {}\n", format_file_size(self.video_bytes)));
        }

        if !self.missing_markers.is_empty() {
            out.push_str(&format!("\nMISSING VIDEOS ({}):\n", self.missing_markers.len()));
            for marker in &self.missing_markers {
                out.push_str(&format!("- {marker}\n"));
            }
        }
        out
    }
}

pub fn summary_file_name(now: SystemTime) -> String {
    let stamp: DateTime<Local> = now.into();
    format!("{SUMMARY_FILE_PREFIX}{}.txt", stamp.format("%Y-%m-%d_%H-%M-%S"))
}

/// Writes the rendered report next to the artifacts. Skipped when the
/// directory does not exist.
pub fn write_summary(
    fs: &dyn ArtifactFs,
    summary: &RunSummary,
    now: SystemTime,
) -> Result<Option<PathBuf>, ReelError> {
    if !fs.is_dir(&summary.video_dir) {
        return Ok(None);
    }
    let path = summary.video_dir.join(summary_file_name(now));
    fs.write_string(&path, &summary.render())?;
    Ok(Some(path))
}
