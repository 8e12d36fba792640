use crate::errors::ReelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of the marker file left behind when no artifact could be correlated.
pub const MISSING_MARKER_SUFFIX: &str = "_MISSING_VIDEO.txt";

/// Normalized test name used as the correlation key and as the canonical
/// artifact stem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestIdentity(String);

impl TestIdentity {
    pub fn parse(raw: &str) -> Result<Self, ReelError> {
        let normalized = normalize_identity(raw);
        if normalized.is_empty() {
            return Err(ReelError::InvalidIdentity(format!(
                "test identity {raw:?} normalizes to an empty key"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn artifact_file_name(&self, extension: &str) -> String {
        format!("{}.{extension}", self.0)
    }

    pub fn marker_file_name(&self) -> String {
        format!("{}{MISSING_MARKER_SUFFIX}", self.0)
    }
}

impl fmt::Display for TestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercases and collapses every run of non-alphanumeric characters into a
/// single `_`, trimming leading and trailing separators.
pub fn normalize_identity(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    out
}

pub fn is_utility_test(identity: &TestIdentity, skip_patterns: &[String]) -> bool {
    skip_patterns
        .iter()
        .map(|pattern| pattern.to_lowercase())
        .any(|pattern| !pattern.is_empty() && identity.as_str().contains(&pattern))
}

/// Name heuristics for artifacts that were already renamed to a test name,
/// either by this engine in an earlier run or by a legacy timestamped scheme.
pub fn looks_like_finalized_name(file_name: &str, extension: &str) -> bool {
    let lower = file_name.to_lowercase();
    let suffix = format!(".{}", extension.to_lowercase());
    let Some(stem) = lower.strip_suffix(&suffix) else {
        return false;
    };
    stem.contains("test") || stem.contains("scenario") || has_timestamp_suffix(stem)
}

pub fn has_extension(file_name: &str, extension: &str) -> bool {
    file_name
        .to_lowercase()
        .ends_with(&format!(".{}", extension.to_lowercase()))
}

// `_YYYY-MM-DD_HH-MM-SS`
fn has_timestamp_suffix(stem: &str) -> bool {
    const SHAPE: &[u8] = b"_dddd-dd-dd_dd-dd-dd";
    let bytes = stem.as_bytes();
    if bytes.len() < SHAPE.len() {
        return false;
    }
    let tail = &bytes[bytes.len() - SHAPE.len()..];
    tail.iter().zip(SHAPE).all(|(byte, shape)| match shape {
        b'd' => byte.is_ascii_digit(),
        other => byte == other,
    })
}

#[cfg(test)]
mod tests {
    use super::{
        has_extension, is_utility_test, looks_like_finalized_name, normalize_identity,
        TestIdentity,
    };

    #[test]
    fn normalization_collapses_separators_and_lowercases() {
        assert_eq!(normalize_identity("  Login Flow  "), "login_flow");
        assert_eq!(normalize_identity("Checkout::Pay--Now!!"), "checkout_pay_now");
        assert_eq!(normalize_identity("__already_snake__"), "already_snake");
        assert_eq!(normalize_identity("Überprüfung 2"), "berpr_fung_2");
    }

    #[test]
    fn empty_identity_is_rejected() {
        assert!(TestIdentity::parse("   ").is_err());
        assert!(TestIdentity::parse("!!!").is_err());
        let err = TestIdentity::parse("--").expect_err("empty");
        assert!(format!("{err}").contains("empty key"));
    }

    #[test]
    fn canonical_names_follow_identity() {
        let identity = TestIdentity::parse("Login Flow").expect("identity");
        assert_eq!(identity.artifact_file_name("mp4"), "login_flow.mp4");
        assert_eq!(identity.marker_file_name(), "login_flow_MISSING_VIDEO.txt");
    }

    #[test]
    fn utility_hooks_are_detected() {
        let patterns = vec!["setup".to_string(), "teardown".to_string()];
        let hook = TestIdentity::parse("Suite Setup").expect("identity");
        let real = TestIdentity::parse("checkout").expect("identity");
        assert!(is_utility_test(&hook, &patterns));
        assert!(!is_utility_test(&real, &patterns));
    }

    #[test]
    fn finalized_name_heuristics() {
        assert!(looks_like_finalized_name("login_test.mp4", "mp4"));
        assert!(looks_like_finalized_name("Scenario_42.MP4", "mp4"));
        assert!(looks_like_finalized_name("checkout_2024-03-01_10-22-33.mp4", "mp4"));
        assert!(!looks_like_finalized_name("video-abc123def456-chrome.mp4", "mp4"));
        assert!(!looks_like_finalized_name("notes_test.txt", "mp4"));
        assert!(has_extension("A.MP4", "mp4"));
        assert!(!has_extension("a.mp4.part", "mp4"));
    }
}
