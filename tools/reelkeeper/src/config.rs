use crate::errors::ReelError;
use crate::runtime::ArtifactFs;
use crate::types::Preset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type EnvMap = BTreeMap<String, String>;

pub const DEFAULT_EXTENSION: &str = "mp4";
pub const DEFAULT_LOG_BUDGET_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub video_dir: Option<PathBuf>,
    pub profile: Option<Preset>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub directory: DirectoryConfig,
    pub correlation: CorrelationSection,
    pub stability: StabilityConfig,
    pub strategies: StrategyConfig,
    pub sessions: SessionsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub video_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub extension: String,
}

/// Preset selection plus explicit knobs that win over the preset's values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelationSection {
    pub profile: Preset,
    pub settling_delay_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub min_artifact_bytes: Option<u64>,
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StabilityConfig {
    pub sample_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub required_stable_samples: u32,
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyConfig {
    pub temporal_lookback_secs: u64,
    pub temporal_lookahead_secs: u64,
    pub recency_window_secs: u64,
    pub recency_min_bytes: u64,
    pub pattern_window_secs: u64,
    pub identity_prefix_len: usize,
    pub engine_suffixes: Vec<String>,
    pub name_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionsConfig {
    pub skip_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub budget_bytes: u64,
}

/// The orchestrator's knobs, resolved from a preset and explicit overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationConfig {
    pub settling_delay: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub min_artifact_bytes: u64,
    pub deadline: Option<Duration>,
}

impl CorrelationConfig {
    pub fn local() -> Self {
        Self {
            settling_delay: Duration::from_secs(15),
            max_attempts: 8,
            retry_delay: Duration::from_secs(5),
            min_artifact_bytes: 50_000,
            deadline: None,
        }
    }

    /// CI recorders flush later; wait longer and retry more.
    pub fn ci() -> Self {
        Self {
            settling_delay: Duration::from_secs(20),
            max_attempts: 12,
            ..Self::local()
        }
    }

    pub fn for_preset(preset: Preset) -> Self {
        match preset {
            Preset::Local => Self::local(),
            Preset::Ci => Self::ci(),
        }
    }
}

impl StabilityConfig {
    pub fn sample_delay(&self) -> Duration {
        Duration::from_millis(self.sample_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            directory: DirectoryConfig {
                video_dir: None,
                output_dir: None,
                extension: DEFAULT_EXTENSION.to_string(),
            },
            correlation: CorrelationSection {
                profile: Preset::Local,
                settling_delay_ms: None,
                max_attempts: None,
                retry_delay_ms: None,
                min_artifact_bytes: None,
                deadline_ms: None,
            },
            stability: StabilityConfig {
                sample_delay_ms: 1_000,
                poll_interval_ms: 1_000,
                required_stable_samples: 3,
                max_wait_ms: 15_000,
            },
            strategies: StrategyConfig {
                temporal_lookback_secs: 5 * 60,
                temporal_lookahead_secs: 2 * 60,
                recency_window_secs: 10 * 60,
                recency_min_bytes: 100_000,
                pattern_window_secs: 15 * 60,
                identity_prefix_len: 8,
                engine_suffixes: vec![
                    "chrome".to_string(),
                    "firefox".to_string(),
                    "edge".to_string(),
                ],
                name_patterns: vec![
                    "video-".to_string(),
                    "session-".to_string(),
                    "recording-".to_string(),
                    "chrome-".to_string(),
                    "selenium-".to_string(),
                ],
            },
            sessions: SessionsConfig {
                skip_patterns: vec![
                    "setup".to_string(),
                    "teardown".to_string(),
                    "beforeclass".to_string(),
                    "afterclass".to_string(),
                ],
            },
            logging: LoggingConfig {
                path: None,
                budget_bytes: DEFAULT_LOG_BUDGET_BYTES,
            },
        }
    }
}

impl AppConfig {
    pub fn effective_correlation(&self) -> CorrelationConfig {
        let section = &self.correlation;
        let mut resolved = CorrelationConfig::for_preset(section.profile);
        if let Some(value) = section.settling_delay_ms {
            resolved.settling_delay = Duration::from_millis(value);
        }
        if let Some(value) = section.max_attempts {
            resolved.max_attempts = value;
        }
        if let Some(value) = section.retry_delay_ms {
            resolved.retry_delay = Duration::from_millis(value);
        }
        if let Some(value) = section.min_artifact_bytes {
            resolved.min_artifact_bytes = value;
        }
        if let Some(value) = section.deadline_ms {
            resolved.deadline = Some(Duration::from_millis(value));
        }
        resolved
    }
}

/// Directories and files the run operates on, absolutized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactScope {
    pub video_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    directory: Option<PartialDirectoryConfig>,
    correlation: Option<PartialCorrelationSection>,
    stability: Option<PartialStabilityConfig>,
    strategies: Option<PartialStrategyConfig>,
    sessions: Option<PartialSessionsConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDirectoryConfig {
    video_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    extension: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCorrelationSection {
    profile: Option<Preset>,
    settling_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
    min_artifact_bytes: Option<u64>,
    deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialStabilityConfig {
    sample_delay_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    required_stable_samples: Option<u32>,
    max_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialStrategyConfig {
    temporal_lookback_secs: Option<u64>,
    temporal_lookahead_secs: Option<u64>,
    recency_window_secs: Option<u64>,
    recency_min_bytes: Option<u64>,
    pattern_window_secs: Option<u64>,
    identity_prefix_len: Option<usize>,
    engine_suffixes: Option<Vec<String>>,
    name_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSessionsConfig {
    skip_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    env: &EnvMap,
    fs: &dyn ArtifactFs,
) -> Result<(AppConfig, ArtifactScope), ReelError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let file_contents = fs.read_to_string(path)?;
        let partial: PartialAppConfig =
            toml::from_str(&file_contents).map_err(|e| ReelError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);
    validate_config(&cfg)?;

    let scope = resolve_scope(process_cwd, &cfg, overrides, env);
    Ok((cfg, scope))
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(directory) = partial.directory {
        if let Some(value) = directory.video_dir {
            cfg.directory.video_dir = Some(value);
        }
        if let Some(value) = directory.output_dir {
            cfg.directory.output_dir = Some(value);
        }
        if let Some(value) = directory.extension {
            cfg.directory.extension = value;
        }
    }

    if let Some(correlation) = partial.correlation {
        if let Some(value) = correlation.profile {
            cfg.correlation.profile = value;
        }
        if let Some(value) = correlation.settling_delay_ms {
            cfg.correlation.settling_delay_ms = Some(value);
        }
        if let Some(value) = correlation.max_attempts {
            cfg.correlation.max_attempts = Some(value);
        }
        if let Some(value) = correlation.retry_delay_ms {
            cfg.correlation.retry_delay_ms = Some(value);
        }
        if let Some(value) = correlation.min_artifact_bytes {
            cfg.correlation.min_artifact_bytes = Some(value);
        }
        if let Some(value) = correlation.deadline_ms {
            cfg.correlation.deadline_ms = Some(value);
        }
    }

    if let Some(stability) = partial.stability {
        if let Some(value) = stability.sample_delay_ms {
            cfg.stability.sample_delay_ms = value;
        }
        if let Some(value) = stability.poll_interval_ms {
            cfg.stability.poll_interval_ms = value;
        }
        if let Some(value) = stability.required_stable_samples {
            cfg.stability.required_stable_samples = value;
        }
        if let Some(value) = stability.max_wait_ms {
            cfg.stability.max_wait_ms = value;
        }
    }

    if let Some(strategies) = partial.strategies {
        if let Some(value) = strategies.temporal_lookback_secs {
            cfg.strategies.temporal_lookback_secs = value;
        }
        if let Some(value) = strategies.temporal_lookahead_secs {
            cfg.strategies.temporal_lookahead_secs = value;
        }
        if let Some(value) = strategies.recency_window_secs {
            cfg.strategies.recency_window_secs = value;
        }
        if let Some(value) = strategies.recency_min_bytes {
            cfg.strategies.recency_min_bytes = value;
        }
        if let Some(value) = strategies.pattern_window_secs {
            cfg.strategies.pattern_window_secs = value;
        }
        if let Some(value) = strategies.identity_prefix_len {
            cfg.strategies.identity_prefix_len = value;
        }
        if let Some(value) = strategies.engine_suffixes {
            cfg.strategies.engine_suffixes = value;
        }
        if let Some(value) = strategies.name_patterns {
            cfg.strategies.name_patterns = value;
        }
    }

    if let Some(sessions) = partial.sessions {
        if let Some(value) = sessions.skip_patterns {
            cfg.sessions.skip_patterns = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = Some(value);
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(video_dir) = &overrides.video_dir {
        cfg.directory.video_dir = Some(video_dir.clone());
    }
    if let Some(profile) = overrides.profile {
        cfg.correlation.profile = profile;
    }
}

pub fn resolve_scope(
    process_cwd: &Path,
    cfg: &AppConfig,
    overrides: &CliOverrides,
    env: &EnvMap,
) -> ArtifactScope {
    let video_dir = if let Some(path) = &overrides.video_dir {
        absolutize_path(process_cwd, path)
    } else if let Some(path) = &cfg.directory.video_dir {
        absolutize_path(process_cwd, path)
    } else if let Some(workspace) = env.get("WORKSPACE").filter(|v| !v.trim().is_empty()) {
        PathBuf::from(workspace).join("videos")
    } else {
        process_cwd
            .join("src")
            .join("test")
            .join("resources")
            .join("videos")
    };

    let output_dir = cfg
        .directory
        .output_dir
        .as_ref()
        .map(|path| absolutize_path(process_cwd, path))
        .unwrap_or_else(|| video_dir.clone());

    let log_path = cfg
        .logging
        .path
        .as_ref()
        .map(|path| absolutize_path(process_cwd, path))
        .unwrap_or_else(|| process_cwd.join(".reelkeeper").join("events.jsonl"));

    ArtifactScope {
        video_dir,
        output_dir,
        log_path,
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), ReelError> {
    let extension = cfg.directory.extension.trim();
    if extension.is_empty() || extension.starts_with('.') {
        return Err(ReelError::InvalidConfig(
            "directory.extension must be a bare extension such as \"mp4\"".to_string(),
        ));
    }

    let correlation = cfg.effective_correlation();
    if correlation.max_attempts == 0 {
        return Err(ReelError::InvalidConfig(
            "correlation.max_attempts must be greater than zero".to_string(),
        ));
    }
    if correlation.min_artifact_bytes == 0 {
        return Err(ReelError::InvalidConfig(
            "correlation.min_artifact_bytes must be greater than zero".to_string(),
        ));
    }

    if cfg.stability.required_stable_samples == 0 {
        return Err(ReelError::InvalidConfig(
            "stability.required_stable_samples must be greater than zero".to_string(),
        ));
    }
    if cfg.stability.poll_interval_ms == 0 {
        return Err(ReelError::InvalidConfig(
            "stability.poll_interval_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_config, AppConfig, CliOverrides, CorrelationConfig, EnvMap};
    use crate::runtime::{ArtifactFs, FakeArtifactFs};
    use crate::types::Preset;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn fs_with_config(text: &str) -> FakeArtifactFs {
        let fs = FakeArtifactFs::default();
        fs.write_string(Path::new("/cfg.toml"), text)
            .expect("seed config");
        fs
    }

    fn overrides() -> CliOverrides {
        CliOverrides {
            config_path: Some(PathBuf::from("/cfg.toml")),
            ..CliOverrides::default()
        }
    }

    #[test]
    fn presets_differ_between_local_and_ci() {
        let local = CorrelationConfig::local();
        let ci = CorrelationConfig::ci();
        assert!(ci.settling_delay > local.settling_delay);
        assert!(ci.max_attempts > local.max_attempts);
        assert_eq!(local.min_artifact_bytes, 50_000);
    }

    #[test]
    fn explicit_knobs_override_preset() {
        let fs = fs_with_config(
            r#"
[correlation]
profile = "ci"
retry_delay_ms = 250
deadline_ms = 60000
"#,
        );
        let (cfg, _) =
            load_config(&overrides(), Path::new("/work"), &EnvMap::new(), &fs).expect("config");
        let resolved = cfg.effective_correlation();
        assert_eq!(resolved.max_attempts, 12);
        assert_eq!(resolved.retry_delay, Duration::from_millis(250));
        assert_eq!(resolved.deadline, Some(Duration::from_secs(60)));
    }

    #[test]
    fn cli_profile_wins_over_file() {
        let fs = fs_with_config("[correlation]\nprofile = \"local\"\n");
        let overrides = CliOverrides {
            profile: Some(Preset::Ci),
            ..overrides()
        };
        let (cfg, _) =
            load_config(&overrides, Path::new("/work"), &EnvMap::new(), &fs).expect("config");
        assert_eq!(cfg.correlation.profile, Preset::Ci);
    }

    #[test]
    fn video_dir_resolution_order() {
        let fs = FakeArtifactFs::default();
        let mut env = EnvMap::new();
        env.insert("WORKSPACE".to_string(), "/jenkins/job".to_string());

        let (_, scope) =
            load_config(&CliOverrides::default(), Path::new("/work"), &env, &fs).expect("config");
        assert_eq!(scope.video_dir, PathBuf::from("/jenkins/job/videos"));
        assert_eq!(scope.output_dir, scope.video_dir);

        let (_, scope) = load_config(
            &CliOverrides::default(),
            Path::new("/work"),
            &EnvMap::new(),
            &fs,
        )
        .expect("config");
        assert_eq!(
            scope.video_dir,
            PathBuf::from("/work/src/test/resources/videos")
        );
        assert_eq!(
            scope.log_path,
            PathBuf::from("/work/.reelkeeper/events.jsonl")
        );

        let explicit = CliOverrides {
            video_dir: Some(PathBuf::from("out/videos")),
            ..CliOverrides::default()
        };
        let (_, scope) = load_config(&explicit, Path::new("/work"), &env, &fs).expect("config");
        assert_eq!(scope.video_dir, PathBuf::from("/work/out/videos"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let fs = fs_with_config("[correlation]\nmax_attempts = 0\n");
        let err = load_config(&overrides(), Path::new("/work"), &EnvMap::new(), &fs)
            .expect_err("zero attempts");
        assert!(format!("{err}").contains("max_attempts"));

        let fs = fs_with_config("[directory]\nextension = \".mp4\"\n");
        assert!(load_config(&overrides(), Path::new("/work"), &EnvMap::new(), &fs).is_err());

        let fs = fs_with_config("[correlation\n");
        let err = load_config(&overrides(), Path::new("/work"), &EnvMap::new(), &fs)
            .expect_err("parse");
        assert!(format!("{err}").contains("config parse error"));
    }

    #[test]
    fn defaults_carry_recorder_naming_conventions() {
        let cfg = AppConfig::default();
        assert!(cfg.strategies.engine_suffixes.contains(&"chrome".to_string()));
        assert!(cfg.strategies.name_patterns.contains(&"video-".to_string()));
        assert_eq!(cfg.effective_correlation(), CorrelationConfig::local());
    }
}
