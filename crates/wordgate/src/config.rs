//! Configuration types and fallback-chain loading (SPEC_FULL §3.1): mirrors
//! the teacher's `Config::load` shape — explicit path, then project-local
//! file, then user config dir, then built-in defaults — with every
//! sub-section corresponding to one component.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::acceptance::Policy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: PolicyConfig,
    pub pool: PoolConfig,
    pub queue: QueueConfig,
    pub journal: JournalConfig,
    pub verifier: VerifierConfig,
    pub sync: SyncConfig,
    pub broadcaster: BroadcasterConfig,
    pub storage: StorageConfig,
    pub failure: FailureConfig,
}

impl Config {
    /// Fallback chain: explicit `--config` path, then `./wordgate.yml`,
    /// then `dirs::config_dir()/wordgate/wordgate.yml`, then defaults.
    /// Environment variables are layered on top after loading.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_path {
            Self::load_from_file(path).context(format!("failed to load config from {}", path.display()))?
        } else if let Some(config) = Self::try_local() {
            config
        } else if let Some(config) = Self::try_user_config() {
            config
        } else {
            tracing::info!("no config file found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn try_local() -> Option<Self> {
        let local_config = PathBuf::from("wordgate.yml");
        if !local_config.exists() {
            return None;
        }
        match Self::load_from_file(&local_config) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("failed to load config from {}: {}", local_config.display(), e);
                None
            }
        }
    }

    fn try_user_config() -> Option<Self> {
        let config_dir = dirs::config_dir()?;
        let user_config = config_dir.join("wordgate").join("wordgate.yml");
        if !user_config.exists() {
            return None;
        }
        match Self::load_from_file(&user_config) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("failed to load config from {}: {}", user_config.display(), e);
                None
            }
        }
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!("loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Layers environment variables over file-loaded values (spec §6):
    /// `FAILURE_THRESHOLD`, `TASK_TIMEOUT_MS`, and `WORDGATE_ENV` (the
    /// `NODE_ENV`-equivalent controlling log verbosity downstream).
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u32("FAILURE_THRESHOLD") {
            self.failure.failure_threshold = v;
        }
        if let Some(v) = env_u64("TASK_TIMEOUT_MS") {
            self.failure.task_timeout_ms = v;
        }
    }

    pub fn policy(&self) -> Policy {
        Policy {
            work_start_hour: self.policy.work_start_hour,
            work_end_hour: self.policy.work_end_hour,
            urgent_hours_threshold: self.policy.urgent_hours_threshold,
            shift_night_deadline: self.policy.shift_night_deadline,
            urgent_days_threshold: self.policy.urgent_days_threshold,
        }
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    #[serde(rename = "work-start-hour")]
    pub work_start_hour: u32,
    #[serde(rename = "work-end-hour")]
    pub work_end_hour: u32,
    #[serde(rename = "urgent-hours-threshold")]
    pub urgent_hours_threshold: i64,
    #[serde(rename = "shift-night-deadline")]
    pub shift_night_deadline: bool,
    #[serde(rename = "default-cap")]
    pub default_cap: u32,
    #[serde(rename = "urgent-days-threshold")]
    pub urgent_days_threshold: usize,
    #[serde(rename = "time-zone")]
    pub time_zone: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let defaults = Policy::default();
        Self {
            work_start_hour: defaults.work_start_hour,
            work_end_hour: defaults.work_end_hour,
            urgent_hours_threshold: defaults.urgent_hours_threshold,
            shift_night_deadline: defaults.shift_night_deadline,
            default_cap: crate::capacity::DEFAULT_CAP,
            urgent_days_threshold: defaults.urgent_days_threshold,
            time_zone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub size: usize,
    #[serde(rename = "profile-root")]
    pub profile_root: PathBuf,
    #[serde(rename = "acquire-timeout-ms")]
    pub acquire_timeout_ms: u64,
    #[serde(rename = "recreate-backoff-ms")]
    pub recreate_backoff_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            profile_root: PathBuf::from("profiles"),
            acquire_timeout_ms: 30_000,
            recreate_backoff_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub concurrency: usize,
    #[serde(rename = "meta-concurrency")]
    pub meta_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { concurrency: 3, meta_concurrency: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    #[serde(rename = "db-path")]
    pub db_path: PathBuf,
    #[serde(rename = "stale-timeout-ms")]
    pub stale_timeout_ms: u64,
    #[serde(rename = "cleanup-age-days")]
    pub cleanup_age_days: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("journal.sqlite3"),
            stale_timeout_ms: 10 * 60 * 1000,
            cleanup_age_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    #[serde(rename = "verify-after-ms")]
    pub verify_after_ms: u64,
    #[serde(rename = "max-results")]
    pub max_results: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self { verify_after_ms: 5 * 60 * 1000, max_results: crate::verifier::MAX_RESULTS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { interval_ms: 15 * 60 * 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    #[serde(rename = "debounce-ms")]
    pub debounce_ms: u64,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self { debounce_ms: 250 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from(".wordgate") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfig {
    #[serde(rename = "failure-threshold")]
    pub failure_threshold: u32,
    #[serde(rename = "task-timeout-ms")]
    pub task_timeout_ms: u64,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self { failure_threshold: 3, task_timeout_ms: 180_000 }
    }
}
