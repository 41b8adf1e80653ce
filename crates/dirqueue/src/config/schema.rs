use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::Difficulty;
use crate::model::PackageTier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Defaults to `~/.dirqueue/data/dirqueue.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            catalog_path: None,
            queue: QueueConfig::default(),
            retry: RetryConfig::default(),
            worker: WorkerConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

impl Config {
    /// The configured database path, or the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Releases tolerated before a job is moved to `stalled`.
    #[serde(default = "default_max_release_count")]
    pub max_release_count: u32,
    #[serde(default)]
    pub tiers: TiersConfig,
}

fn default_max_release_count() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_release_count: default_max_release_count(),
            tiers: TiersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSettings {
    pub directory_limit: u32,
    pub priority: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TiersConfig {
    #[serde(default = "default_starter")]
    pub starter: TierSettings,
    #[serde(default = "default_growth")]
    pub growth: TierSettings,
    #[serde(default = "default_professional")]
    pub professional: TierSettings,
    #[serde(default = "default_enterprise")]
    pub enterprise: TierSettings,
}

fn default_starter() -> TierSettings {
    TierSettings {
        directory_limit: 50,
        priority: 100,
    }
}

fn default_growth() -> TierSettings {
    TierSettings {
        directory_limit: 100,
        priority: 200,
    }
}

fn default_professional() -> TierSettings {
    TierSettings {
        directory_limit: 300,
        priority: 300,
    }
}

fn default_enterprise() -> TierSettings {
    TierSettings {
        directory_limit: 500,
        priority: 400,
    }
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            starter: default_starter(),
            growth: default_growth(),
            professional: default_professional(),
            enterprise: default_enterprise(),
        }
    }
}

impl TiersConfig {
    pub fn get(&self, tier: PackageTier) -> TierSettings {
        match tier {
            PackageTier::Starter => self.starter,
            PackageTier::Growth => self.growth,
            PackageTier::Professional => self.professional,
            PackageTier::Enterprise => self.enterprise,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub max_attempts: MaxAttemptsConfig,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: MaxAttemptsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxAttemptsConfig {
    #[serde(default = "default_easy_attempts")]
    pub easy: u32,
    #[serde(default = "default_medium_attempts")]
    pub medium: u32,
    #[serde(default = "default_hard_attempts")]
    pub hard: u32,
}

fn default_easy_attempts() -> u32 {
    2
}

fn default_medium_attempts() -> u32 {
    3
}

fn default_hard_attempts() -> u32 {
    4
}

impl Default for MaxAttemptsConfig {
    fn default() -> Self {
        Self {
            easy: default_easy_attempts(),
            medium: default_medium_attempts(),
            hard: default_hard_attempts(),
        }
    }
}

impl MaxAttemptsConfig {
    pub fn for_difficulty(&self, difficulty: Difficulty) -> u32 {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Liveness window = multiplier x heartbeat interval.
    #[serde(default = "default_liveness_multiplier")]
    pub liveness_multiplier: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Pause between consecutive submission attempts.
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_liveness_multiplier() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

fn default_rate_limit_delay_ms() -> u64 {
    2000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            liveness_multiplier: default_liveness_multiplier(),
            poll_interval_ms: default_poll_interval_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn liveness_window(&self) -> Duration {
        self.heartbeat_interval() * self.liveness_multiplier
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Number of recent finished entries averaged for ETA.
    #[serde(default = "default_eta_window")]
    pub eta_window: u32,
}

fn default_eta_window() -> u32 {
    50
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            eta_window: default_eta_window(),
        }
    }
}
