//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use dirqueue::catalog::{Difficulty, Directory, StaticCatalog};
use dirqueue::config::{Config, TierSettings};
use dirqueue::model::PackageTier;

/// Builder for creating `StaticCatalog` instances.
#[derive(Default)]
pub struct CatalogBuilder {
    directories: Vec<Directory>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory with an explicit difficulty.
    pub fn directory(mut self, id: &str, difficulty: Difficulty) -> Self {
        self.directories.push(Directory {
            id: id.to_string(),
            name: id.to_uppercase(),
            submission_url: format!("https://{}.example/submit", id),
            difficulty: Some(difficulty),
            domain_authority: None,
            required_fields: vec!["businessName".to_string()],
        });
        self
    }

    /// Add `count` medium directories named `{prefix}-{n}`.
    pub fn many(mut self, prefix: &str, count: usize) -> Self {
        for n in 0..count {
            self = self.directory(&format!("{}-{}", prefix, n), Difficulty::Medium);
        }
        self
    }

    pub fn build(self) -> StaticCatalog {
        StaticCatalog::new(self.directories).expect("catalog ids must be unique")
    }
}

/// Builder for creating `Config` instances with no waiting anywhere.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.retry.base_delay_ms = 0;
        config.retry.max_delay_ms = 0;
        config.worker.heartbeat_interval_secs = 1;
        config.worker.poll_interval_ms = 10;
        config.worker.rate_limit_delay_ms = 0;
        config.worker.attempt_timeout_secs = 5;
        Self { config }
    }

    pub fn tier(mut self, tier: PackageTier, directory_limit: u32, priority: i64) -> Self {
        let settings = TierSettings {
            directory_limit,
            priority,
        };
        match tier {
            PackageTier::Starter => self.config.queue.tiers.starter = settings,
            PackageTier::Growth => self.config.queue.tiers.growth = settings,
            PackageTier::Professional => self.config.queue.tiers.professional = settings,
            PackageTier::Enterprise => self.config.queue.tiers.enterprise = settings,
        }
        self
    }

    pub fn max_attempts(mut self, easy: u32, medium: u32, hard: u32) -> Self {
        self.config.retry.max_attempts.easy = easy;
        self.config.retry.max_attempts.medium = medium;
        self.config.retry.max_attempts.hard = hard;
        self
    }

    pub fn max_release_count(mut self, count: u32) -> Self {
        self.config.queue.max_release_count = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
