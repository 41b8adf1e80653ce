use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::model::PackageTier;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    // Tiers: positive limits, priorities strictly increasing with the package.
    let mut previous: Option<(PackageTier, i64)> = None;
    for tier in PackageTier::ALL {
        let settings = config.queue.tiers.get(tier);
        if settings.directory_limit == 0 {
            return Err(invalid(format!(
                "Tier '{}' must allow at least one directory",
                tier
            )));
        }
        if let Some((lower, lower_priority)) = previous {
            if settings.priority <= lower_priority {
                return Err(invalid(format!(
                    "Tier '{}' priority ({}) must be higher than '{}' ({})",
                    tier, settings.priority, lower, lower_priority
                )));
            }
        }
        previous = Some((tier, settings.priority));
    }

    let attempts = &config.retry.max_attempts;
    if attempts.easy == 0 || attempts.medium == 0 || attempts.hard == 0 {
        return Err(invalid("max_attempts must be at least 1 for every difficulty"));
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        return Err(invalid("retry.max_delay_ms must not be below retry.base_delay_ms"));
    }

    let worker = &config.worker;
    if worker.heartbeat_interval_secs == 0 {
        return Err(invalid("worker.heartbeat_interval_secs must be positive"));
    }
    // A window of one interval expires a healthy worker between heartbeats.
    if worker.liveness_multiplier < 2 {
        return Err(invalid("worker.liveness_multiplier must be at least 2"));
    }
    if worker.attempt_timeout_secs == 0 {
        return Err(invalid("worker.attempt_timeout_secs must be positive"));
    }

    if config.progress.eta_window == 0 {
        return Err(invalid("progress.eta_window must be positive"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_minimal_config() {
        let config = load_config_from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.queue.max_release_count, 3);
        assert_eq!(config.queue.tiers.starter.directory_limit, 50);
        assert_eq!(config.queue.tiers.enterprise.priority, 400);
        assert_eq!(config.retry.max_attempts.hard, 4);
        assert_eq!(config.worker.rate_limit_delay_ms, 2000);
        assert_eq!(
            config.worker.liveness_window(),
            std::time::Duration::from_secs(30)
        );
        assert_eq!(config.progress.eta_window, 50);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = load_config_from_str(
            r#"{
                "version": "1.0",
                "database_path": "/tmp/q.db",
                "queue": {"tiers": {"growth": {"directory_limit": 120, "priority": 250}}},
                "worker": {"heartbeat_interval_secs": 5}
            }"#,
        )
        .unwrap();
        assert_eq!(config.queue.tiers.growth.directory_limit, 120);
        assert_eq!(config.queue.tiers.starter.directory_limit, 50);
        assert_eq!(config.worker.heartbeat_interval_secs, 5);
        assert_eq!(config.worker.liveness_multiplier, 3);
        assert_eq!(
            config.resolved_database_path().unwrap(),
            std::path::PathBuf::from("/tmp/q.db")
        );
    }

    #[test]
    fn test_invalid_version() {
        let err = load_config_from_str(r#"{"version": "2.0"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_priorities_must_follow_tier_order() {
        let err = load_config_from_str(
            r#"{"version": "1.0", "queue": {"tiers": {"growth": {"directory_limit": 100, "priority": 50}}}}"#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation { message } => assert!(message.contains("growth")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = load_config_from_str(
            r#"{"version": "1.0", "queue": {"tiers": {"starter": {"directory_limit": 0, "priority": 100}}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = load_config_from_str(
            r#"{"version": "1.0", "retry": {"max_attempts": {"easy": 0}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_liveness_multiplier_below_two_rejected() {
        for multiplier in [0, 1] {
            let json = format!(
                r#"{{"version": "1.0", "worker": {{"liveness_multiplier": {}}}}}"#,
                multiplier
            );
            let err = load_config_from_str(&json).unwrap_err();
            assert!(matches!(err, ConfigError::Validation { .. }));
        }
        assert!(load_config_from_str(
            r#"{"version": "1.0", "worker": {"liveness_multiplier": 2}}"#
        )
        .is_ok());
    }

    #[test]
    fn test_malformed_json() {
        let err = load_config_from_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"version": "1.0", "progress": {"eta_window": 10}}"#)
            .unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.progress.eta_window, 10);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config("/nonexistent/dirqueue.json").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_default_config_is_valid() {
        validate_config(&Config::default()).unwrap();
    }
}
