//! Archive maintenance configuration.
//!
//! Configures the scheduled purge of outdated archives and the
//! optimization of archive tables that follows it.
//!
//! # Example
//!
//! ```toml
//! [maintenance]
//! enabled = true
//! tick_secs = 300
//! table_prefix = ""
//! purge_concurrency = 1
//!
//! [maintenance.purge]
//! dry_run = false
//! today_archive_ttl_secs = 10
//! browser_triggered_archiving = true
//! ```

use serde::{Deserialize, Serialize};

/// Archive maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct MaintenanceConfig {
    /// Whether the scheduler worker runs the maintenance jobs.
    /// Default: false (must be explicitly enabled)
    #[serde(default)]
    pub enabled: bool,

    /// How often the scheduler wakes up to look for due jobs (in seconds).
    /// Default: 300
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Prefix in front of `archive_numeric_YYYY_MM` / `archive_blob_YYYY_MM`.
    /// Default: empty
    #[serde(default)]
    pub table_prefix: String,

    /// Maximum number of periods purged at the same time.
    /// Default: 1 (sequential)
    #[serde(default = "default_purge_concurrency")]
    pub purge_concurrency: usize,

    /// Purge predicate settings.
    #[serde(default)]
    pub purge: PurgeConfig,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tick_secs: default_tick_secs(),
            table_prefix: String::new(),
            purge_concurrency: default_purge_concurrency(),
            purge: PurgeConfig::default(),
        }
    }
}

fn default_tick_secs() -> u64 {
    300
}

fn default_purge_concurrency() -> usize {
    1
}

/// Settings deciding which archives count as outdated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct PurgeConfig {
    /// Log the retention boundaries without deleting anything.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Seconds after which an archive of today is considered outdated.
    /// Default: 10
    #[serde(default = "default_today_archive_ttl_secs")]
    pub today_archive_ttl_secs: u64,

    /// Whether reports are also archived on demand by browser requests.
    /// When true, temporary archives older than twice the TTL are purged;
    /// otherwise all temporary archives from before today are.
    /// Default: true
    #[serde(default = "default_true")]
    pub browser_triggered_archiving: bool,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            today_archive_ttl_secs: default_today_archive_ttl_secs(),
            browser_triggered_archiving: true,
        }
    }
}

fn default_today_archive_ttl_secs() -> u64 {
    10
}

/// Upper bound for `today_archive_ttl_secs`: one day.
pub const MAX_TODAY_ARCHIVE_TTL_SECS: u64 = 86_400;

fn default_true() -> bool {
    true
}

impl MaintenanceConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.tick_secs == 0 {
            return Err("maintenance.tick_secs must be greater than 0".into());
        }
        if self.purge_concurrency == 0 {
            return Err("maintenance.purge_concurrency must be at least 1".into());
        }
        if !self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(format!(
                "maintenance.table_prefix '{}' may only contain ASCII letters, digits and '_'",
                self.table_prefix
            ));
        }
        if self.purge.today_archive_ttl_secs > MAX_TODAY_ARCHIVE_TTL_SECS {
            return Err(format!(
                "maintenance.purge.today_archive_ttl_secs must be at most {MAX_TODAY_ARCHIVE_TTL_SECS}"
            ));
        }
        Ok(())
    }

    /// Scheduler wake-up interval as a Duration.
    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_secs)
    }
}

impl PurgeConfig {
    /// Time-to-live of today's archives as a chrono Duration.
    ///
    /// `None` when the configured value does not fit a `TimeDelta`.
    pub fn today_archive_ttl(&self) -> Option<chrono::TimeDelta> {
        i64::try_from(self.today_archive_ttl_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MaintenanceConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.tick_secs, 300);
        assert_eq!(config.table_prefix, "");
        assert_eq!(config.purge_concurrency, 1);
        assert!(!config.purge.dry_run);
        assert_eq!(config.purge.today_archive_ttl_secs, 10);
        assert!(config.purge.browser_triggered_archiving);
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: MaintenanceConfig = toml::from_str("enabled = true").unwrap();
        assert!(config.enabled);
        assert_eq!(config.tick_secs, 300);
    }

    #[test]
    fn test_parse_full_config() {
        let config: MaintenanceConfig = toml::from_str(
            r#"
            enabled = true
            tick_secs = 60
            table_prefix = "matomo_"
            purge_concurrency = 3

            [purge]
            dry_run = true
            today_archive_ttl_secs = 900
            browser_triggered_archiving = false
        "#,
        )
        .unwrap();

        assert_eq!(config.tick_secs, 60);
        assert_eq!(config.table_prefix, "matomo_");
        assert_eq!(config.purge_concurrency, 3);
        assert!(config.purge.dry_run);
        assert_eq!(
            config.purge.today_archive_ttl(),
            Some(chrono::TimeDelta::seconds(900))
        );
        assert!(!config.purge.browser_triggered_archiving);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = MaintenanceConfig {
            purge_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ttl_above_one_day_rejected() {
        let mut config = MaintenanceConfig::default();
        config.purge.today_archive_ttl_secs = MAX_TODAY_ARCHIVE_TTL_SECS;
        assert!(config.validate().is_ok());

        config.purge.today_archive_ttl_secs = 1_000_000_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.contains("today_archive_ttl_secs"), "{err}");
    }

    #[test]
    fn test_ttl_out_of_range_is_none() {
        let purge = PurgeConfig {
            today_archive_ttl_secs: u64::MAX,
            ..Default::default()
        };
        assert_eq!(purge.today_archive_ttl(), None);
    }

    #[test]
    fn test_bad_prefix_rejected() {
        let config = MaintenanceConfig {
            table_prefix: "bad-prefix; DROP".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_duration() {
        let config = MaintenanceConfig {
            tick_secs: 30,
            ..Default::default()
        };
        assert_eq!(config.tick(), std::time::Duration::from_secs(30));
    }
}
