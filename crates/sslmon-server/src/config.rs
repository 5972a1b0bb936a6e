use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use sslmon_common::types::{
    CreateDomainRequest, ExpiryThresholds, MAX_CHECK_INTERVAL_MINUTES, MIN_CHECK_INTERVAL_MINUTES,
};
use std::time::Duration;

use crate::cert::coordinator::DeadlinePolicy;
use crate::cert::pool::SaturationPolicy;
use crate::timer::Trigger;

/// Immutable configuration of the engine, loaded once and handed to each
/// component at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub thresholds: ExpiryThresholds,
    #[serde(default)]
    pub inspector: InspectorConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Seed entries for the in-memory registry
    #[serde(default)]
    pub domains: Vec<SeedDomain>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectorConfig {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bounds the TLS handshake
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Verify the presented chain against the bundled webpki roots and report
    /// untrusted certificates as `UNTRUSTED`.
    #[serde(default)]
    pub flag_untrusted: bool,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            flag_untrusted: false,
        }
    }
}

impl InspectorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Long-lived workers draining the queue
    #[serde(default = "default_pool_core_size")]
    pub core_size: usize,
    /// Upper bound on concurrently running jobs, overflow tasks included
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,
    #[serde(default = "default_pool_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub saturation_policy: SaturationPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_size: default_pool_core_size(),
            max_size: default_pool_max_size(),
            queue_capacity: default_pool_queue_capacity(),
            saturation_policy: SaturationPolicy::default(),
        }
    }
}

fn default_pool_core_size() -> usize {
    5
}

fn default_pool_max_size() -> usize {
    20
}

fn default_pool_queue_capacity() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    #[serde(default = "default_per_task_timeout_secs")]
    pub per_task_timeout_secs: u64,
    #[serde(default = "default_overall_timeout_secs")]
    pub overall_timeout_secs: u64,
    #[serde(default)]
    pub deadline_policy: DeadlinePolicy,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            per_task_timeout_secs: default_per_task_timeout_secs(),
            overall_timeout_secs: default_overall_timeout_secs(),
            deadline_policy: DeadlinePolicy::default(),
        }
    }
}

impl BulkConfig {
    pub fn per_task_timeout(&self) -> Duration {
        Duration::from_secs(self.per_task_timeout_secs)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }
}

fn default_per_task_timeout_secs() -> u64 {
    60
}

fn default_overall_timeout_secs() -> u64 {
    30 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_enabled")]
    pub enabled: bool,
    /// 6-field cron (with seconds), evaluated in UTC
    #[serde(default = "default_daily_cron")]
    pub daily_cron: String,
    #[serde(default = "default_hourly_cron")]
    pub hourly_cron: String,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    #[serde(default = "default_overdue_after_hours")]
    pub overdue_after_hours: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: default_schedule_enabled(),
            daily_cron: default_daily_cron(),
            hourly_cron: default_hourly_cron(),
            retry_interval_secs: default_retry_interval_secs(),
            health_interval_secs: default_health_interval_secs(),
            overdue_after_hours: default_overdue_after_hours(),
        }
    }
}

fn default_schedule_enabled() -> bool {
    true
}

fn default_daily_cron() -> String {
    "0 0 6 * * *".to_string()
}

fn default_hourly_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_retry_interval_secs() -> u64 {
    15 * 60
}

fn default_health_interval_secs() -> u64 {
    30 * 60
}

fn default_overdue_after_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedDomain {
    pub name: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub check_interval_minutes: Option<u32>,
}

impl From<&SeedDomain> for CreateDomainRequest {
    fn from(seed: &SeedDomain) -> Self {
        CreateDomainRequest {
            name: seed.name.clone(),
            port: seed.port,
            active: seed.active,
            check_interval_minutes: seed.check_interval_minutes,
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path}"))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {path}"))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let t = &self.thresholds;
        if t.critical_days < 0 || t.critical_days > t.warning_days || t.warning_days > t.info_days {
            bail!(
                "thresholds must satisfy 0 <= critical ({}) <= warning ({}) <= info ({})",
                t.critical_days,
                t.warning_days,
                t.info_days
            );
        }

        if self.inspector.connect_timeout_ms == 0 || self.inspector.read_timeout_ms == 0 {
            bail!("inspector timeouts must be greater than zero");
        }

        let pool = &self.pool;
        if pool.core_size == 0 || pool.core_size > pool.max_size {
            bail!(
                "pool sizes must satisfy 1 <= core_size ({}) <= max_size ({})",
                pool.core_size,
                pool.max_size
            );
        }
        if pool.queue_capacity == 0 {
            bail!("pool.queue_capacity must be at least 1");
        }

        if self.bulk.per_task_timeout_secs == 0 || self.bulk.overall_timeout_secs == 0 {
            bail!("bulk timeouts must be greater than zero");
        }

        let schedule = &self.schedule;
        Trigger::cron(&schedule.daily_cron).context("schedule.daily_cron")?;
        Trigger::cron(&schedule.hourly_cron).context("schedule.hourly_cron")?;
        if schedule.retry_interval_secs == 0 || schedule.health_interval_secs == 0 {
            bail!("schedule intervals must be greater than zero");
        }
        if schedule.overdue_after_hours < 0 {
            bail!("schedule.overdue_after_hours must not be negative");
        }

        for seed in &self.domains {
            if seed.name.trim().is_empty() {
                bail!("domains: name must not be empty");
            }
            if let Some(minutes) = seed.check_interval_minutes {
                if !(MIN_CHECK_INTERVAL_MINUTES..=MAX_CHECK_INTERVAL_MINUTES).contains(&minutes) {
                    bail!(
                        "domains: {} check_interval_minutes {minutes} outside {MIN_CHECK_INTERVAL_MINUTES}..={MAX_CHECK_INTERVAL_MINUTES}",
                        seed.name
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = MonitorConfig::from_toml("").unwrap();
        assert_eq!(config.thresholds.critical_days, 7);
        assert_eq!(config.thresholds.warning_days, 30);
        assert_eq!(config.thresholds.info_days, 90);
        assert_eq!(config.inspector.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.inspector.read_timeout(), Duration::from_secs(10));
        assert!(!config.inspector.flag_untrusted);
        assert_eq!(config.pool.core_size, 5);
        assert_eq!(config.pool.max_size, 20);
        assert_eq!(config.pool.queue_capacity, 100);
        assert_eq!(config.pool.saturation_policy, SaturationPolicy::CallerRuns);
        assert_eq!(config.bulk.overall_timeout(), Duration::from_secs(1800));
        assert_eq!(config.bulk.deadline_policy, DeadlinePolicy::Partial);
        assert_eq!(config.schedule.daily_cron, "0 0 6 * * *");
        assert_eq!(config.schedule.retry_interval_secs, 900);
        assert_eq!(config.schedule.health_interval_secs, 1800);
        assert!(config.domains.is_empty());
    }

    #[test]
    fn test_parses_full_config() {
        let config = MonitorConfig::from_toml(
            r#"
            [thresholds]
            critical_days = 14

            [pool]
            core_size = 2
            max_size = 4
            queue_capacity = 8
            saturation_policy = "block"

            [bulk]
            deadline_policy = "fail_batch"

            [[domains]]
            name = "example.com"

            [[domains]]
            name = "internal.example"
            port = 8443
            check_interval_minutes = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.thresholds.critical_days, 14);
        assert_eq!(config.thresholds.warning_days, 30);
        assert_eq!(config.pool.saturation_policy, SaturationPolicy::Block);
        assert_eq!(config.bulk.deadline_policy, DeadlinePolicy::FailBatch);
        assert_eq!(config.domains.len(), 2);
        let req = CreateDomainRequest::from(&config.domains[1]);
        assert_eq!(req.port, Some(8443));
        assert_eq!(req.check_interval_minutes, Some(60));
    }

    #[test]
    fn test_rejects_thresholds_out_of_order() {
        let err = MonitorConfig::from_toml("[thresholds]\ncritical_days = 45\n").unwrap_err();
        assert!(err.to_string().contains("thresholds"));
    }

    #[test]
    fn test_rejects_core_larger_than_max() {
        assert!(MonitorConfig::from_toml("[pool]\ncore_size = 8\nmax_size = 4\n").is_err());
        assert!(MonitorConfig::from_toml("[pool]\nqueue_capacity = 0\n").is_err());
    }

    #[test]
    fn test_rejects_bad_cron() {
        assert!(MonitorConfig::from_toml("[schedule]\ndaily_cron = \"every day\"\n").is_err());
    }

    #[test]
    fn test_rejects_seed_interval_out_of_range() {
        let toml = "[[domains]]\nname = \"example.com\"\ncheck_interval_minutes = 20000\n";
        assert!(MonitorConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[inspector]\nconnect_timeout_ms = 2500").unwrap();
        let config = MonitorConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.inspector.connect_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_load_missing_file_fails_with_path() {
        let err = MonitorConfig::load("/nonexistent/sslmon.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sslmon.toml"));
    }
}
