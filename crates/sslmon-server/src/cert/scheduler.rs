use anyhow::bail;
use chrono::{DateTime, Duration, Utc};
use sslmon_common::types::{
    AdvanceSchedule, CertificateRecord, CertificateStatus, Domain, DomainCounts, ExpiryThresholds,
    ExpiryTier,
};
use sslmon_storage::{CertificateSink, DomainRegistry};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::coordinator::BulkCoordinator;
use super::CertificateProbe;
use crate::config::ScheduleConfig;
use crate::timer::{self, JobKind};

/// Outcome of a daily or hourly sweep.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub kind: JobKind,
    /// Domains picked by the sweep
    pub selected: usize,
    pub records: Vec<CertificateRecord>,
    /// Domains whose schedule was advanced
    pub rescheduled: usize,
}

impl SweepReport {
    pub fn count(&self, status: CertificateStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub counts: DomainCounts,
    /// Active domains that were already due `overdue_after_hours` ago
    pub overdue: Vec<Domain>,
}

/// Decides which domains are checked when, drives the bulk coordinator and
/// writes results back.
pub struct CheckScheduler {
    registry: Arc<dyn DomainRegistry>,
    sink: Arc<dyn CertificateSink>,
    coordinator: BulkCoordinator,
    probe: Arc<dyn CertificateProbe>,
    thresholds: ExpiryThresholds,
    config: ScheduleConfig,
}

impl CheckScheduler {
    pub fn new(
        registry: Arc<dyn DomainRegistry>,
        sink: Arc<dyn CertificateSink>,
        coordinator: BulkCoordinator,
        probe: Arc<dyn CertificateProbe>,
        thresholds: ExpiryThresholds,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            coordinator,
            probe,
            thresholds,
            config,
        }
    }

    /// Checks every active domain, due or not.
    pub async fn daily_sweep(&self) -> Option<SweepReport> {
        self.run_sweep(JobKind::DailySweep).await
    }

    /// Checks active domains whose next check time has passed.
    pub async fn hourly_sweep(&self) -> Option<SweepReport> {
        self.run_sweep(JobKind::HourlySweep).await
    }

    async fn run_sweep(&self, kind: JobKind) -> Option<SweepReport> {
        match self.sweep_at(kind, Utc::now()).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(job = %kind, error = %e, "Certificate sweep failed");
                None
            }
        }
    }

    /// One sweep with `now` as the due-ness reference. Every swept domain is
    /// rescheduled from the time the batch finished, whatever its outcome.
    pub async fn sweep_at(&self, kind: JobKind, now: DateTime<Utc>) -> anyhow::Result<SweepReport> {
        let domains = match kind {
            JobKind::DailySweep => self.registry.list_active().await?,
            JobKind::HourlySweep => self.registry.list_due(now).await?,
            other => bail!("{other} is not a certificate sweep"),
        };

        tracing::info!(job = %kind, count = domains.len(), "Certificate sweep started");
        if domains.is_empty() {
            return Ok(SweepReport {
                kind,
                selected: 0,
                records: Vec::new(),
                rescheduled: 0,
            });
        }

        let records = self.coordinator.check_all(&domains).await?;
        self.store_records(&records).await;

        let checked_at = Utc::now();
        let mut rescheduled = 0;
        for domain in &domains {
            let cmd = AdvanceSchedule::for_domain(domain, checked_at);
            match self.registry.advance_schedule(&cmd).await {
                Ok(_) => rescheduled += 1,
                Err(e) => {
                    tracing::error!(domain = %domain.name, error = %e, "Failed to advance check schedule");
                }
            }
        }

        self.log_expiry_tiers(&records);

        let report = SweepReport {
            kind,
            selected: domains.len(),
            records,
            rescheduled,
        };
        tracing::info!(
            job = %kind,
            checked = report.records.len(),
            valid = report.count(CertificateStatus::Valid),
            expiring_soon = report.count(CertificateStatus::ExpiringSoon),
            expired = report.count(CertificateStatus::Expired),
            errors = report.count(CertificateStatus::Error),
            untrusted = report.count(CertificateStatus::Untrusted),
            rescheduled,
            "Certificate sweep finished"
        );
        Ok(report)
    }

    /// Checks one domain right away. The schedule is left untouched.
    pub async fn check_domain_now(&self, domain_id: &str) -> Option<CertificateRecord> {
        let domain = match self.registry.find(domain_id).await {
            Ok(Some(domain)) => domain,
            Ok(None) => {
                tracing::warn!(domain_id, "Manual check requested for unknown domain");
                return None;
            }
            Err(e) => {
                tracing::error!(domain_id, error = %e, "Manual check failed to load domain");
                return None;
            }
        };

        let record = self.probe.inspect(&domain).await;
        self.store_records(std::slice::from_ref(&record)).await;
        Some(record)
    }

    /// Checks the listed domains right away through the worker pool. Unknown
    /// ids are skipped. The schedule is left untouched.
    pub async fn check_domains_now(&self, domain_ids: &[String]) -> Vec<CertificateRecord> {
        let domains = match self.registry.find_many(domain_ids).await {
            Ok(domains) => domains,
            Err(e) => {
                tracing::error!(error = %e, "Manual check failed to load domains");
                return Vec::new();
            }
        };
        if domains.len() < domain_ids.len() {
            tracing::warn!(
                requested = domain_ids.len(),
                found = domains.len(),
                "Manual check skipped unknown domains"
            );
        }

        match self.coordinator.check_all(&domains).await {
            Ok(records) => {
                self.store_records(&records).await;
                records
            }
            Err(e) => {
                tracing::error!(error = %e, "Manual bulk check failed");
                Vec::new()
            }
        }
    }

    /// Reports domain counts and overdue domains. Logs only.
    pub async fn health_check(&self) -> Option<HealthSnapshot> {
        match self.health_check_at(Utc::now()).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::error!(error = %e, "Health check failed");
                None
            }
        }
    }

    pub async fn health_check_at(&self, now: DateTime<Utc>) -> anyhow::Result<HealthSnapshot> {
        let counts = self.registry.count_by_active().await?;
        let overdue = self
            .registry
            .list_due(now - Duration::hours(self.config.overdue_after_hours))
            .await?;

        tracing::info!(
            active = counts.active,
            inactive = counts.inactive,
            overdue = overdue.len(),
            "Certificate monitor health"
        );
        if !overdue.is_empty() {
            let names: Vec<String> = overdue.iter().map(Domain::endpoint).collect();
            tracing::warn!(
                count = overdue.len(),
                domains = %names.join(","),
                hours = self.config.overdue_after_hours,
                "Domains overdue for a certificate check"
            );
        }

        Ok(HealthSnapshot { counts, overdue })
    }

    pub async fn retry_failed_notifications(&self) {
        tracing::debug!("Notification retry requested, no notification channel configured");
    }

    /// Spawns one loop per periodic job. Returns no handles when scheduling
    /// is disabled.
    pub fn spawn_jobs(self: Arc<Self>) -> anyhow::Result<Vec<JoinHandle<()>>> {
        if !self.config.enabled {
            tracing::info!("Scheduled certificate checks are disabled");
            return Ok(Vec::new());
        }

        let handles = timer::jobs_from_config(&self.config)?
            .into_iter()
            .map(|spec| {
                let scheduler = self.clone();
                let kind = spec.kind;
                tokio::spawn(timer::run_job(spec, move || {
                    let scheduler = scheduler.clone();
                    async move { scheduler.fire(kind).await }
                }))
            })
            .collect();
        Ok(handles)
    }

    async fn fire(&self, kind: JobKind) {
        match kind {
            JobKind::DailySweep => {
                self.daily_sweep().await;
            }
            JobKind::HourlySweep => {
                self.hourly_sweep().await;
            }
            JobKind::RetryNotifications => self.retry_failed_notifications().await,
            JobKind::HealthCheck => {
                self.health_check().await;
            }
        }
    }

    async fn store_records(&self, records: &[CertificateRecord]) {
        for record in records {
            if let Err(e) = self.sink.append(record).await {
                tracing::error!(domain = %record.domain, error = %e, "Failed to store certificate record");
            }
        }
    }

    fn log_expiry_tiers(&self, records: &[CertificateRecord]) {
        for record in records {
            let Some(days) = record.days_until_expiry else {
                continue;
            };
            match self.thresholds.tier_for(days) {
                ExpiryTier::Critical => tracing::warn!(
                    domain = %record.domain,
                    status = %record.status,
                    days_left = days,
                    "Certificate expired or expiring within critical threshold"
                ),
                ExpiryTier::Warning => tracing::warn!(
                    domain = %record.domain,
                    days_left = days,
                    "Certificate expiring within warning threshold"
                ),
                ExpiryTier::Info => tracing::info!(
                    domain = %record.domain,
                    days_left = days,
                    "Certificate expiring within info threshold"
                ),
                ExpiryTier::Healthy => {}
            }
        }
    }
}
