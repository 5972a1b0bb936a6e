use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sslmon_common::types::{
    AdvanceSchedule, CertificateRecord, CreateDomainRequest, Domain, DomainCounts, ScheduleState,
    DEFAULT_CHECK_INTERVAL_MINUTES, DEFAULT_PORT, MAX_CHECK_INTERVAL_MINUTES,
    MIN_CHECK_INTERVAL_MINUTES,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::{Result, StorageError};
use crate::{CertificateSink, DomainRegistry};

/// In-memory domain registry and record history.
///
/// Domains are keyed by snowflake id, so iteration follows registration
/// order. Records are kept in append order.
#[derive(Default)]
pub struct MemoryStore {
    domains: RwLock<BTreeMap<String, Domain>>,
    records: RwLock<Vec<CertificateRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a domain. The name is trimmed and lowercased; `(name, port)`
    /// must be unique.
    pub async fn insert_domain(&self, req: &CreateDomainRequest) -> Result<Domain> {
        let name = req.name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(StorageError::InvalidDomain("name must not be empty".into()));
        }
        let port = req.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(StorageError::InvalidDomain(format!("{name}: port must not be 0")));
        }
        let interval = req
            .check_interval_minutes
            .unwrap_or(DEFAULT_CHECK_INTERVAL_MINUTES);
        if !(MIN_CHECK_INTERVAL_MINUTES..=MAX_CHECK_INTERVAL_MINUTES).contains(&interval) {
            return Err(StorageError::InvalidDomain(format!(
                "{name}: check interval {interval} outside {MIN_CHECK_INTERVAL_MINUTES}..={MAX_CHECK_INTERVAL_MINUTES} minutes"
            )));
        }

        let mut domains = self.domains.write().await;
        if domains.values().any(|d| d.name == name && d.port == port) {
            return Err(StorageError::InvalidDomain(format!(
                "{name}:{port} is already registered"
            )));
        }

        let now = Utc::now();
        let domain = Domain {
            id: sslmon_common::id::next_id(),
            name,
            port,
            active: req.active.unwrap_or(true),
            check_interval_minutes: interval,
            last_check_at: None,
            next_check_at: None,
            created_at: now,
            updated_at: now,
        };
        domains.insert(domain.id.clone(), domain.clone());
        Ok(domain)
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<Domain> {
        let mut domains = self.domains.write().await;
        let domain = domains.get_mut(id).ok_or_else(|| StorageError::NotFound {
            entity: "domain",
            id: id.to_string(),
        })?;
        domain.active = active;
        domain.updated_at = Utc::now();
        Ok(domain.clone())
    }

    /// Records of one domain, oldest first.
    pub async fn history(&self, domain_id: &str) -> Vec<CertificateRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.domain_id == domain_id)
            .cloned()
            .collect()
    }

    pub async fn latest(&self, domain_id: &str) -> Option<CertificateRecord> {
        self.records
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.domain_id == domain_id)
            .cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl DomainRegistry for MemoryStore {
    async fn list_active(&self) -> Result<Vec<Domain>> {
        Ok(self
            .domains
            .read()
            .await
            .values()
            .filter(|d| d.active)
            .cloned()
            .collect())
    }

    async fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<Domain>> {
        let mut due: Vec<Domain> = self
            .domains
            .read()
            .await
            .values()
            .filter(|d| d.is_due(as_of))
            .cloned()
            .collect();
        // never-checked first, then most overdue
        due.sort_by_key(|d| d.next_check_at);
        Ok(due)
    }

    async fn find(&self, id: &str) -> Result<Option<Domain>> {
        Ok(self.domains.read().await.get(id).cloned())
    }

    async fn find_many(&self, ids: &[String]) -> Result<Vec<Domain>> {
        let domains = self.domains.read().await;
        Ok(ids.iter().filter_map(|id| domains.get(id).cloned()).collect())
    }

    async fn count_by_active(&self) -> Result<DomainCounts> {
        let domains = self.domains.read().await;
        let active = domains.values().filter(|d| d.active).count() as u64;
        Ok(DomainCounts {
            active,
            inactive: domains.len() as u64 - active,
        })
    }

    async fn advance_schedule(&self, cmd: &AdvanceSchedule) -> Result<ScheduleState> {
        let mut domains = self.domains.write().await;
        let domain = domains
            .get_mut(&cmd.domain_id)
            .ok_or_else(|| StorageError::NotFound {
                entity: "domain",
                id: cmd.domain_id.clone(),
            })?;

        if domain
            .last_check_at
            .is_some_and(|last| last > cmd.checked_at)
        {
            tracing::debug!(
                domain = %domain.name,
                stored = ?domain.last_check_at,
                stale = %cmd.checked_at,
                "Ignoring stale schedule update"
            );
            return Ok(domain.schedule());
        }

        let state = cmd.resulting_state();
        domain.last_check_at = state.last_check_at;
        domain.next_check_at = state.next_check_at;
        domain.updated_at = Utc::now();
        Ok(state)
    }
}

#[async_trait]
impl CertificateSink for MemoryStore {
    async fn append(&self, record: &CertificateRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}
