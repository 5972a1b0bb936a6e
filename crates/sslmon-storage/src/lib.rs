//! Collaborator interfaces of the certificate engine.
//!
//! The engine reads domains from a [`DomainRegistry`] and appends every
//! produced [`CertificateRecord`] to a [`CertificateSink`]. The bundled
//! [`memory::MemoryStore`] implements both and backs the server binary and the
//! test suites.

pub mod error;
pub mod memory;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sslmon_common::types::{AdvanceSchedule, CertificateRecord, Domain, DomainCounts, ScheduleState};

pub use error::{Result, StorageError};
pub use memory::MemoryStore;

/// Read access to monitored domains plus the single write the engine makes:
/// advancing a domain's schedule after a sweep.
///
/// Implementations must be `Send + Sync`; sweeps and manual triggers call the
/// registry concurrently.
#[async_trait]
pub trait DomainRegistry: Send + Sync {
    /// All active domains.
    async fn list_active(&self) -> Result<Vec<Domain>>;

    /// Active domains whose `next_check_at` is unset or `<= as_of`.
    async fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<Domain>>;

    async fn find(&self, id: &str) -> Result<Option<Domain>>;

    /// Domains for the given ids. Unknown ids are left out of the result.
    async fn find_many(&self, ids: &[String]) -> Result<Vec<Domain>>;

    async fn count_by_active(&self) -> Result<DomainCounts>;

    /// Applies an [`AdvanceSchedule`] command atomically and returns the
    /// stored schedule.
    ///
    /// A command whose `checked_at` is older than the stored
    /// `last_check_at` is stale and leaves the schedule untouched.
    async fn advance_schedule(&self, cmd: &AdvanceSchedule) -> Result<ScheduleState>;
}

/// Append-only destination for certificate records.
#[async_trait]
pub trait CertificateSink: Send + Sync {
    async fn append(&self, record: &CertificateRecord) -> Result<()>;
}
