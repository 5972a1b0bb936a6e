pub mod coordinator;
pub mod inspector;
pub mod pool;
pub mod scheduler;
pub mod verifier;

use async_trait::async_trait;
use sslmon_common::types::{CertificateRecord, Domain};
use std::time::Instant;

/// Produces one record per domain. Implementations must not fail: every
/// problem is reported inside the returned record.
#[async_trait]
pub trait CertificateProbe: Send + Sync {
    async fn inspect(&self, domain: &Domain) -> CertificateRecord;
}

/// Milliseconds since `started`, rounded up so an attempt that did any work
/// never reports zero.
pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_micros().div_ceil(1000))
        .unwrap_or(u64::MAX)
        .max(1)
}
