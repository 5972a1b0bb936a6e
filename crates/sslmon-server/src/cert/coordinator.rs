use serde::{Deserialize, Serialize};
use sslmon_common::types::{CertificateRecord, CheckErrorKind, Domain};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::{timeout, timeout_at};

use super::pool::WorkerPool;
use super::{elapsed_ms, CertificateProbe};
use crate::config::BulkConfig;
use crate::error::BatchError;

/// What a batch returns when the overall deadline passes with checks still
/// running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlinePolicy {
    /// Finished records plus a `TIMEOUT` marker for each unfinished domain
    #[default]
    Partial,
    /// The whole batch fails with [`BatchError::DeadlineExceeded`]
    FailBatch,
}

/// Fans a list of domains out over the worker pool and joins the results.
pub struct BulkCoordinator {
    probe: Arc<dyn CertificateProbe>,
    pool: Arc<WorkerPool>,
    config: BulkConfig,
}

impl BulkCoordinator {
    pub fn new(probe: Arc<dyn CertificateProbe>, pool: Arc<WorkerPool>, config: BulkConfig) -> Self {
        Self {
            probe,
            pool,
            config,
        }
    }

    /// Checks every domain with the configured timeouts. Records come back in
    /// input order, one per domain.
    pub async fn check_all(&self, domains: &[Domain]) -> Result<Vec<CertificateRecord>, BatchError> {
        self.check_all_with(
            domains,
            self.config.per_task_timeout(),
            self.config.overall_timeout(),
        )
        .await
    }

    pub async fn check_all_with(
        &self,
        domains: &[Domain],
        per_task: Duration,
        overall: Duration,
    ) -> Result<Vec<CertificateRecord>, BatchError> {
        if domains.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + overall;

        // `None` marks a domain that never made it into the pool in time
        let mut pending: Vec<Option<oneshot::Receiver<CertificateRecord>>> =
            Vec::with_capacity(domains.len());
        let mut submitting = true;
        for domain in domains {
            if !submitting {
                pending.push(None);
                continue;
            }

            let (tx, rx) = oneshot::channel();
            let probe = self.probe.clone();
            let target = domain.clone();
            let job = async move {
                let task_started = Instant::now();
                let record = match timeout(per_task, probe.inspect(&target)).await {
                    Ok(record) => record,
                    Err(_) => CertificateRecord::failure(
                        &target,
                        CheckErrorKind::Timeout,
                        format!("Check timed out after {}s", per_task.as_secs()),
                        elapsed_ms(task_started),
                    ),
                };
                // receiver is gone once the batch deadline passed
                let _ = tx.send(record);
            };

            // a saturated pool makes submit run the job inline or wait for
            // queue space, both of which count against the batch deadline
            match timeout_at(deadline, self.pool.submit(job)).await {
                Ok(Ok(_)) => pending.push(Some(rx)),
                Ok(Err(source)) => {
                    return Err(BatchError::Submit {
                        domain: domain.name.clone(),
                        source,
                    })
                }
                Err(_) => {
                    tracing::warn!(
                        domain = %domain.name,
                        overall_secs = overall.as_secs(),
                        "Batch deadline passed while submitting checks"
                    );
                    submitting = false;
                    pending.push(None);
                }
            }
        }

        let mut records = Vec::with_capacity(domains.len());
        let mut completed = 0usize;
        for (domain, rx) in domains.iter().zip(pending) {
            // `None` once the deadline has passed
            let outcome = match rx {
                Some(rx) => timeout_at(deadline, rx).await.ok(),
                None => None,
            };
            match outcome {
                Some(Ok(record)) => {
                    completed += 1;
                    records.push(record);
                }
                Some(Err(_)) => {
                    completed += 1;
                    tracing::error!(domain = %domain.name, "Certificate check task ended without a result");
                    records.push(CertificateRecord::failure(
                        domain,
                        CheckErrorKind::Unexpected,
                        "Check task ended without producing a result",
                        elapsed_ms(started),
                    ));
                }
                None => {
                    records.push(CertificateRecord::failure(
                        domain,
                        CheckErrorKind::Timeout,
                        format!("Batch deadline of {}s exceeded", overall.as_secs()),
                        elapsed_ms(started),
                    ));
                }
            }
        }

        let total = domains.len();
        let timed_out = total - completed;
        tracing::info!(
            total,
            completed,
            timed_out,
            elapsed_ms = elapsed_ms(started),
            "Bulk certificate check finished"
        );

        if timed_out > 0 && self.config.deadline_policy == DeadlinePolicy::FailBatch {
            return Err(BatchError::DeadlineExceeded {
                timeout: overall,
                completed,
                total,
            });
        }
        Ok(records)
    }
}
