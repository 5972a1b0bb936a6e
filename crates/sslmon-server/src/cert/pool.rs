//! Bounded pool that runs certificate checks.
//!
//! `core_size` long-lived workers drain a queue of `queue_capacity` jobs.
//! When the queue is full, up to `max_size - core_size` extra tasks are
//! spawned on demand. Past that the [`SaturationPolicy`] decides: run the job
//! on the submitting task, or wait for queue space. No submission is dropped.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::error::PoolError;

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// The submitter runs the job itself, which throttles it
    #[default]
    CallerRuns,
    /// The submitter waits until the queue has room
    Block,
}

/// Where a submitted job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    Overflow,
    /// Already completed on the caller's task when `submit` returned
    RanInline,
}

pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    overflow: Arc<Semaphore>,
    policy: SaturationPolicy,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the core workers. Must be called inside a tokio runtime.
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        if config.core_size == 0 || config.core_size > config.max_size {
            return Err(PoolError::InvalidConfig(format!(
                "core_size {} must be between 1 and max_size {}",
                config.core_size, config.max_size
            )));
        }
        if config.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "queue_capacity must be at least 1".into(),
            ));
        }

        let (sender, receiver) = mpsc::channel::<Job>(config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.core_size)
            .map(|worker| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        match next {
                            Some(job) => run_contained(job).await,
                            None => break,
                        }
                    }
                    tracing::debug!(worker, "Pool worker stopped");
                })
            })
            .collect();

        tracing::debug!(
            core_size = config.core_size,
            max_size = config.max_size,
            queue_capacity = config.queue_capacity,
            policy = ?config.saturation_policy,
            "Worker pool started"
        );

        Ok(Self {
            sender,
            overflow: Arc::new(Semaphore::new(config.max_size - config.core_size)),
            policy: config.saturation_policy,
            workers,
        })
    }

    pub async fn submit<F>(&self, job: F) -> Result<Submission, PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Box::pin(job);
        let job = match self.sender.try_send(job) {
            Ok(()) => return Ok(Submission::Queued),
            Err(TrySendError::Closed(_)) => return Err(PoolError::Closed),
            Err(TrySendError::Full(job)) => job,
        };

        if let Ok(permit) = self.overflow.clone().try_acquire_owned() {
            tokio::spawn(async move {
                run_contained(job).await;
                drop(permit);
            });
            return Ok(Submission::Overflow);
        }

        match self.policy {
            SaturationPolicy::CallerRuns => {
                tracing::debug!("Worker pool saturated, running job on caller");
                run_contained(job).await;
                Ok(Submission::RanInline)
            }
            SaturationPolicy::Block => {
                tracing::debug!("Worker pool saturated, waiting for queue space");
                self.sender
                    .send(job)
                    .await
                    .map_err(|_| PoolError::Closed)?;
                Ok(Submission::Queued)
            }
        }
    }

    /// Stops accepting work and waits for queued jobs to finish.
    pub async fn shutdown(self) {
        let Self {
            sender, workers, ..
        } = self;
        drop(sender);
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Pool worker panicked");
            }
        }
    }
}

/// Runs a job on its own task so a panic stays inside it.
async fn run_contained(job: Job) {
    if let Err(e) = tokio::spawn(job).await {
        tracing::error!(error = %e, "Pool job panicked");
    }
}
