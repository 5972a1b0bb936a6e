//! Fire-time computation for the scheduler's periodic jobs.
//!
//! Each job owns a [`Trigger`]. [`run_job`] sleeps until the next fire time,
//! runs the job to completion, then computes the following fire time. A job
//! therefore never overlaps itself, while separate jobs run independently.

use anyhow::Context;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use crate::config::ScheduleConfig;

#[derive(Debug, Clone)]
pub enum Trigger {
    /// 6-field cron expression (seconds first), evaluated in UTC
    Cron(Box<Schedule>),
    /// Fires at start-up, then every period
    FixedRate(Duration),
}

impl Trigger {
    pub fn cron(expr: &str) -> anyhow::Result<Self> {
        let schedule = Schedule::from_str(expr)
            .with_context(|| format!("Invalid cron expression '{expr}'"))?;
        Ok(Self::Cron(Box::new(schedule)))
    }

    pub fn fixed_rate(period: Duration) -> Self {
        Self::FixedRate(period)
    }

    /// First fire time for a job started at `now`.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&now).next(),
            Self::FixedRate(_) => Some(now),
        }
    }

    /// Fire time following `previous`, without regard to the wall clock.
    pub fn next_after(&self, previous: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(schedule) => schedule.after(&previous).next(),
            Self::FixedRate(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                previous.checked_add_signed(period)
            }
        }
    }

    /// Fire time following `previous` given that it is now `now`. Fire times
    /// missed while the job was running are coalesced: cron skips ahead to its
    /// next match, fixed rate fires once immediately.
    pub fn following(&self, previous: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let candidate = self.next_after(previous)?;
        if candidate >= now {
            return Some(candidate);
        }
        match self {
            Self::Cron(_) => self.next_after(now),
            Self::FixedRate(_) => Some(now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    DailySweep,
    HourlySweep,
    RetryNotifications,
    HealthCheck,
}

impl JobKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::DailySweep => "daily-sweep",
            Self::HourlySweep => "hourly-sweep",
            Self::RetryNotifications => "retry-notifications",
            Self::HealthCheck => "health-check",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub kind: JobKind,
    pub trigger: Trigger,
}

/// The scheduler's four periodic jobs.
pub fn jobs_from_config(config: &ScheduleConfig) -> anyhow::Result<Vec<JobSpec>> {
    Ok(vec![
        JobSpec {
            kind: JobKind::DailySweep,
            trigger: Trigger::cron(&config.daily_cron)?,
        },
        JobSpec {
            kind: JobKind::HourlySweep,
            trigger: Trigger::cron(&config.hourly_cron)?,
        },
        JobSpec {
            kind: JobKind::RetryNotifications,
            trigger: Trigger::fixed_rate(Duration::from_secs(config.retry_interval_secs)),
        },
        JobSpec {
            kind: JobKind::HealthCheck,
            trigger: Trigger::fixed_rate(Duration::from_secs(config.health_interval_secs)),
        },
    ])
}

/// Drives one job forever (or until its trigger runs out of fire times).
pub async fn run_job<F, Fut>(spec: JobSpec, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut next = spec.trigger.first_fire(Utc::now());
    tracing::info!(job = %spec.kind, next_fire = ?next, "Job scheduled");

    while let Some(fire_at) = next {
        let wait = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        tracing::debug!(job = %spec.kind, "Job firing");
        job().await;

        next = spec.trigger.following(fire_at, Utc::now());
    }

    tracing::warn!(job = %spec.kind, "Job trigger has no further fire times");
}
