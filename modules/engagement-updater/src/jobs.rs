//! Background bulk recomputation.
//!
//! Triggers enqueue a job on a bounded queue served by a single worker. When
//! the queue is full the trigger folds into the job already waiting, which
//! will pick up the same engagements anyway. Each dispatch is tallied into the
//! job summary as it completes, so a running job reports live counts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use updater_common::{DispatchError, UpstreamError};
use uuid::Uuid;

use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::lifecycle::shutdown_requested;
use crate::runner::{BoundedRunner, RunReport, UnitResult};
use crate::source::EngagementSource;

/// Failed engagement ids kept per job.
const MAX_RECORDED_FAILURES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Interrupted,
}

/// Progress and outcome of one bulk job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: u64,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Dispatches cut off by shutdown after the grace period.
    pub abandoned: usize,
    pub failed_engagements: Vec<Uuid>,
    pub enumeration_error: Option<String>,
}

impl JobSummary {
    fn queued(id: u64) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            applied: 0,
            unchanged: 0,
            failed: 0,
            abandoned: 0,
            failed_engagements: Vec::new(),
            enumeration_error: None,
        }
    }

    fn record_failure(&mut self, engagement: Option<Uuid>) {
        self.failed += 1;
        if let Some(engagement) = engagement {
            if self.failed_engagements.len() < MAX_RECORDED_FAILURES {
                self.failed_engagements.push(engagement);
            }
        }
    }
}

/// What a trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Queued(u64),
    /// A job was already waiting; this trigger is covered by it.
    Coalesced,
}

struct JobHistory {
    jobs: VecDeque<JobSummary>,
    capacity: usize,
}

impl JobHistory {
    fn push(&mut self, summary: JobSummary) {
        self.jobs.push_back(summary);
        while self.jobs.len() > self.capacity {
            // Never evict a job that has not finished yet.
            match self.jobs.iter().position(|job| {
                matches!(job.status, JobStatus::Finished | JobStatus::Interrupted)
            }) {
                Some(index) => {
                    self.jobs.remove(index);
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, id: u64) {
        self.jobs.retain(|job| job.id != id);
    }

    fn update(&mut self, id: u64, f: impl FnOnce(&mut JobSummary)) {
        if let Some(job) = self.jobs.iter_mut().find(|job| job.id == id) {
            f(job);
        }
    }
}

/// Handle for triggering bulk jobs and inspecting recent ones.
#[derive(Clone)]
pub struct BulkJobs {
    sender: mpsc::Sender<u64>,
    next_id: Arc<AtomicU64>,
    history: Arc<Mutex<JobHistory>>,
}

impl BulkJobs {
    /// Start the worker. Once shutdown is signalled it starts no new
    /// dispatches, gives running ones `grace` to finish and then stops.
    pub fn start(
        source: EngagementSource,
        dispatcher: Dispatcher,
        runner: BoundedRunner,
        queue_capacity: usize,
        history: usize,
        grace: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<u64>(queue_capacity.max(1));
        let jobs = Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
            history: Arc::new(Mutex::new(JobHistory {
                jobs: VecDeque::new(),
                capacity: history.max(1),
            })),
        };

        let worker = {
            let jobs = jobs.clone();
            tokio::spawn(async move {
                loop {
                    let id = tokio::select! {
                        _ = shutdown_requested(&mut shutdown) => break,
                        next = receiver.recv() => match next {
                            Some(id) => id,
                            None => break,
                        },
                    };

                    let report = jobs
                        .run(id, &source, &dispatcher, runner, grace, shutdown.clone())
                        .await;
                    if report.stopped {
                        break;
                    }
                }
                info!("Bulk job worker stopped");
            })
        };

        (jobs, worker)
    }

    /// Ask for a full recomputation. Never waits for the job.
    pub fn trigger(&self) -> Trigger {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut history = self.history();
        history.push(JobSummary::queued(id));

        match self.sender.try_send(id) {
            Ok(()) => {
                info!(job = id, "Bulk job queued");
                Trigger::Queued(id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                history.remove(id);
                info!("Bulk job already pending, trigger coalesced");
                Trigger::Coalesced
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                history.remove(id);
                warn!("Bulk job worker is gone, trigger dropped");
                Trigger::Coalesced
            }
        }
    }

    /// Most recent jobs, oldest first.
    pub fn recent(&self) -> Vec<JobSummary> {
        self.history().jobs.iter().cloned().collect()
    }

    fn history(&self) -> MutexGuard<'_, JobHistory> {
        // A poisoned lock only means a panic elsewhere mid-update; the
        // bookkeeping is still usable.
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run(
        &self,
        id: u64,
        source: &EngagementSource,
        dispatcher: &Dispatcher,
        runner: BoundedRunner,
        grace: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunReport {
        info!(job = id, concurrency = runner.limit(), "Bulk job started");
        self.history().update(id, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
        });

        let units = source.enumerate_all().map(|item| {
            let dispatcher = dispatcher.clone();
            async move {
                match item {
                    Ok(reference) => {
                        let outcome = dispatcher.dispatch(&reference).await;
                        BulkItem::Dispatched(reference.engagement(), outcome)
                    }
                    Err(e) => BulkItem::EnumerationFailed(e),
                }
            }
        });
        let report = runner
            .run_until(
                units,
                async move { shutdown_requested(&mut shutdown).await },
                grace,
                |_, result| self.history().update(id, |job| tally(job, result)),
            )
            .await;

        self.history().update(id, |job| {
            job.finished_at = Some(Utc::now());
            if report.stopped {
                job.status = JobStatus::Interrupted;
                job.abandoned = report.abandoned;
                warn!(
                    job = id,
                    applied = job.applied,
                    unchanged = job.unchanged,
                    failed = job.failed,
                    abandoned = job.abandoned,
                    "Shutdown interrupted bulk job"
                );
            } else {
                job.status = JobStatus::Finished;
                info!(
                    job = id,
                    applied = job.applied,
                    unchanged = job.unchanged,
                    failed = job.failed,
                    "Bulk job finished"
                );
            }
        });
        report
    }
}

enum BulkItem {
    Dispatched(Uuid, Result<DispatchOutcome, DispatchError>),
    EnumerationFailed(UpstreamError),
}

fn tally(job: &mut JobSummary, result: UnitResult<BulkItem>) {
    match result {
        Ok(BulkItem::Dispatched(_, Ok(DispatchOutcome::Applied))) => job.applied += 1,
        Ok(BulkItem::Dispatched(_, Ok(DispatchOutcome::Unchanged))) => job.unchanged += 1,
        Ok(BulkItem::Dispatched(engagement, Err(e))) => {
            warn!(job = job.id, engagement = %engagement, error = %e, "Bulk dispatch failed");
            job.record_failure(Some(engagement));
        }
        Ok(BulkItem::EnumerationFailed(e)) => {
            error!(job = job.id, error = %e, "Listing engagements failed, job cut short");
            job.enumeration_error = Some(e.to_string());
        }
        Err(e) => {
            error!(job = job.id, error = %e, "Bulk dispatch crashed");
            job.record_failure(None);
        }
    }
}
