//! Background jobs: an in-process queue, worker tasks and a scheduler.
//!
//! Jobs travel over an unbounded tokio channel. A failed job is put back on
//! the queue after a delay that doubles per attempt (1s, 2s, 4s, ...) until
//! `JOB_MAX_ATTEMPTS`, then it is logged and dropped. Nothing is persisted;
//! the scheduler re-creates the periodic work after a restart.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::{
    error::AppError,
    mailer::Email,
    models::program::Period,
    services::{employee_sync_service, program_service, transaction_service},
    state::AppState,
    validation::Validate,
};

/// Work that runs outside the request path.
///
/// Admins can trigger every job except `SendEmail` through `POST /v1/job/enqueue`:
///
/// ```json
/// { "job": "sync_employer", "employer_id": "550e8400-e29b-41d4-a716-446655440000" }
/// { "job": "distribute_programs", "period": "2025-03" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    #[serde(skip_deserializing)]
    SendEmail(Email),
    SyncEmployer {
        employer_id: Uuid,
    },
    SyncAllEmployers,
    DistributePrograms {
        /// Defaults to the month the job runs in
        #[serde(default)]
        period: Option<Period>,
    },
    SyncPendingTransactions,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::SendEmail(_) => "send_email",
            Job::SyncEmployer { .. } => "sync_employer",
            Job::SyncAllEmployers => "sync_all_employers",
            Job::DistributePrograms { .. } => "distribute_programs",
            Job::SyncPendingTransactions => "sync_pending_transactions",
        }
    }

    /// Whether a failure is worth another attempt. Client mistakes are not.
    fn is_retryable(err: &AppError) -> bool {
        matches!(
            err,
            AppError::Database(_) | AppError::Upstream(_) | AppError::Internal(_)
        )
    }

    pub async fn run(&self, state: &AppState) -> Result<(), AppError> {
        match self {
            Job::SendEmail(email) => state.mailer.send(email).await,
            Job::SyncEmployer { employer_id } => {
                employee_sync_service::run_sync(state, *employer_id).await?;
                Ok(())
            }
            Job::SyncAllEmployers => {
                employee_sync_service::sync_all(state).await?;
                Ok(())
            }
            Job::DistributePrograms { period } => {
                let period = period.unwrap_or_else(Period::current);
                program_service::distribute(&state.pool, period).await?;
                Ok(())
            }
            Job::SyncPendingTransactions => {
                transaction_service::sync_pending(state).await?;
                Ok(())
            }
        }
    }
}

/// Payloads are fully checked by deserialization.
impl Validate for Job {
    fn validate(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// A job plus how many times it has already failed.
#[derive(Debug)]
pub struct Envelope {
    pub job: Job,
    pub attempt: u32,
}

pub type JobReceiver = mpsc::UnboundedReceiver<Envelope>;

/// Cloneable handle for putting jobs on the queue.
#[derive(Clone, Debug)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<Envelope>,
}

impl JobQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue a job. Only fails once every worker has stopped, which is logged.
    pub fn enqueue(&self, job: Job) {
        self.push(Envelope { job, attempt: 0 });
    }

    fn push(&self, envelope: Envelope) {
        let name = envelope.job.name();
        if self.sender.send(envelope).is_err() {
            tracing::error!(job = name, "job queue is closed, job dropped");
        }
    }
}

/// Delay before attempt `attempt + 1`.
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(10))
}

/// Start `count` workers sharing one receiver.
pub fn spawn_workers(
    state: AppState,
    receiver: JobReceiver,
    count: usize,
    max_attempts: u32,
) -> Vec<tokio::task::JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    (0..count.max(1))
        .map(|worker| {
            let state = state.clone();
            let receiver = Arc::clone(&receiver);
            tokio::spawn(worker_loop(worker, state, receiver, max_attempts))
        })
        .collect()
}

async fn worker_loop(
    worker: usize,
    state: AppState,
    receiver: Arc<Mutex<JobReceiver>>,
    max_attempts: u32,
) {
    loop {
        // Hold the lock only while waiting, not while running the job
        let next = receiver.lock().await.recv().await;
        let Some(envelope) = next else {
            tracing::info!(worker, "job queue closed, worker stopping");
            return;
        };
        process(&state, envelope, max_attempts).await;
    }
}

async fn process(state: &AppState, envelope: Envelope, max_attempts: u32) {
    let Envelope { job, attempt } = envelope;
    let name = job.name();

    match job.run(state).await {
        Ok(()) => tracing::debug!(job = name, attempt, "job finished"),
        Err(err) if Job::is_retryable(&err) && attempt + 1 < max_attempts => {
            let delay = backoff(attempt);
            tracing::warn!(
                job = name,
                attempt,
                retry_in_secs = delay.as_secs(),
                error = %err,
                "job failed, retrying"
            );
            let queue = state.jobs.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.push(Envelope {
                    job,
                    attempt: attempt + 1,
                });
            });
        }
        Err(err) => {
            tracing::error!(job = name, attempt, error = %err, "job failed, giving up");
        }
    }
}

/// Jobs the scheduler queues on each tick.
pub fn scheduled_jobs(period: Period) -> Vec<Job> {
    vec![
        Job::DistributePrograms {
            period: Some(period),
        },
        Job::SyncAllEmployers,
        Job::SyncPendingTransactions,
    ]
}

/// Queue the periodic jobs every `every`, starting one interval from now.
pub fn spawn_scheduler(queue: JobQueue, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + every;
        let mut ticker = tokio::time::interval_at(start, every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let period = Period::current();
            tracing::info!(%period, "scheduler tick");
            for job in scheduled_jobs(period) {
                queue.enqueue(job);
            }
        }
    })
}
