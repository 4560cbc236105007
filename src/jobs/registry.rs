//! Job registry with best-effort cancellation.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, StageError};
use crate::output::QueryOutput;

/// Pause after every cancel request, to keep rapid repeated cancels from
/// hammering the query service.
pub const CANCEL_THROTTLE: Duration = Duration::from_millis(100);

struct JobEntry {
    /// Identifies the submission that owns this entry.
    ticket: u64,
    cancel: CancellationToken,
}

/// Maps external job ids to in-flight runs.
///
/// Cancellation is local only: it stops the caller from waiting and keeps the
/// run from issuing further statements, but a statement already sent to the
/// query service runs to completion and its result is dropped.
pub struct JobRegistry {
    jobs: Arc<DashMap<String, JobEntry>>,
    next_ticket: AtomicU64,
    throttle: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_cancel_throttle(CANCEL_THROTTLE)
    }

    /// Creates a registry with a custom pause after cancel requests.
    pub fn with_cancel_throttle(throttle: Duration) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            next_ticket: AtomicU64::new(1),
            throttle,
        }
    }

    /// Spawns `run` as the job `job_id` and returns its handle.
    ///
    /// A job submitted under an id that is still in flight replaces the
    /// registry entry; the older run keeps going but can no longer be
    /// cancelled by id, and finishing it leaves the newer entry in place.
    pub fn submit<F, Fut>(&self, job_id: impl Into<String>, run: F) -> JobHandle
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<QueryOutput>> + Send + 'static,
    {
        let job_id = job_id.into();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        if self
            .jobs
            .insert(
                job_id.clone(),
                JobEntry {
                    ticket,
                    cancel: cancel.clone(),
                },
            )
            .is_some()
        {
            debug!("Job {} resubmitted while still in flight", job_id);
        }

        let (tx, rx) = oneshot::channel();
        let jobs = Arc::clone(&self.jobs);
        let token = cancel.clone();
        let id = job_id.clone();

        tokio::spawn(async move {
            let outcome = if token.is_cancelled() {
                Err(StageError::cancelled(id.clone()))
            } else {
                run(token.clone()).await
            };

            jobs.remove_if(&id, |_, entry| entry.ticket == ticket);

            if token.is_cancelled() {
                debug!("Discarding result of cancelled job {}", id);
            } else {
                // The caller may have stopped waiting
                let _ = tx.send(outcome);
            }
        });

        JobHandle {
            job_id,
            cancel,
            result: rx,
        }
    }

    /// Cancels the job if it is registered. Unknown or finished ids are a
    /// no-op. Always pauses for the throttle interval.
    ///
    /// Returns whether a registered job was cancelled.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let cancelled = match self.jobs.remove(job_id) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                info!("Cancelled job {}", job_id);
                true
            }
            None => {
                debug!("Cancel for unknown job {}", job_id);
                false
            }
        };

        tokio::time::sleep(self.throttle).await;
        cancelled
    }

    /// Number of registered jobs.
    pub fn in_flight(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if `job_id` is registered.
    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }
}

/// Completion handle of a submitted job.
pub struct JobHandle {
    job_id: String,
    cancel: CancellationToken,
    result: oneshot::Receiver<Result<QueryOutput>>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Returns true once the job has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Waits for the job's output, or a `Cancelled` error once it is cancelled.
    pub async fn wait(self) -> Result<QueryOutput> {
        let Self {
            job_id,
            cancel,
            result,
        } = self;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StageError::cancelled(job_id)),
            outcome = result => match outcome {
                Ok(outcome) => outcome,
                Err(_) if cancel.is_cancelled() => Err(StageError::cancelled(job_id)),
                Err(_) => Err(StageError::internal(format!(
                    "job {job_id} ended without a result"
                ))),
            },
        }
    }
}
