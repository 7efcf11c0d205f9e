//! Job Scheduler Module
//!
//! Admission-priority scheduler with a global concurrency cap, FIFO sequence
//! groups, throttle groups, timeouts and retry with backoff.
//!
//! All bookkeeping lives behind one synchronous mutex that is never held
//! across an `.await`, so a scheduling pass is never interleaved with another
//! scheduling decision. Job bodies run as Tokio tasks and only suspend on
//! their own I/O.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{watch, Notify};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::groups::{SequenceGroups, ThrottleGroups};
use super::handle::{JobOutcome, JobValue};
use super::{JobHandle, JobId, JobOptions, JobStats, JobStatus, Priority, RetryPolicy, Throttle};
use crate::config::SchedulerConfig;
use crate::error::{ErrorKind, JobError};

type ErasedWork = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, JobOutcome> + Send + Sync>;

// == Job Record ==
/// Scheduler-owned state of a single job.
struct JobRecord {
    priority: Priority,
    status: JobStatus,
    attempts: u32,
    /// Enqueue order; also identifies this generation of a reused id
    seq: u64,
    sequence_group: Option<String>,
    throttle: Option<Throttle>,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    cancel: CancellationToken,
    cancel_requested: bool,
    work: ErasedWork,
    outcome: watch::Sender<Option<JobOutcome>>,
    abort: Option<AbortHandle>,
}

#[derive(Default)]
struct SchedulerState {
    jobs: HashMap<JobId, JobRecord>,
    /// QUEUED jobs keyed by (priority, enqueue order)
    ready: BTreeMap<(Priority, u64), JobId>,
    sequences: SequenceGroups,
    throttles: ThrottleGroups,
    running: usize,
    next_seq: u64,
    total_enqueued: u64,
    /// A deferred scheduling pass is already spawned
    pump_scheduled: bool,
    shutting_down: bool,
}

impl SchedulerState {
    fn pending(&self) -> usize {
        self.jobs
            .values()
            .filter(|job| !job.status.is_terminal())
            .count()
    }

    /// Releases the running slot held by `id`.
    fn release_slot(&mut self, id: &str) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.abort = None;
            self.running = self.running.saturating_sub(1);
            if let Some(throttle) = &job.throttle {
                self.throttles.release(&throttle.key);
            }
        }
    }

    /// Moves a job to a terminal state and publishes its outcome.
    ///
    /// Returns the job's generation so the caller can schedule its eviction.
    fn settle(&mut self, id: &str, status: JobStatus, outcome: JobOutcome) -> Option<u64> {
        let job = self.jobs.get_mut(id)?;
        self.ready.remove(&(job.priority, job.seq));
        job.status = status;
        job.outcome.send_replace(Some(outcome));
        if let Some(group) = &job.sequence_group {
            self.sequences.leave(group, id);
        }
        if let Some(throttle) = &job.throttle {
            self.throttles.leave(&throttle.key);
        }
        Some(job.seq)
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    settled: Notify,
}

// == Job Scheduler ==
/// Cloneable handle to a shared scheduler instance.
///
/// Every method that may start work must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    // == Constructor ==
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                state: Mutex::new(SchedulerState::default()),
                settled: Notify::new(),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        // A panic never leaves the bookkeeping half-updated, so poisoning is ignored.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // == Enqueue ==
    /// Registers a job and returns a handle to its eventual result.
    ///
    /// `work` is invoked once per attempt with that attempt's cancellation
    /// token. Re-enqueuing an id that is still live returns a handle to the
    /// existing job instead of creating a duplicate.
    ///
    /// # Errors
    /// `JobError::ShuttingDown` once `shutdown` has begun.
    pub fn enqueue<T, F, Fut>(&self, options: JobOptions, work: F) -> Result<JobHandle<T>, JobError>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        let work: ErasedWork = Arc::new(move |token| {
            let attempt = work(token);
            async move { attempt.await.map(|value| Arc::new(value) as JobValue) }.boxed()
        });

        let (handle, wake) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;

            if state.shutting_down {
                return Err(JobError::ShuttingDown);
            }

            let id = options
                .job_id
                .unwrap_or_else(|| Uuid::new_v4().to_string());

            if let Some(existing) = state.jobs.get(&id) {
                if !existing.status.is_terminal() {
                    debug!(job_id = %id, "Job already scheduled, sharing its handle");
                    return Ok(JobHandle::new(id, existing.outcome.subscribe()));
                }
                state.jobs.remove(&id);
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.total_enqueued += 1;

            if let Some(group) = &options.sequence_group {
                state.sequences.join(group, &id);
            }
            if let Some(throttle) = &options.throttle {
                state.throttles.join(&throttle.key);
            }

            let (outcome, receiver) = watch::channel(None);
            state.ready.insert((options.priority, seq), id.clone());
            state.jobs.insert(
                id.clone(),
                JobRecord {
                    priority: options.priority,
                    status: JobStatus::Queued,
                    attempts: 0,
                    seq,
                    sequence_group: options.sequence_group,
                    throttle: options.throttle,
                    timeout: options.timeout,
                    retry: options.retry,
                    cancel: CancellationToken::new(),
                    cancel_requested: false,
                    work,
                    outcome,
                    abort: None,
                },
            );

            debug!(job_id = %id, priority = ?options.priority, "Job queued");
            let wake = !std::mem::replace(&mut state.pump_scheduled, true);
            (JobHandle::new(id, receiver), wake)
        };

        if wake {
            self.schedule_pump();
        }
        Ok(handle)
    }

    /// Defers admission to a spawned pass so that every job enqueued in the
    /// same synchronous step is ranked together.
    fn schedule_pump(&self) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.pump();
        });
    }

    // == Scheduling Pass ==
    /// Admits queued jobs in (priority, enqueue order) while slots allow.
    fn pump(&self) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.pump_scheduled = false;
        let cap = self.inner.config.max_concurrent.max(1);

        let candidates: Vec<((Priority, u64), JobId)> = state
            .ready
            .iter()
            .map(|(slot, id)| (*slot, id.clone()))
            .collect();

        for (slot, id) in candidates {
            if state.running >= cap {
                break;
            }

            let Some(job) = state.jobs.get_mut(&id) else {
                state.ready.remove(&slot);
                continue;
            };

            if let Some(group) = &job.sequence_group {
                if !state.sequences.is_head(group, &id) {
                    continue;
                }
            }
            if let Some(throttle) = &job.throttle {
                if !state.throttles.can_run(&throttle.key, throttle.limit) {
                    continue;
                }
                state.throttles.acquire(&throttle.key);
            }

            state.ready.remove(&slot);
            state.running += 1;

            job.status = JobStatus::Running;
            job.attempts += 1;
            job.cancel = CancellationToken::new();

            debug!(job_id = %id, priority = ?job.priority, attempt = job.attempts, "Job admitted");
            job.abort = Some(self.spawn_attempt(
                id,
                job.attempts,
                job.work.clone(),
                job.cancel.clone(),
                job.timeout,
            ));
        }
    }

    fn spawn_attempt(
        &self,
        id: JobId,
        attempt: u32,
        work: ErasedWork,
        token: CancellationToken,
        timeout: Option<Duration>,
    ) -> AbortHandle {
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            let attempt_token = token.clone();
            let body = AssertUnwindSafe(async move { work(attempt_token).await }).catch_unwind();
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, body).await {
                    Ok(result) => result,
                    Err(_) => {
                        token.cancel();
                        Ok(Err(JobError::TimedOut(limit)))
                    }
                },
                None => body.await,
            };

            let outcome = result.unwrap_or_else(|_| {
                Err(JobError::fatal(ErrorKind::Other, "job body panicked"))
            });
            scheduler.finish_attempt(&id, attempt, outcome);
        });

        task.abort_handle()
    }

    // == Attempt Completion ==
    fn finish_attempt(&self, id: &str, attempt: u32, outcome: JobOutcome) {
        let evict = {
            let mut guard = self.lock_state();
            let state = &mut *guard;

            match state.jobs.get(id) {
                Some(job) if job.status == JobStatus::Running && job.attempts == attempt => {}
                // Settled elsewhere, e.g. by a forced shutdown.
                _ => return,
            }
            state.release_slot(id);

            let Some(job) = state.jobs.get_mut(id) else {
                return;
            };

            if job.cancel_requested {
                info!(job_id = %id, "Job cancelled while running");
                state.settle(id, JobStatus::Cancelled, Err(JobError::Cancelled(id.to_string())))
            } else {
                match outcome {
                    Ok(value) => {
                        debug!(job_id = %id, attempt, "Job completed");
                        state.settle(id, JobStatus::Completed, Ok(value))
                    }
                    Err(err) => {
                        let retry_delay = match job.retry.as_ref() {
                            Some(policy) if err.is_retryable() && policy.should_retry(job.attempts) => {
                                Some(policy.next_delay(job.attempts))
                            }
                            _ => None,
                        };

                        match retry_delay {
                            Some(delay) => {
                                job.status = JobStatus::RetryPending;
                                warn!(
                                    job_id = %id,
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    error = %err,
                                    "Job attempt failed, retrying"
                                );
                                self.schedule_retry(id.to_string(), attempt, delay);
                                None
                            }
                            None => {
                                warn!(job_id = %id, attempt, error = %err, "Job failed");
                                state.settle(id, JobStatus::Failed, Err(err))
                            }
                        }
                    }
                }
            }
        };

        if let Some(seq) = evict {
            self.after_settle(id.to_string(), seq);
        }
        self.pump();
    }

    fn schedule_retry(&self, id: JobId, attempt: u32, delay: Duration) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.requeue(&id, attempt);
        });
    }

    fn requeue(&self, id: &str, attempt: u32) {
        {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let Some(job) = state.jobs.get_mut(id) else {
                return;
            };
            if job.status != JobStatus::RetryPending || job.attempts != attempt {
                return;
            }
            job.status = JobStatus::Queued;
            state.ready.insert((job.priority, job.seq), id.to_string());
        }
        self.pump();
    }

    /// Wakes idle waiters and forgets the job once its retention elapses.
    fn after_settle(&self, id: JobId, seq: u64) {
        self.inner.settled.notify_waiters();

        let scheduler = self.clone();
        let retention = self.inner.config.completed_retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let mut state = scheduler.lock_state();
            let expired = state
                .jobs
                .get(&id)
                .is_some_and(|job| job.seq == seq && job.status.is_terminal());
            if expired {
                state.jobs.remove(&id);
            }
        });
    }

    // == Cancel ==
    /// Cancels a QUEUED, RETRY_PENDING or RUNNING job.
    ///
    /// Queued jobs settle as CANCELLED immediately. Running jobs receive their
    /// cancellation signal and settle as CANCELLED when their body returns.
    /// Returns false for unknown or already terminal jobs.
    pub fn cancel(&self, id: &str) -> bool {
        let evict = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let Some(job) = state.jobs.get_mut(id) else {
                return false;
            };

            match job.status {
                JobStatus::Queued | JobStatus::RetryPending => {
                    info!(job_id = %id, "Job cancelled before running");
                    state.settle(id, JobStatus::Cancelled, Err(JobError::Cancelled(id.to_string())))
                }
                JobStatus::Running => {
                    debug!(job_id = %id, "Signalling cancellation to running job");
                    job.cancel_requested = true;
                    job.cancel.cancel();
                    return true;
                }
                _ => return false,
            }
        };

        if let Some(seq) = evict {
            self.after_settle(id.to_string(), seq);
        }
        self.pump();
        true
    }

    // == Inspection ==
    pub fn status(&self, id: &str) -> Option<JobStatus> {
        self.lock_state().jobs.get(id).map(|job| job.status)
    }

    /// Returns counts of tracked jobs by status.
    pub fn stats(&self) -> JobStats {
        let state = self.lock_state();
        let mut stats = JobStats::new();
        for job in state.jobs.values() {
            stats.record(job.status);
        }
        stats.total_enqueued = state.total_enqueued;
        stats
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock_state().shutting_down
    }

    /// Resolves once no job is QUEUED, RUNNING or RETRY_PENDING.
    pub async fn idle(&self) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let pending = self.lock_state().pending();
            if pending == 0 {
                return;
            }
            notified.await;
        }
    }

    // == Shutdown ==
    /// Stops accepting jobs and waits for outstanding ones to settle.
    ///
    /// Jobs still outstanding after `timeout` are aborted and settled as
    /// CANCELLED.
    pub async fn shutdown(&self, timeout: Duration) {
        {
            let mut state = self.lock_state();
            if !state.shutting_down {
                info!(pending = state.pending(), "Scheduler shutting down");
            }
            state.shutting_down = true;
        }

        if tokio::time::timeout(timeout, self.idle()).await.is_err() {
            let cancelled = self.cancel_outstanding();
            warn!(cancelled, "Shutdown timeout elapsed, outstanding jobs cancelled");
        }

        info!("Scheduler shutdown complete");
    }

    fn cancel_outstanding(&self) -> usize {
        let settled: Vec<(JobId, u64)> = {
            let mut guard = self.lock_state();
            let state = &mut *guard;

            let outstanding: Vec<JobId> = state
                .jobs
                .iter()
                .filter(|(_, job)| !job.status.is_terminal())
                .map(|(id, _)| id.clone())
                .collect();

            outstanding
                .into_iter()
                .filter_map(|id| {
                    if let Some(job) = state.jobs.get_mut(&id) {
                        job.cancel.cancel();
                        if job.status == JobStatus::Running {
                            if let Some(abort) = job.abort.take() {
                                abort.abort();
                            }
                            state.release_slot(&id);
                        }
                    }
                    let seq = state.settle(
                        &id,
                        JobStatus::Cancelled,
                        Err(JobError::Cancelled(id.clone())),
                    )?;
                    Some((id, seq))
                })
                .collect()
        };

        let count = settled.len();
        for (id, seq) in settled {
            self.after_settle(id, seq);
        }
        count
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
