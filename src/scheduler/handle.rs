//! Result handles returned by `JobScheduler::enqueue`.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::watch;

use super::JobId;
use crate::error::JobError;

/// Type-erased successful job result.
pub(crate) type JobValue = Arc<dyn Any + Send + Sync>;

/// Settled outcome shared by every handle observing a job.
pub(crate) type JobOutcome = Result<JobValue, JobError>;

// == Job Handle ==
/// Awaitable view of a job's eventual result.
///
/// The scheduler owns the job itself; handles only observe its outcome, and
/// dropping a handle neither cancels nor affects the job.
pub struct JobHandle<T> {
    id: JobId,
    outcome: watch::Receiver<Option<JobOutcome>>,
    _result: PhantomData<fn() -> T>,
}

impl<T> JobHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(id: JobId, outcome: watch::Receiver<Option<JobOutcome>>) -> Self {
        Self {
            id,
            outcome,
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the job to settle and returns its result.
    pub async fn wait(mut self) -> Result<T, JobError> {
        let settled = self
            .outcome
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone());

        match settled {
            Ok(Some(Ok(value))) => value
                .downcast_ref::<T>()
                .cloned()
                .ok_or(JobError::ResultType(self.id)),
            Ok(Some(Err(err))) => Err(err),
            // The scheduler dropped the job without settling it.
            Ok(None) | Err(_) => Err(JobError::Cancelled(self.id)),
        }
    }
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("settled", &self.outcome.borrow().is_some())
            .finish()
    }
}
