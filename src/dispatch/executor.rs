use std::sync::Arc;

#[cfg(test)] use mockall::automock;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::dispatch::send_job::SendJob;
use crate::error::TransportResult;

/// Runs send jobs asynchronously on behalf of the dispatcher.
///
/// An executor that is saturated hands the job back instead of queueing it without bound or
///  dropping it, and the dispatcher then runs the job on the caller's task (caller-runs
///  backpressure).
#[cfg_attr(test, automock)]
pub trait JobExecutor: Send + Sync + 'static {
    fn try_submit(&self, job: SendJob) -> Result<JoinHandle<TransportResult<usize>>, SendJob>;
}


/// Spawns send jobs on a tokio runtime, with an upper bound for the number of jobs in flight
pub struct BoundedExecutor {
    runtime: Handle,
    slots: Arc<Semaphore>,
}

impl BoundedExecutor {
    pub fn new(runtime: Handle, max_concurrent_jobs: usize) -> BoundedExecutor {
        BoundedExecutor {
            runtime,
            slots: Arc::new(Semaphore::new(max_concurrent_jobs)),
        }
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

impl JobExecutor for BoundedExecutor {
    fn try_submit(&self, job: SendJob) -> Result<JoinHandle<TransportResult<usize>>, SendJob> {
        match self.slots.clone().try_acquire_owned() {
            Ok(permit) => {
                trace!("spawning send job for {:?}", job.destination());
                Ok(self.runtime.spawn(async move {
                    let result = job.run().await;
                    drop(permit);
                    result
                }))
            }
            Err(_) => Err(job),
        }
    }
}
