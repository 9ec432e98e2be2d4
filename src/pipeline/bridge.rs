//! Hands work from a real-time thread to the tokio runtime.
//!
//! A real-time callback must never block on async work. It submits a future
//! here, which never blocks, then waits a bounded time for the result. If the
//! wait runs out before the job has started, the job is abandoned and the
//! worker skips it, so every job runs exactly once or not at all.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::RelayError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const ABANDONED: u8 = 2;

/// Why a job could not be handed to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The worker's queue is full.
    #[error("bridge queue is full")]
    Full,
    /// The bridge has been shut down.
    #[error("bridge is shut down")]
    Closed,
}

/// Why [`Submission::wait`] returned without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The job had not started and never will.
    Abandoned,
    /// The job had already started and will finish on its own.
    Detached,
}

/// A handle to one submitted job.
#[must_use = "a submission does nothing unless waited on or dropped deliberately"]
pub struct Submission<T> {
    state: Arc<AtomicU8>,
    result: crossbeam_channel::Receiver<T>,
}

impl<T> Submission<T> {
    /// Blocks the calling thread for at most `bound` waiting for the result.
    pub fn wait(self, bound: Duration) -> Result<T, WaitError> {
        match self.result.recv_timeout(bound) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                match self.state.compare_exchange(
                    PENDING,
                    ABANDONED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => Err(WaitError::Abandoned),
                    // It may have finished between the timeout and the swap.
                    Err(_) => self.result.try_recv().map_err(|_| WaitError::Detached),
                }
            }
        }
    }
}

/// A single tokio worker that runs submitted jobs in submission order.
pub struct SchedulerBridge {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerBridge {
    /// Starts the worker on the current tokio runtime.
    ///
    /// Fails if called outside a runtime.
    pub fn spawn(name: impl Into<String>, queue_depth: usize) -> Result<Self, RelayError> {
        let name = name.into();
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| RelayError::backend(format!("bridge '{name}' needs a tokio runtime: {e}")))?;

        let (tx, mut rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let worker_name = name.clone();
        let worker = handle.spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            tracing::debug!(bridge = %worker_name, "Bridge worker drained");
        });

        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues `fut` for the worker. Never blocks; callable from any thread.
    pub fn submit<F, T>(&self, fut: F) -> Result<Submission<T>, SubmitError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(PENDING));
        let (tx, rx) = crossbeam_channel::bounded(1);

        let job_state = state.clone();
        let job: Job = Box::pin(async move {
            if job_state
                .compare_exchange(PENDING, STARTED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            let _ = tx.send(fut.await);
        });

        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(SubmitError::Closed)?;
        sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Full,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })?;

        Ok(Submission { state, result: rx })
    }

    /// Stops accepting jobs, lets queued ones drain, aborts after `grace`.
    ///
    /// Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        self.sender.lock().take();
        let Some(mut worker) = self.worker.lock().take() else {
            return;
        };

        if tokio::time::timeout(grace, &mut worker).await.is_err() {
            tracing::warn!(
                bridge = %self.name,
                grace_ms = grace.as_millis() as u64,
                "Bridge did not drain in time, aborting"
            );
            worker.abort();
        }
    }

    /// Returns `true` until [`shutdown`](Self::shutdown) is called.
    pub fn is_open(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl Drop for SchedulerBridge {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
    }
}
