//! Bounded pool for detached background work
//!
//! Work submitted here is independent of the request that submitted it: it
//! keeps running after the caller returns and stops only when the pool's own
//! cancellation token fires.

use std::future::Future;
use std::sync::Arc;

use modelship_common::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounded background task pool with its own cancellation scope
pub struct BackgroundPool {
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl BackgroundPool {
    /// Create a pool running at most `max_concurrency` tasks at once
    pub fn new(max_concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            cancel,
        }
    }

    /// Submit a task.
    ///
    /// The task waits for a permit, then runs until it completes or the pool
    /// is cancelled. Errors are logged. The handle may be dropped; the task
    /// is not aborted when it is.
    pub fn submit<F>(&self, name: impl Into<String>, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let permits = self.permits.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let _permit = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task = %name, "background task cancelled before start");
                    return;
                }
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(task = %name, "background pool closed, dropping task");
                        return;
                    }
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task = %name, "background task cancelled");
                }
                result = task => match result {
                    Ok(()) => debug!(task = %name, "background task finished"),
                    Err(e) => warn!(task = %name, error = %e, "background task failed"),
                },
            }
        })
    }

    /// Permits not currently held by a running task
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Cancel every queued and running task
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.permits.close();
    }

    /// Whether the pool has been shut down
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
