//! Periodic status syncer
//!
//! On every tick the syncer asks the store for deployments whose status has
//! not been observed recently and resyncs them concurrently, bounded by a
//! semaphore. A tick waits for its batch only up to the configured timeout;
//! slower observations keep running detached and stamp their result when
//! they finish.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use modelship_common::{Error, Result};
use tokio::sync::Semaphore;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::DeployContext;
use crate::status::StatusObserver;

/// Outcome of one sync pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Deployments a sync task was started for
    pub dispatched: usize,
    /// Tasks that finished and persisted a status
    pub succeeded: usize,
    /// Tasks that finished with an error
    pub failed: usize,
    /// Whether the wait timeout elapsed before every task finished
    pub timed_out: bool,
}

/// Resyncs stale deployment statuses on an interval
pub struct PeriodicSyncer {
    ctx: Arc<DeployContext>,
    observer: StatusObserver,
}

impl PeriodicSyncer {
    /// Create a syncer over the shared context
    pub fn new(ctx: Arc<DeployContext>) -> Self {
        let observer = StatusObserver::new(ctx.clone());
        Self { ctx, observer }
    }

    /// Tick until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let period = self.ctx.config.syncer.deployment_status_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = period.as_secs(), "status syncer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("status syncer stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.sync_once().await {
                        Ok(report) if report.dispatched > 0 => {
                            debug!(?report, "status sync pass finished");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "status sync pass failed"),
                    }
                }
            }
        }
    }

    /// Run one sync pass over every stale deployment
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let config = &self.ctx.config.syncer;
        let stale_after = chrono::Duration::from_std(config.stale_after())
            .map_err(|e| Error::config(format!("stale_after_secs out of range: {}", e)))?;

        let stale = self
            .ctx
            .store
            .list_stale_deployments(Utc::now() - stale_after)
            .await?;
        if stale.is_empty() {
            return Ok(SyncReport::default());
        }

        let permits = Arc::new(Semaphore::new(config.max_concurrency));
        let handles: Vec<_> = stale
            .into_iter()
            .map(|deployment| {
                let permits = permits.clone();
                let observer = self.observer.clone();
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.map_err(|_| {
                        Error::internal_with_context("syncer", "sync permits closed")
                    })?;
                    observer.sync_status(deployment.id).await
                })
            })
            .collect();

        let mut report = SyncReport {
            dispatched: handles.len(),
            ..Default::default()
        };
        // Dropping the handles on timeout detaches the tasks; it never aborts them.
        match timeout(config.wait_timeout(), join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(Ok(_)) => report.succeeded += 1,
                        Ok(Err(e)) => {
                            debug!(error = %e, "deployment status sync failed");
                            report.failed += 1;
                        }
                        Err(e) => {
                            warn!(error = %e, "status sync task panicked");
                            report.failed += 1;
                        }
                    }
                }
            }
            Err(_) => {
                warn!(
                    dispatched = report.dispatched,
                    timeout_secs = config.wait_timeout_secs,
                    "status sync pass exceeded wait timeout, leaving tasks running"
                );
                report.timed_out = true;
            }
        }
        Ok(report)
    }
}
