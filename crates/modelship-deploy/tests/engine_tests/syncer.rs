//! Periodic syncer stories
//!
//! Deployments nobody has looked at recently get their status refreshed
//! without any caller asking.

use std::time::Duration;

use modelship_common::config::SyncerConfig;
use modelship_common::types::DeploymentStatus::{Running, Terminated};
use modelship_common::EngineConfig;
use modelship_deploy::{PeriodicSyncer, SyncReport};

use super::helpers::*;

/// Story: a never-observed deployment is picked up by the next pass.
#[tokio::test]
async fn story_stale_deployment_is_resynced() {
    let h = Harness::new();
    h.cluster.set_pods(vec![pod("iris-a", "Running", true)]);
    let syncer = PeriodicSyncer::new(h.engine.context().clone());

    let report = syncer.sync_once().await.unwrap();

    assert_eq!(
        report,
        SyncReport {
            dispatched: 1,
            succeeded: 1,
            failed: 0,
            timed_out: false,
        }
    );
    assert_eq!(h.status(), Running);

    // Freshly stamped, so the next pass leaves it alone
    let again = syncer.sync_once().await.unwrap();
    assert_eq!(again.dispatched, 0);
}

/// Story: terminated deployments are done and never resynced.
#[tokio::test]
async fn story_terminated_deployment_is_skipped() {
    let h = Harness::new();
    h.store
        .state()
        .deployments
        .get_mut(&DEPLOYMENT_ID)
        .unwrap()
        .status = Terminated;
    let syncer = PeriodicSyncer::new(h.engine.context().clone());

    let report = syncer.sync_once().await.unwrap();

    assert_eq!(report, SyncReport::default());
    assert!(h.journal.cluster_calls().is_empty());
}

/// Story: observation fails; the pass still completes and counts it.
#[tokio::test]
async fn story_failed_observation_is_counted() {
    let h = Harness::new();
    h.cluster.fail_on("list Pod models");
    let syncer = PeriodicSyncer::new(h.engine.context().clone());

    let report = syncer.sync_once().await.unwrap();

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.status(), modelship_common::types::DeploymentStatus::Unknown);
}

/// Story: the engine's syncer runs in the background until shutdown.
#[tokio::test]
async fn story_background_syncer_stops_on_shutdown() {
    let h = Harness::with_config(EngineConfig {
        syncer: SyncerConfig {
            deployment_status_interval_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    });
    h.cluster.set_pods(vec![pod("iris-a", "Running", true)]);

    let handle = h.engine.spawn_syncer();
    h.wait_for_status(Running).await;
    h.engine.shutdown();

    let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
    assert!(matches!(stopped, Ok(Ok(()))));
}
