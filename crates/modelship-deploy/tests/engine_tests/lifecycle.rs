//! Lifecycle stories
//!
//! What a running deployment looks like from the outside: its status as the
//! pods come and go, the URLs it serves on, and its termination.

use k8s_openapi::api::core::v1::{Event, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use modelship_common::types::DeploymentStatus::{
    Deploying, NonDeployed, Running, Terminated, Terminating, Unhealthy, Unknown,
};
use modelship_common::types::DeployOption;

use super::helpers::*;

fn warning(pod: &str, reason: &str) -> Event {
    Event {
        metadata: ObjectMeta {
            name: Some(format!("{}.warning", pod)),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        type_: Some("Warning".to_string()),
        reason: Some(reason.to_string()),
        involved_object: ObjectReference {
            kind: Some("Pod".to_string()),
            name: Some(pod.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Deploy revision 1 and wait for the queued resync to report Running
async fn running(h: &Harness) {
    let r1 = h.add_revision(1, &[stable(10, 1), canary(11, 1, 25)]);
    h.cluster.set_pods(vec![pod("iris-a", "Running", true)]);
    h.engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap();
    h.wait_for_status(Running).await;
}

// =============================================================================
// Status observation
// =============================================================================

/// Story: pods are still starting; the deployment is Deploying.
#[tokio::test]
async fn story_starting_pods_report_deploying() {
    let h = Harness::new();
    h.cluster
        .set_pods(vec![pod("iris-a", "Running", true), pod("iris-b", "Pending", false)]);

    let status = h.engine.sync_status(DEPLOYMENT_ID).await.unwrap();

    assert_eq!(status, Deploying);
    assert_eq!(h.status(), Deploying);
    let stamped = h.store.deployment(DEPLOYMENT_ID);
    assert!(stamped.status_syncing_at.is_some());
    assert!(stamped.status_updated_at.is_some());
}

/// Story: one replica crash loops next to a healthy one; a warning event is
/// enough to call the deployment Unhealthy.
#[tokio::test]
async fn story_warning_event_marks_deployment_unhealthy() {
    let h = Harness::new();
    h.cluster
        .set_pods(vec![pod("iris-a", "Running", true), pod("iris-b", "Running", true)]);
    h.cluster.set_events(vec![warning("iris-b", "BackOff")]);

    let status = h.engine.sync_status(DEPLOYMENT_ID).await.unwrap();

    assert_eq!(status, Unhealthy);
    assert_eq!(h.status(), Unhealthy);
}

/// Story: warnings about objects that are not our pods are ignored.
#[tokio::test]
async fn story_unrelated_warnings_are_ignored() {
    let h = Harness::new();
    h.cluster.set_pods(vec![pod("iris-a", "Running", true)]);
    h.cluster.set_events(vec![warning("other-app-0", "BackOff")]);

    assert_eq!(h.engine.sync_status(DEPLOYMENT_ID).await.unwrap(), Running);
}

/// Story: the cluster cannot be read; the status becomes Unknown rather than
/// keeping a value nobody can vouch for.
#[tokio::test]
async fn story_unreadable_cluster_reports_unknown() {
    let h = Harness::new();
    h.cluster.fail_on("list Pod models");

    let err = h.engine.sync_status(DEPLOYMENT_ID).await.unwrap_err();

    assert!(err.to_string().contains("list Pod models"));
    assert_eq!(h.status(), Unknown);
}

/// Story: nothing was ever deployed and no pods exist.
#[tokio::test]
async fn story_no_pods_is_non_deployed() {
    let h = Harness::new();
    assert_eq!(h.engine.sync_status(DEPLOYMENT_ID).await.unwrap(), NonDeployed);
}

// =============================================================================
// URLs
// =============================================================================

/// Story: stable and canary targets share one public host, listed once.
#[tokio::test]
async fn story_urls_come_from_active_ingresses() {
    let h = Harness::new();
    running(&h).await;

    let urls = h.engine.urls(DEPLOYMENT_ID).await.unwrap();

    assert_eq!(urls, vec!["http://iris-models.10.0.0.5.sslip.io"]);
    let stable_lookup = h.journal.position("get Ingress modelship-iris-stb");
    let canary_lookup = h.journal.position("get Ingress modelship-iris-cnr-11");
    assert!(stable_lookup.is_some());
    assert!(canary_lookup.is_some());
}

/// Story: a deployment with no Active revision serves nothing.
#[tokio::test]
async fn story_no_active_revision_has_no_urls() {
    let h = Harness::new();
    assert!(h.engine.urls(DEPLOYMENT_ID).await.unwrap().is_empty());
}

// =============================================================================
// Termination
// =============================================================================

/// Story: a running deployment is terminated.
///
/// The status is Terminating as soon as the call returns, deleting the
/// anchors takes every generated object with them, and the queued resync
/// settles on Terminated once no pods remain.
#[tokio::test]
async fn story_terminate_retires_every_revision() {
    let h = Harness::new();
    running(&h).await;
    assert!(h.cluster.workload(NAMESPACE, STABLE).is_some());

    h.cluster.hold_pods();
    h.engine.terminate(DEPLOYMENT_ID).await.unwrap();

    assert_eq!(h.status(), Terminating);
    assert!(h.store.active_revisions(DEPLOYMENT_ID).is_empty());
    assert!(h.cluster.anchor_names().is_empty());
    assert!(h.cluster.workload(NAMESPACE, STABLE).is_none());
    assert!(h.cluster.ingress(NAMESPACE, "modelship-iris-cnr-11").is_none());
    assert!(h.cluster.has_namespace(NAMESPACE));

    h.cluster.set_pods(vec![]);
    h.cluster.release_pods();
    h.wait_for_status(Terminated).await;
}

/// Story: a rollout fails after some of its objects were created, then the
/// deployment is terminated.
///
/// The failed revision never became Active, but its anchor is found by
/// label and removed along with everything it owned.
#[tokio::test]
async fn story_terminate_retires_failed_rollout_leftovers() {
    let h = Harness::new();
    running(&h).await;

    let r2 = h.add_revision(2, &[stable(20, 2), canary(21, 2, 50)]);
    h.cluster.fail_on("replace Service modelship-iris-stb");
    h.engine
        .deploy(DEPLOYMENT_ID, &r2, vec![], DeployOption::default())
        .await
        .unwrap_err();
    assert_eq!(h.store.active_revisions(DEPLOYMENT_ID), vec![1]);
    assert!(h.cluster.workload(NAMESPACE, "modelship-iris-cnr-21").is_some());
    assert!(h
        .cluster
        .anchor_names()
        .contains(&"modelship-iris-rev-2".to_string()));

    h.cluster.set_pods(vec![]);
    h.engine.terminate(DEPLOYMENT_ID).await.unwrap();

    assert!(h.cluster.anchor_names().is_empty());
    assert!(h.cluster.workload(NAMESPACE, STABLE).is_none());
    assert!(h.cluster.workload(NAMESPACE, "modelship-iris-cnr-21").is_none());
    assert!(h.cluster.ingress(NAMESPACE, "modelship-iris-cnr-21").is_none());
    h.wait_for_status(Terminated).await;
}

/// Story: terminating twice is harmless.
#[tokio::test]
async fn story_terminate_twice_is_harmless() {
    let h = Harness::new();
    running(&h).await;
    h.cluster.set_pods(vec![]);

    h.engine.terminate(DEPLOYMENT_ID).await.unwrap();
    h.wait_for_status(Terminated).await;
    h.journal.clear();

    h.engine.terminate(DEPLOYMENT_ID).await.unwrap();
    assert!(h.journal.cluster_mutations().is_empty());
}
