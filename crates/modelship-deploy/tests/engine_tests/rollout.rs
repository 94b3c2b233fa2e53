//! Rollout stories
//!
//! A platform user ships revisions of the `iris` model. These tests follow
//! what the engine does to storage and to the cluster on each rollout, and
//! what it puts back when a rollout fails.

use modelship_common::naming::LABEL_DEPLOY_TOKEN;
use modelship_common::types::DeploymentStatus::Deploying;
use modelship_common::types::DeploymentStatus::Running;
use modelship_common::types::{DeployOption, RevisionStatus};
use modelship_common::Error;

use super::helpers::*;

// =============================================================================
// First deploy
// =============================================================================

/// Story: a brand-new deployment is rolled out for the first time.
///
/// Every object is created exactly once, no autoscaler appears without an
/// autoscaling config, and the status moves from Deploying to Running once
/// the background observer sees ready pods.
#[tokio::test]
async fn story_first_deploy_creates_everything_once_then_runs() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1)]);
    h.cluster.hold_pods();

    let report = h
        .engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap();

    assert_eq!(h.status(), Deploying);
    assert_eq!(report.revision_id, 1);
    assert!(report.superseded.is_empty());
    assert_eq!(h.store.active_revisions(DEPLOYMENT_ID), vec![1]);

    for call in [
        "create Namespace models",
        "create ConfigMap modelship-iris-rev-1",
        "create Deployment modelship-iris-stb",
        "create Service modelship-iris-stb",
        "create Ingress modelship-iris-stb",
    ] {
        assert_eq!(h.journal.count(call), 1, "{}", call);
    }
    assert_eq!(h.cluster.autoscaler_count(), 0);
    assert!(h
        .journal
        .first_with_prefix("create HorizontalPodAutoscaler")
        .is_none());

    // Every generated object is owned by the revision anchor
    let workload = h.cluster.workload(NAMESPACE, STABLE).unwrap();
    let owners = workload.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].name, "modelship-iris-rev-1");

    h.cluster
        .set_pods(vec![pod("iris-a", "Running", true), pod("iris-b", "Running", true)]);
    h.cluster.release_pods();
    h.wait_for_status(Running).await;
}

/// Story: the same revision is deployed twice; the second pass is a no-op on
/// the cluster.
#[tokio::test]
async fn story_redeploy_is_idempotent() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[autoscaled(10, 1)]);
    h.engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap();
    assert_eq!(h.cluster.autoscaler_count(), 1);
    h.journal.clear();

    let report = h
        .engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap();

    assert!(!report.changed());
    assert!(
        h.journal.cluster_mutations().is_empty(),
        "unexpected mutations: {:?}",
        h.journal.cluster_mutations()
    );
    assert_eq!(h.store.active_revisions(DEPLOYMENT_ID), vec![1]);
}

// =============================================================================
// Revision hand-over
// =============================================================================

/// Story: R2 replaces an Active R1.
///
/// R1 goes Inactive before any of R2's objects are applied, and R1's anchor
/// is removed only after R2 succeeded. Objects that carry over by name are
/// re-owned by R2 and survive the removal.
#[tokio::test]
async fn story_new_revision_supersedes_the_active_one() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1), canary(11, 1, 20)]);
    h.engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap();
    h.journal.clear();

    let r2 = h.add_revision(2, &[stable(20, 2)]);
    let report = h
        .engine
        .deploy(DEPLOYMENT_ID, &r2, vec![], DeployOption::default())
        .await
        .unwrap();
    assert_eq!(report.superseded, vec![1]);

    let r1_inactive = h.journal.position("store revision 1 inactive").unwrap();
    let first_apply = h.journal.position("replace Deployment modelship-iris-stb").unwrap();
    let last_apply = h.journal.position("replace Ingress modelship-iris-stb").unwrap();
    let deploying = h.journal.position("store deployment 1 deploying").unwrap();
    let r1_anchor_deleted = h
        .journal
        .position("delete ConfigMap modelship-iris-rev-1")
        .unwrap();
    assert!(r1_inactive < first_apply);
    assert!(last_apply < r1_anchor_deleted);
    assert!(deploying < r1_anchor_deleted);

    assert_eq!(h.store.active_revisions(DEPLOYMENT_ID), vec![2]);
    assert_eq!(h.cluster.anchor_names(), vec!["modelship-iris-rev-2"]);

    // Stable objects were re-owned; R1's canary went with its anchor
    assert!(h.cluster.workload(NAMESPACE, STABLE).is_some());
    assert!(h.cluster.service(NAMESPACE, STABLE).is_some());
    assert!(h
        .cluster
        .workload(NAMESPACE, "modelship-iris-cnr-11")
        .is_none());
}

/// Story: R2 fails half way through; storage goes back to R1.
#[tokio::test]
async fn story_failed_revision_restores_the_previous_one() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1)]);
    h.engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap();
    h.journal.clear();

    let r2 = h.add_revision(2, &[stable(20, 2)]);
    h.cluster.fail_on("replace Service modelship-iris-stb");
    let err = h
        .engine
        .deploy(DEPLOYMENT_ID, &r2, vec![], DeployOption::default())
        .await
        .unwrap_err();

    match &err {
        Error::Reconcile { kind, name, .. } => {
            assert_eq!(kind, "Service");
            assert_eq!(name, STABLE);
        }
        other => panic!("expected reconcile error, got {}", other),
    }
    assert_eq!(h.store.revision_status(1), Some(RevisionStatus::Active));
    assert_eq!(h.store.revision_status(2), None);
    assert_eq!(h.store.active_revisions(DEPLOYMENT_ID), vec![1]);
    assert!(h.journal.position("store delete revision 2").is_some());
    assert!(h
        .journal
        .position("delete ConfigMap modelship-iris-rev-1")
        .is_none());
    assert!(h.journal.position("store deployment 1 deploying").is_none());
}

/// Story: R2 fails, then R3 succeeds; nothing R2 left behind survives.
#[tokio::test]
async fn story_successful_rollout_retires_failed_leftovers() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1)]);
    h.engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap();

    let r2 = h.add_revision(2, &[stable(20, 2), canary(21, 2, 40)]);
    h.cluster.fail_on("replace Service modelship-iris-stb");
    h.engine
        .deploy(DEPLOYMENT_ID, &r2, vec![], DeployOption::default())
        .await
        .unwrap_err();
    assert!(h.cluster.workload(NAMESPACE, "modelship-iris-cnr-21").is_some());

    let r3 = h.add_revision(3, &[stable(30, 3)]);
    h.cluster.clear_failures();
    let report = h
        .engine
        .deploy(DEPLOYMENT_ID, &r3, vec![], DeployOption::default())
        .await
        .unwrap();

    assert_eq!(report.superseded, vec![1]);
    assert_eq!(h.cluster.anchor_names(), vec!["modelship-iris-rev-3"]);
    assert!(h.cluster.workload(NAMESPACE, "modelship-iris-cnr-21").is_none());
    assert!(h.cluster.workload(NAMESPACE, STABLE).is_some());
}

/// Story: the rollout is applied but recording Deploying fails; the rollout
/// still stands and the caller is not told it failed.
#[tokio::test]
async fn story_status_write_failure_after_rollout_is_not_fatal() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1)]);
    h.engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap();

    let r2 = h.add_revision(2, &[stable(20, 2)]);
    h.store.fail_on("store deployment 1 deploying");
    let report = h
        .engine
        .deploy(DEPLOYMENT_ID, &r2, vec![], DeployOption::default())
        .await
        .unwrap();

    assert_eq!(report.revision_id, 2);
    assert_eq!(h.store.active_revisions(DEPLOYMENT_ID), vec![2]);
    assert_eq!(h.store.revision_status(1), Some(RevisionStatus::Inactive));
    assert_eq!(h.cluster.anchor_names(), vec!["modelship-iris-rev-2"]);
}

/// Story: both targets fail; the caller sees every failure, not the first.
#[tokio::test]
async fn story_every_target_failure_is_reported() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1), canary(11, 1, 30)]);
    h.cluster.fail_on("create Deployment modelship-iris-stb");
    h.cluster.fail_on("create Deployment modelship-iris-cnr-11");

    let err = h
        .engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap_err();

    match &err {
        Error::Aggregate(errors) => assert_eq!(errors.len(), 2),
        other => panic!("expected aggregate error, got {}", other),
    }
    let message = err.to_string();
    assert!(message.contains("modelship-iris-stb"));
    assert!(message.contains("modelship-iris-cnr-11"));
    assert!(message.contains("; "));
    assert_eq!(h.store.revision_status(1), None);
}

// =============================================================================
// Forced rollouts and stale tokens
// =============================================================================

/// Story: a forced redeploy rotates the token, and objects stamped with the
/// old token are rewritten rather than treated as up to date.
#[tokio::test]
async fn story_forced_redeploy_rewrites_stale_objects() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1)]);
    h.engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap();
    let before = h.cluster.service(NAMESPACE, STABLE).unwrap();
    assert_eq!(before.metadata.labels.unwrap()[LABEL_DEPLOY_TOKEN], INITIAL_TOKEN);
    h.journal.clear();

    let report = h
        .engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::forced())
        .await
        .unwrap();

    assert_ne!(report.deploy_token, INITIAL_TOKEN);
    assert_eq!(h.token(), report.deploy_token);
    for call in [
        "replace Deployment modelship-iris-stb",
        "replace Service modelship-iris-stb",
        "replace Ingress modelship-iris-stb",
    ] {
        assert_eq!(h.journal.count(call), 1, "{}", call);
    }
    let after = h.cluster.service(NAMESPACE, STABLE).unwrap();
    assert_eq!(
        after.metadata.labels.unwrap()[LABEL_DEPLOY_TOKEN],
        report.deploy_token
    );
}

/// Story: a forced rollout fails; the rotated token is put back.
#[tokio::test]
async fn story_failed_forced_rollout_restores_token() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1)]);
    h.engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap();

    h.cluster.fail_on("replace Ingress modelship-iris-stb");
    h.engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::forced())
        .await
        .unwrap_err();

    assert_eq!(h.token(), INITIAL_TOKEN);
    assert_eq!(h.journal.count("store rotate token 1"), 2);
    // The redeployed revision was already Active and stays so
    assert_eq!(h.store.active_revisions(DEPLOYMENT_ID), vec![1]);
    assert!(h.journal.position("store delete revision 1").is_none());
}

/// Story: another writer rotates the token while a forced rollout is
/// preparing; the rollout backs off with a conflict.
#[tokio::test]
async fn story_forced_rollout_loses_token_race() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1)]);
    let store = h.store.clone();
    h.cluster
        .on_call("create ConfigMap modelship-iris-rev-1", move || {
            store.set_token(DEPLOYMENT_ID, "tok-other")
        });

    let err = h
        .engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::forced())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Conflict { .. }), "{}", err);
    assert_eq!(h.token(), "tok-other");
    assert!(h
        .journal
        .first_with_prefix("create Deployment")
        .is_none());
}

/// Story: the token moves on while objects are being applied; the rollout
/// detects it is stale and does not report success.
#[tokio::test]
async fn story_token_change_mid_rollout_is_stale() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1)]);
    let store = h.store.clone();
    h.cluster.on_call("create Ingress modelship-iris-stb", move || {
        store.set_token(DEPLOYMENT_ID, "tok-newer")
    });

    let err = h
        .engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap_err();

    match err {
        Error::StaleRollout { expected, .. } => assert_eq!(expected, INITIAL_TOKEN),
        other => panic!("expected stale rollout, got {}", other),
    }
    assert_eq!(h.store.revision_status(1), None);
    assert!(h.journal.position("store deployment 1 deploying").is_none());
}

// =============================================================================
// Validation
// =============================================================================

/// Story: a deployment whose name cannot become an object name is rejected
/// before the cluster is touched.
#[tokio::test]
async fn story_invalid_names_never_reach_the_cluster() {
    let h = Harness::new();
    h.store
        .state()
        .deployments
        .insert(DEPLOYMENT_ID, deployment("Iris_Classifier"));
    let r1 = h.add_revision(1, &[stable(10, 1)]);

    let err = h
        .engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation { .. }), "{}", err);
    assert!(h.journal.entries().is_empty());
    assert_eq!(h.store.revision_status(1), Some(RevisionStatus::Inactive));
}

/// Story: two stable targets in one revision would fight over one name.
#[tokio::test]
async fn story_duplicate_stable_targets_are_rejected() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[stable(10, 1), stable(11, 1)]);

    let err = h
        .engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation { .. }), "{}", err);
    assert!(h.journal.cluster_calls().is_empty());
}

/// Story: a revision with no targets has nothing to roll out.
#[tokio::test]
async fn story_revision_without_targets_is_rejected() {
    let h = Harness::new();
    let r1 = h.add_revision(1, &[]);

    let err = h
        .engine
        .deploy(DEPLOYMENT_ID, &r1, vec![], DeployOption::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation { .. }), "{}", err);
    assert!(h.journal.entries().is_empty());
}
