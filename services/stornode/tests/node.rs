// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

// Allow expect/unwrap in tests - they provide clear panic messages on failure
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Target node integration tests
//!
//! Drive a whole node through its public surface:
//! - Resilver placement, idempotence and the at-most-one rule
//! - Mountpath attach and detach
//! - User abort
//! - Rebalance distributed over the loopback syncer, and not restarted by
//!   a re-delivered RMD
//! - Startup markers

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use stornode::NodeError;
use stornode::capacity::CapacityTracker;
use stornode::fs::{Marker, marker_exists, persist_marker};
use stornode::meta::{NodeInfo, RebalanceMd, SyncRequest};
use stornode::notif::Notification;
use stornode::xact::{RetentionPolicy, XactError};
use stornode_types::{Bucket, MountpathAction, StartOptions, XactKind, XactQuery, XactState};
use tokio::sync::oneshot;

use common::TestNode;

fn wait() -> StartOptions {
    StartOptions {
        wait: true,
        ..Default::default()
    }
}

/// Every object visit sleeps, so a walk over a few objects stays running
/// long enough to be observed.
fn slow(t: &TestNode) {
    t.config_tx.send_modify(|c| {
        c.jogger_throttle_every = 1;
        c.jogger_throttle_sleep_ms = 50;
    });
}

// ============================================================================
// Resilver
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resilver_places_objects_and_is_idempotent() {
    let t = TestNode::new(3);
    let bck = Bucket::ais("res");
    let names = t.put_misplaced(&bck, 20);

    let id = t.node.start(XactKind::Resilver, None, &wait()).await.unwrap();
    let snap = t.wait(&id).await;
    assert_eq!(snap.state, XactState::Finished);
    assert_eq!(snap.objects, 20);
    for name in &names {
        assert!(t.at_hrw(&bck, name), "{name} not at its HRW mountpath");
    }
    assert!(!marker_exists(&t.node.mountpaths().get(), Marker::Resilver));

    // Nothing left to move
    let id2 = t.node.start(XactKind::Resilver, None, &wait()).await.unwrap();
    assert_ne!(id, id2);
    let snap = t.wait(&id2).await;
    assert_eq!(snap.state, XactState::Finished);
    assert_eq!(snap.objects, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn user_resilver_is_rejected_while_one_runs() {
    let t = TestNode::new(2);
    t.put_misplaced(&Bucket::ais("res"), 10);
    slow(&t);

    let first = t
        .node
        .start(XactKind::Resilver, None, &StartOptions::default())
        .await
        .unwrap();
    let err = t
        .node
        .start(XactKind::Resilver, None, &StartOptions::default())
        .await
        .unwrap_err();
    match err {
        NodeError::Xact(XactError::AlreadyRunning { kind, id }) => {
            assert_eq!(kind, XactKind::Resilver);
            assert_eq!(id, first);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(t.node.query(&XactQuery::by_kind(XactKind::Resilver)).len(), 1);

    t.node.abort(&first).unwrap();
    assert_eq!(t.wait(&first).await.state, XactState::Aborted);
}

// ============================================================================
// Mountpath changes
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn attached_mountpath_receives_its_objects() {
    let t = TestNode::new(2);
    let bck = Bucket::ais("grow");
    let names = t.put_placed(&bck, 30);

    let new_mp = t.extra_path("mp-new");
    let id = t
        .node
        .on_mountpath_change(MountpathAction::Attach, &new_mp)
        .unwrap()
        .expect("attach should start a resilver");
    let snap = t.wait(&id).await;
    assert_eq!(snap.state, XactState::Finished);

    assert_eq!(t.node.mountpaths().get().len(), 3);
    for name in &names {
        assert!(t.at_hrw(&bck, name), "{name} not at its HRW mountpath");
    }
    // With 30 objects over 3 mountpaths, some must have landed on the new one
    assert!(snap.objects > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detached_mountpath_is_drained_then_removed() {
    let t = TestNode::new(3);
    let bck = Bucket::ais("shrink");
    let names = t.put_placed(&bck, 30);
    let gone = t.mountpath(0);

    let id = t
        .node
        .on_mountpath_change(MountpathAction::Detach, gone.path())
        .unwrap()
        .expect("detach should start a resilver");
    let snap = t.wait(&id).await;
    assert_eq!(snap.state, XactState::Finished);

    let set = t.node.mountpaths().get();
    assert_eq!(set.len(), 2);
    assert!(!set.contains(gone.path()));
    assert!(set.disabled().is_empty());
    for name in &names {
        assert!(t.at_hrw(&bck, name), "{name} lost by the detach");
    }
}

#[tokio::test]
async fn detaching_the_last_mountpath_skips_resilver() {
    let t = TestNode::new(1);
    let only = t.mountpath(0);

    let started = t
        .node
        .on_mountpath_change(MountpathAction::Detach, only.path())
        .unwrap();
    assert!(started.is_none());
    let set = t.node.mountpaths().get();
    assert!(set.is_empty());
    assert!(set.disabled().is_empty());
}

// ============================================================================
// Start surface and abort
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn user_abort_stops_make_ncopies() {
    let t = TestNode::new(2);
    let bck = Bucket::ais("mirror");
    t.put_placed(&bck, 40);
    slow(&t);

    let opts = StartOptions {
        copies: Some(2),
        ..Default::default()
    };
    let id = t
        .node
        .start(XactKind::MakeNCopies, Some(&bck), &opts)
        .await
        .unwrap();

    // Same bucket: rejected while running
    let err = t
        .node
        .start(XactKind::MakeNCopies, Some(&bck), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::Xact(XactError::AlreadyRunning { .. })));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(t.node.abort(&id).unwrap());
    let snap = t.wait(&id).await;
    assert_eq!(snap.state, XactState::Aborted);
    assert_eq!(snap.err.as_deref(), Some("user request"));
    assert!(snap.end_time.is_some());

    // Already finished, and unknown IDs
    assert!(!t.node.abort(&id).unwrap());
    assert!(matches!(
        t.node.abort("no-such-xaction"),
        Err(NodeError::Xact(XactError::NotFound(_)))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bucket_kinds_need_a_bucket() {
    let t = TestNode::new(2);
    for kind in [XactKind::MakeNCopies, XactKind::LoadLomCache] {
        let err = t.node.start(kind, None, &wait()).await.unwrap_err();
        assert!(matches!(err, NodeError::BucketRequired(k) if k == kind));
    }

    let bck = Bucket::ais("m");
    let names = t.put_placed(&bck, 5);
    let opts = StartOptions {
        copies: Some(2),
        tag: Some("nightly".to_string()),
        wait: true,
    };
    let id = t
        .node
        .start(XactKind::MakeNCopies, Some(&bck), &opts)
        .await
        .unwrap();
    let snap = t.wait(&id).await;
    assert_eq!(snap.state, XactState::Finished);
    for name in &names {
        assert_eq!(t.copies(&bck, name), 2);
    }

    let id = t
        .node
        .start(XactKind::LoadLomCache, Some(&bck), &wait())
        .await
        .unwrap();
    assert_eq!(t.wait(&id).await.state, XactState::Finished);
    assert_eq!(t.node.env().lom_cache.len(), names.len());
}

#[tokio::test]
async fn election_is_shared_until_done() {
    let t = TestNode::new(1);
    let a = t
        .node
        .start(XactKind::Election, None, &StartOptions::default())
        .await
        .unwrap();
    let b = t.node.start(XactKind::Election, None, &wait()).await.unwrap();
    assert_eq!(a, b);

    let running = t.node.query(&XactQuery::default().running());
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].kind, XactKind::Election);
}

// ============================================================================
// Rebalance
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rebalance_over_loopback_sends_foreign_objects() {
    let t = TestNode::new(2);
    t.node
        .env()
        .smap
        .modify(|smap| {
            smap.add_node(NodeInfo::target("t1"));
            smap.add_node(NodeInfo::target("t2"));
            Ok(())
        })
        .await
        .unwrap();
    let bck = Bucket::ais("reb");
    let names = t.put_placed(&bck, 20);
    let smap = t.node.env().smap.get();
    let foreign: Vec<_> = names
        .iter()
        .filter(|n| smap.hrw_target(&bck.make_uname(n)) == Some("t2"))
        .cloned()
        .collect();
    assert!(!foreign.is_empty());

    let (tx, rx) = oneshot::channel();
    let req = SyncRequest {
        wait: true,
        callback: Some(Box::new(move |n: &Notification| {
            let _ = tx.send(n.clone());
        })),
        ..Default::default()
    };
    let reb_id = t.node.start_rebalance(req).await.unwrap();
    assert_eq!(reb_id, "g1");
    assert_eq!(t.node.rmd().version(), 1);
    assert_eq!(t.node.rmd().get().target_ids, vec!["t1", "t2"]);

    let n = tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .expect("rebalance did not finish")
        .unwrap();
    assert_eq!(n.uuid, "g1");
    assert!(n.is_success(), "{n:?}");

    let snap = t.wait(&reb_id).await;
    assert_eq!(snap.objects, foreign.len() as i64);
    let sent = t.sender.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), foreign.len());
    for name in &names {
        let expected = if foreign.contains(name) { 0 } else { 1 };
        assert_eq!(t.copies(&bck, name), expected, "{name}");
    }
    assert!(!marker_exists(&t.node.mountpaths().get(), Marker::Rebalance));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn installed_rmd_redelivered_after_eviction_is_ignored() {
    let t = TestNode::new(1);
    let req = SyncRequest {
        wait: true,
        ..Default::default()
    };
    let reb_id = t.node.start_rebalance(req).await.unwrap();
    assert_eq!(t.wait(&reb_id).await.state, XactState::Finished);

    t.node.registry().set_retention(RetentionPolicy {
        max_finished: 0,
        max_age: Duration::ZERO,
    });
    t.node.registry().housekeep();
    assert!(t.node.registry().get(&reb_id).is_none());

    let installed = RebalanceMd::clone(&t.node.rmd().get());
    assert!(t.node.receive_rmd(installed).await.unwrap().is_none());
    assert!(t.node.registry().get(&reb_id).is_none());
    assert!(!marker_exists(&t.node.mountpaths().get(), Marker::Rebalance));
}

// ============================================================================
// Startup and shutdown
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupted_resilver_resumes_at_startup() {
    let t = TestNode::new(2);
    let bck = Bucket::ais("resume");
    let names = t.put_misplaced(&bck, 8);
    let set = t.node.mountpaths().get();
    persist_marker(&set, Marker::Resilver).unwrap();
    persist_marker(&set, Marker::Rebalance).unwrap();

    t.node.load_metadata().await;
    let resumed = t
        .node
        .resume_interrupted()
        .unwrap()
        .expect("resilver should resume");
    assert_eq!(t.wait(&resumed).await.state, XactState::Finished);
    for name in &names {
        assert!(t.at_hrw(&bck, name));
    }
    assert!(!marker_exists(&set, Marker::Resilver));

    // Rebalance is only flagged, never restarted locally
    assert!(t.node.rmd().is_interrupted());
    assert!(t.node.query(&XactQuery::by_kind(XactKind::Rebalance)).is_empty());
    assert!(!t.node.rmd().is_starting());
    assert!(marker_exists(&set, Marker::NodeRestarted));

    t.node.shutdown().await;
    assert!(!marker_exists(&set, Marker::NodeRestarted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_aborts_running_work() {
    let t = TestNode::new(2);
    t.put_misplaced(&Bucket::ais("busy"), 10);
    slow(&t);
    let id = t
        .node
        .start(XactKind::Resilver, None, &StartOptions::default())
        .await
        .unwrap();

    t.node.shutdown().await;
    let snap = t.wait(&id).await;
    assert_eq!(snap.state, XactState::Aborted);
    assert_eq!(snap.err.as_deref(), Some("node shutdown"));
    assert!(t.node.query(&XactQuery::default().running()).is_empty());
}

#[tokio::test]
async fn reloaded_config_updates_retention() {
    let t = TestNode::new(1);
    let mut config = t.config_tx.borrow().clone();
    config.xact_retain_finished = 3;
    config.high_watermark_pct = 70;
    t.node.apply_config(&config);

    assert_eq!(t.node.registry().retention().max_finished, 3);
    t.capacity.set_used(75);
    assert!(t.node.env().capacity.check().is_err());
}
