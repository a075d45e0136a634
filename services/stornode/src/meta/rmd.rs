// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Rebalance metadata (RMD) and its owner.
//!
//! Every RMD version is a cluster-wide rebalance directive; the rebalance it
//! starts is identified by `g{version}`. Changing the RMD is a two-phase
//! protocol: [`RmdOwner::modify`] publishes the new version locally, then the
//! caller invokes [`RmdOwner::sync`] to register for the outcome and hand the
//! new version to the distribution service.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stornode_types::{ActionMessage, NodeId, XactKind};
use tracing::{error, info, warn};

use super::{MetaError, MetaSyncer, MetadataOwner, Revs, RevsPair, Versioned};
use crate::notif::{Listener, ListenerOwner, NotifCallback, Notification, Notifs};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebalanceMd {
    pub version: i64,
    /// Targets joining or leaving; only meaningful for this version
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_ids: Vec<NodeId>,
    /// Non-empty when targets should also resilver; only meaningful for this version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resilver: String,
}

impl Versioned for RebalanceMd {
    const TAG: &'static str = "rmd";
    const FILE_NAME: &'static str = ".ais.rmd";

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn reset_transient(&mut self) {
        self.target_ids.clear();
        self.resilver.clear();
    }
}

impl fmt::Display for RebalanceMd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.target_ids.is_empty(), self.resilver.is_empty()) {
            (true, true) => write!(f, "RMD v{}", self.version),
            (_, true) => write!(f, "RMD v{}({:?})", self.version, self.target_ids),
            _ => write!(
                f,
                "RMD v{}({:?}, {})",
                self.version, self.target_ids, self.resilver
            ),
        }
    }
}

/// Cluster-wide rebalance ID for an RMD version
pub fn reb_id(version: i64) -> String {
    format!("g{version}")
}

pub fn parse_reb_id(id: &str) -> Option<i64> {
    id.strip_prefix('g')?.parse().ok()
}

/// Result of [`RmdOwner::modify`], input to [`RmdOwner::sync`].
#[derive(Debug, Clone)]
pub struct RmdModified {
    pub prev: Arc<RebalanceMd>,
    pub cur: Arc<RebalanceMd>,
    pub reb_id: String,
}

/// How to distribute a modified RMD.
pub struct SyncRequest {
    /// Block until the distribution service reports completion
    pub wait: bool,
    pub timeout: Option<Duration>,
    pub owner: ListenerOwner,
    /// Runs when the rebalance terminates; defaults to logging the outcome
    pub callback: Option<NotifCallback>,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            wait: false,
            timeout: None,
            owner: ListenerOwner::Ic,
            callback: None,
        }
    }
}

pub struct RmdOwner {
    owner: MetadataOwner<RebalanceMd>,
    /// A joining target reported an interrupted rebalance
    interrupted: AtomicBool,
    /// The node is still starting up
    starting: AtomicBool,
    /// Highest RMD version whose rebalance was started on this node
    started: AtomicI64,
}

impl RmdOwner {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            owner: MetadataOwner::new(config_dir),
            interrupted: AtomicBool::new(false),
            starting: AtomicBool::new(false),
            started: AtomicI64::new(0),
        }
    }

    pub fn get(&self) -> Arc<RebalanceMd> {
        self.owner.get()
    }

    pub fn version(&self) -> i64 {
        self.owner.version()
    }

    pub async fn load(&self) -> bool {
        self.owner.load().await
    }

    pub async fn install(&self, rmd: RebalanceMd) -> Result<bool, MetaError> {
        self.owner.install(rmd).await
    }

    /// Publish a new RMD version. Transient fields start empty on the clone.
    pub async fn modify<F>(&self, pre: F) -> Result<RmdModified, MetaError>
    where
        F: FnOnce(&mut RebalanceMd) -> Result<(), MetaError>,
    {
        let m = self.owner.modify(pre).await?;
        let reb_id = reb_id(m.cur.version);
        info!(rmd = %m.cur, reb_id = %reb_id, "RMD modified");
        Ok(RmdModified {
            prev: m.prev,
            cur: m.cur,
            reb_id,
        })
    }

    /// Register for the rebalance outcome and distribute the new version.
    pub async fn sync(
        &self,
        m: &RmdModified,
        syncer: &dyn MetaSyncer,
        notifs: &Notifs,
        req: SyncRequest,
    ) -> Result<(), MetaError> {
        let callback = req
            .callback
            .unwrap_or_else(|| Box::new(log_outcome) as NotifCallback);
        let listener =
            Listener::new(&m.reb_id, XactKind::Rebalance, callback).with_owner(req.owner);
        notifs.add(listener).map_err(|e| MetaError::Sync {
            tag: RebalanceMd::TAG,
            reason: e.to_string(),
        })?;

        let pair = RevsPair {
            revs: Revs::Rmd(Arc::clone(&m.cur)),
            msg: ActionMessage {
                action: XactKind::Rebalance,
                uuid: m.reb_id.clone(),
            },
        };
        let handle = syncer.sync(vec![pair]);
        if !req.wait {
            return Ok(());
        }
        let res = match req.timeout {
            Some(t) => handle.wait_timeout(RebalanceMd::TAG, t).await,
            None => handle.wait(RebalanceMd::TAG).await,
        };
        if let Err(e) = &res
            && notifs.remove(&m.reb_id).is_some()
        {
            warn!(reb_id = %m.reb_id, error = %e, "RMD sync failed, listener dropped");
        }
        res
    }

    /// Claim the rebalance of `version` for this node. Returns false if it
    /// (or a newer one) was already started here.
    pub fn claim_started(&self, version: i64) -> bool {
        self.started.fetch_max(version, Ordering::AcqRel) < version
    }

    pub fn started(&self) -> i64 {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub fn set_interrupted(&self, on: bool) {
        self.interrupted.store(on, Ordering::Release);
    }

    pub fn is_starting(&self) -> bool {
        self.starting.load(Ordering::Acquire)
    }

    pub fn set_starting(&self, on: bool) {
        self.starting.store(on, Ordering::Release);
    }
}

/// Default rebalance listener callback
pub fn log_outcome(n: &Notification) {
    match (&n.err, n.aborted) {
        (_, true) => warn!(reb_id = %n.uuid, "rebalance aborted"),
        (None, false) => info!(reb_id = %n.uuid, "rebalance done"),
        (Some(e), false) => error!(reb_id = %n.uuid, error = %e, "rebalance failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::SyncHandle;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, i64, String)>>,
    }

    impl MetaSyncer for Recorder {
        fn sync(&self, pairs: Vec<RevsPair>) -> SyncHandle {
            let mut sent = self.sent.lock().unwrap();
            for p in pairs {
                sent.push((p.revs.tag().to_string(), p.revs.version(), p.msg.uuid));
            }
            SyncHandle::done(Ok(()))
        }
    }

    #[test]
    fn display_forms() {
        let mut rmd = RebalanceMd {
            version: 4,
            ..Default::default()
        };
        assert_eq!(rmd.to_string(), "RMD v4");
        rmd.target_ids = vec!["t1".to_string()];
        assert_eq!(rmd.to_string(), "RMD v4([\"t1\"])");
        rmd.resilver = "mp-attach".to_string();
        assert_eq!(rmd.to_string(), "RMD v4([\"t1\"], mp-attach)");
    }

    #[test]
    fn reb_ids() {
        assert_eq!(reb_id(12), "g12");
        assert_eq!(parse_reb_id("g12"), Some(12));
        assert_eq!(parse_reb_id("12"), None);
        assert_eq!(parse_reb_id("gx"), None);
    }

    #[tokio::test]
    async fn transient_fields_do_not_carry_over() {
        let dir = tempdir().unwrap();
        let owner = RmdOwner::new(dir.path());
        owner
            .modify(|rmd| {
                rmd.target_ids.push("t9".to_string());
                rmd.resilver = "tag".to_string();
                Ok(())
            })
            .await
            .unwrap();
        let m = owner.modify(|_| Ok(())).await.unwrap();
        assert_eq!(m.prev.target_ids, vec!["t9".to_string()]);
        assert!(m.cur.target_ids.is_empty());
        assert!(m.cur.resilver.is_empty());
        assert_eq!(m.reb_id, "g2");
    }

    #[tokio::test]
    async fn sync_registers_listener_and_distributes() {
        let dir = tempdir().unwrap();
        let owner = RmdOwner::new(dir.path());
        let notifs = Notifs::new();
        let syncer = Recorder::default();

        let m = owner.modify(|_| Ok(())).await.unwrap();
        owner
            .sync(
                &m,
                &syncer,
                &notifs,
                SyncRequest {
                    wait: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(notifs.has("g1"));
        assert_eq!(
            *syncer.sent.lock().unwrap(),
            vec![("rmd".to_string(), 1, "g1".to_string())]
        );

        // Same rebalance cannot be synced twice
        let err = owner
            .sync(&m, &syncer, &notifs, SyncRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MetaError::Sync { .. }));
    }

    struct Unreachable;

    impl MetaSyncer for Unreachable {
        fn sync(&self, _pairs: Vec<RevsPair>) -> SyncHandle {
            SyncHandle::done(Err("unreachable cluster".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_sync_drops_listener() {
        let dir = tempdir().unwrap();
        let owner = RmdOwner::new(dir.path());
        let notifs = Notifs::new();

        for _ in 0..3 {
            let m = owner.modify(|_| Ok(())).await.unwrap();
            let err = owner
                .sync(
                    &m,
                    &Unreachable,
                    &notifs,
                    SyncRequest {
                        wait: true,
                        ..Default::default()
                    },
                )
                .await
                .unwrap_err();
            assert!(err.to_string().contains("unreachable cluster"));
        }
        assert!(notifs.is_empty());
        assert_eq!(owner.version(), 3);
    }

    #[tokio::test]
    async fn timed_out_sync_drops_listener() {
        let dir = tempdir().unwrap();
        let owner = RmdOwner::new(dir.path());
        let notifs = Notifs::new();
        let (tx, handle) = SyncHandle::new();
        let pending = Mutex::new(Some(handle));

        struct Pending<'a>(&'a Mutex<Option<SyncHandle>>);
        impl MetaSyncer for Pending<'_> {
            fn sync(&self, _pairs: Vec<RevsPair>) -> SyncHandle {
                self.0.lock().unwrap().take().unwrap()
            }
        }

        let m = owner.modify(|_| Ok(())).await.unwrap();
        let err = owner
            .sync(
                &m,
                &Pending(&pending),
                &notifs,
                SyncRequest {
                    wait: true,
                    timeout: Some(Duration::from_millis(20)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(!notifs.has("g1"));
        drop(tx);
    }

    #[test]
    fn started_versions_only_move_forward() {
        let dir = tempdir().unwrap();
        let owner = RmdOwner::new(dir.path());
        assert!(owner.claim_started(3));
        assert!(!owner.claim_started(3));
        assert!(!owner.claim_started(2));
        assert!(owner.claim_started(4));
        assert_eq!(owner.started(), 4);
    }

    #[test]
    fn flags() {
        let dir = tempdir().unwrap();
        let owner = RmdOwner::new(dir.path());
        assert!(!owner.is_starting());
        owner.set_starting(true);
        owner.set_interrupted(true);
        assert!(owner.is_starting() && owner.is_interrupted());
    }
}
