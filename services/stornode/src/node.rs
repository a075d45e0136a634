// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Storage target node: owns the runtime state and exposes the job surface.

use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};

use stornode_types::{
    Bucket, MountpathAction, StartOptions, XactId, XactKind, XactQuery, XactSnapshot,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::capacity::{CapacityTracker, StatvfsCapacity};
use crate::config::NodeConfig;
use crate::fs::{FsError, Marker, Mountpath, Mountpaths, persist_marker, remove_marker};
use crate::jobs::election::renew_election;
use crate::jobs::lom_warmup::load_lom_cache;
use crate::jobs::mirror::{MncArgs, make_ncopies};
use crate::jobs::rebalance::{Received, receive_rmd};
use crate::jobs::resilver::{Args as ResilverArgs, Res};
use crate::jobs::{JobEnv, ObjectSender};
use crate::lom::{Lom, LomCache, NameLocker};
use crate::memsys::MemSys;
use crate::meta::{
    MetaError, MetaSyncer, MetadataOwner, RebalanceMd, Revs, RevsPair, RmdOwner, SyncHandle,
    SyncRequest,
};
use crate::notif::Notifs;
use crate::xact::{CallError, Registry, Wpr, XactError};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("{0} requires a bucket")]
    BucketRequired(XactKind),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Xact(#[from] XactError),
}

/// Cause recorded on xactions aborted through [`TargetNode::abort`]
const USER_ABORT: &str = "user request";

/// External services the node talks to.
pub struct Collaborators {
    pub sender: Arc<dyn ObjectSender>,
    pub syncer: Arc<dyn MetaSyncer>,
    /// Defaults to statvfs on the node's mountpaths
    pub capacity: Option<Arc<dyn CapacityTracker>>,
}

pub struct TargetNode {
    env: JobEnv,
    rmd: RmdOwner,
    res: Res,
    syncer: Arc<dyn MetaSyncer>,
}

impl TargetNode {
    pub fn new(
        config: watch::Receiver<NodeConfig>,
        collab: Collaborators,
    ) -> Result<Self, NodeError> {
        let cfg = config.borrow().clone();
        let mountpaths = Arc::new(Mountpaths::new(&cfg.mountpaths)?);
        let capacity: Arc<dyn CapacityTracker> = match collab.capacity {
            Some(c) => c,
            None => Arc::new(StatvfsCapacity::new(
                Arc::clone(&mountpaths),
                cfg.high_watermark_pct,
            )),
        };

        let env = JobEnv {
            node_id: cfg.node_id.clone(),
            mountpaths,
            smap: Arc::new(MetadataOwner::new(&cfg.config_dir)),
            bmd: Arc::new(MetadataOwner::new(&cfg.config_dir)),
            registry: Arc::new(Registry::new(cfg.retention())),
            notifs: Arc::new(Notifs::new()),
            locker: Arc::new(NameLocker::new()),
            lom_cache: Arc::new(LomCache::new()),
            mm: Arc::new(MemSys::new()),
            capacity,
            sender: collab.sender,
            config,
        };
        info!(
            node_id = %cfg.node_id,
            mountpaths = env.mountpaths.get().len(),
            config_dir = %cfg.config_dir.display(),
            "node created"
        );
        Ok(Self {
            rmd: RmdOwner::new(&cfg.config_dir),
            res: Res::new(env.clone()),
            syncer: collab.syncer,
            env,
        })
    }

    pub fn env(&self) -> &JobEnv {
        &self.env
    }

    pub fn rmd(&self) -> &RmdOwner {
        &self.rmd
    }

    pub fn res(&self) -> &Res {
        &self.res
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.env.registry
    }

    pub fn mountpaths(&self) -> &Arc<Mountpaths> {
        &self.env.mountpaths
    }

    // ------------------------------------------------------------------
    // Startup and shutdown
    // ------------------------------------------------------------------

    /// Load persisted cluster metadata. Missing or unreadable documents
    /// leave the empty version in place.
    pub async fn load_metadata(&self) {
        self.rmd.set_starting(true);
        self.env.smap.load().await;
        self.env.bmd.load().await;
        self.rmd.load().await;
        info!(
            smap = %self.env.smap.get(),
            bmd = self.env.bmd.version(),
            rmd = %self.rmd.get(),
            "metadata loaded"
        );
    }

    /// Act on markers left by the previous run, then leave a fresh
    /// node-restarted marker for the next one.
    ///
    /// An interrupted resilver is restarted here. An interrupted rebalance is
    /// only flagged: restarting it is a cluster-wide decision.
    pub fn resume_interrupted(&self) -> Result<Option<XactId>, NodeError> {
        let set = self.env.mountpaths.get();
        let reb = self.env.registry.rebalance_marked(&set);
        if reb.restarted {
            warn!("previous run did not shut down cleanly");
        }
        if reb.interrupted {
            warn!(rmd = %self.rmd.get(), "rebalance was interrupted");
            self.rmd.set_interrupted(true);
        }

        let mut resumed = None;
        let resil = self.env.registry.resilver_marked(&set);
        if resil.interrupted {
            warn!("resilver was interrupted, restarting");
            let renewed = self
                .res
                .run_resilver(ResilverArgs::new(&Uuid::new_v4().to_string()))?;
            resumed = Some(renewed.xact.id().to_string());
        }

        persist_marker(&set, Marker::NodeRestarted)?;
        self.rmd.set_starting(false);
        Ok(resumed)
    }

    /// Abort everything and remove the node-restarted marker.
    pub async fn shutdown(&self) {
        let n = self.env.registry.abort_all("node shutdown");
        let running = self.env.registry.find(&XactQuery::default().running());
        for x in &running {
            x.base().wait_finished().await;
        }
        if let Err(e) = remove_marker(&self.env.mountpaths.get(), Marker::NodeRestarted) {
            warn!(error = %e, "failed to remove node-restarted marker");
        }
        info!(aborted = n, "node stopped");
    }

    /// Apply reloaded configuration to components that cache it.
    pub fn apply_config(&self, config: &NodeConfig) {
        self.env.registry.set_retention(config.retention());
        self.env.capacity.set_high_watermark(config.high_watermark_pct);
    }

    // ------------------------------------------------------------------
    // Job surface
    // ------------------------------------------------------------------

    /// Start (or, for kinds that reuse, join) an extended action and return
    /// its ID. With `opts.wait` the call returns once it has finished.
    pub async fn start(
        &self,
        kind: XactKind,
        bucket: Option<&Bucket>,
        opts: &StartOptions,
    ) -> Result<XactId, NodeError> {
        let uuid = Uuid::new_v4().to_string();
        let renewed = match kind {
            XactKind::Resilver => {
                let mut args = ResilverArgs::new(&uuid);
                args.when_running = Wpr::Reject;
                self.res.run_resilver(args)?
            }
            XactKind::Rebalance => {
                let req = SyncRequest {
                    wait: opts.wait,
                    ..Default::default()
                };
                return self.start_rebalance(req).await;
            }
            XactKind::MakeNCopies => {
                let bucket = bucket.ok_or(NodeError::BucketRequired(kind))?;
                let copies = opts
                    .copies
                    .unwrap_or_else(|| self.env.bucket_props(bucket).mirror_copies);
                make_ncopies(
                    &self.env,
                    MncArgs {
                        uuid,
                        bucket: bucket.clone(),
                        tag: opts.tag.clone().unwrap_or_default(),
                        copies,
                    },
                )?
            }
            XactKind::LoadLomCache => {
                let bucket = bucket.ok_or(NodeError::BucketRequired(kind))?;
                load_lom_cache(&self.env, &uuid, bucket)?
            }
            XactKind::Election => renew_election(&self.env)?,
        };

        let id = renewed.xact.id().to_string();
        if opts.wait && kind != XactKind::Election {
            renewed.xact.base().wait_finished().await;
        }
        Ok(id)
    }

    pub fn query(&self, query: &XactQuery) -> Vec<XactSnapshot> {
        self.env
            .registry
            .find(query)
            .iter()
            .map(|x| x.snap())
            .collect()
    }

    /// Returns false if the xaction had already finished.
    pub fn abort(&self, id: &str) -> Result<bool, NodeError> {
        Ok(self.env.registry.abort(id, USER_ABORT)?)
    }

    // ------------------------------------------------------------------
    // Rebalance
    // ------------------------------------------------------------------

    /// Publish a new RMD version and distribute it. Returns the rebalance ID.
    pub async fn start_rebalance(&self, req: SyncRequest) -> Result<String, NodeError> {
        let smap = self.env.smap.get();
        let m = self
            .rmd
            .modify(|rmd| {
                rmd.target_ids = smap.active_targets().map(|n| n.id.clone()).collect();
                Ok(())
            })
            .await?;
        self.rmd
            .sync(&m, self.syncer.as_ref(), &self.env.notifs, req)
            .await?;
        Ok(m.reb_id)
    }

    pub async fn receive_rmd(&self, rmd: RebalanceMd) -> Result<Option<Received>, NodeError> {
        Ok(receive_rmd(&self.env, &self.rmd, &self.res, rmd).await?)
    }

    // ------------------------------------------------------------------
    // Mountpaths
    // ------------------------------------------------------------------

    /// Apply a mountpath change and resilver. Detach and disable take the
    /// mountpath out of placement first, resilver off of it, and on success
    /// a detach then removes it. Returns the resilver ID, if one started.
    pub fn on_mountpath_change(
        &self,
        action: MountpathAction,
        path: &Path,
    ) -> Result<Option<XactId>, NodeError> {
        let mountpaths = &self.env.mountpaths;
        let rmi = match action {
            MountpathAction::Attach => mountpaths.attach(path)?,
            MountpathAction::Enable => mountpaths.enable(path)?,
            MountpathAction::Detach | MountpathAction::Disable => mountpaths.disable(path)?,
        };
        self.env.lom_cache.clear();
        self.env
            .registry
            .abort_kind(XactKind::LoadLomCache, "mountpath change");

        if mountpaths.get().is_empty() {
            warn!(mountpath = %rmi, %action, "no mountpaths left, nothing to resilver");
            if action == MountpathAction::Detach {
                mountpaths.detach(rmi.path())?;
            }
            return Ok(None);
        }

        let mut args = ResilverArgs::new(&Uuid::new_v4().to_string());
        args.rmi = Some(rmi);
        args.action = Some(action);
        if action.is_removal() {
            args.single_rmi_jogger = true;
            let mountpaths = Arc::clone(mountpaths);
            args.post_dd = Some(Box::new(
                move |mp: &Mountpath, action: MountpathAction, err: Option<&XactError>| {
                    if let Some(e) = err {
                        error!(mountpath = %mp, %action, error = %e, "resilver failed, mountpath stays disabled");
                        return;
                    }
                    if action == MountpathAction::Detach
                        && let Err(e) = mountpaths.detach(mp.path())
                    {
                        error!(mountpath = %mp, error = %e, "failed to detach");
                    }
                },
            ));
        }
        let renewed = self.res.run_resilver(args)?;
        Ok(Some(renewed.xact.id().to_string()))
    }
}

/// Delivers distributed metadata back to this node. Used when the node runs
/// without a cluster transport.
#[derive(Default)]
pub struct LoopbackSyncer {
    node: OnceLock<Weak<TargetNode>>,
}

impl LoopbackSyncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route deliveries to `node`. Only the first call has effect.
    pub fn bind(&self, node: &Arc<TargetNode>) {
        let _ = self.node.set(Arc::downgrade(node));
    }
}

impl MetaSyncer for LoopbackSyncer {
    fn sync(&self, pairs: Vec<RevsPair>) -> SyncHandle {
        let Some(node) = self.node.get().and_then(Weak::upgrade) else {
            return SyncHandle::done(Err("loopback not bound".to_string()));
        };
        let rmds: Vec<Arc<RebalanceMd>> = pairs
            .into_iter()
            .filter_map(|p| match p.revs {
                Revs::Rmd(rmd) => Some(rmd),
                _ => None,
            })
            .collect();

        let (tx, handle) = SyncHandle::new();
        tokio::spawn(async move {
            let mut result = Ok(());
            for rmd in rmds {
                if let Err(e) = node.receive_rmd(RebalanceMd::clone(&rmd)).await {
                    result = Err(e.to_string());
                    break;
                }
            }
            let _ = tx.send(result);
        });
        handle
    }
}

/// Object transport for a node with no peers; every send fails.
pub struct NoTransport;

impl ObjectSender for NoTransport {
    fn send(&self, target: &str, lom: &Lom) -> Result<(), CallError> {
        Err(CallError::Hard(format!(
            "no transport to send {} to {target}",
            lom.uname()
        )))
    }
}
