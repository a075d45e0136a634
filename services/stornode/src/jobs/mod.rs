// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Concrete extended actions run by a storage target.
//!
//! Each job module provides a [`Renewable`](crate::xact::Renewable) factory
//! whose `start()` creates the xaction and spawns the task that drives it to
//! a terminal state, plus an entry point that renews it on the registry.

pub mod election;
pub mod lom_warmup;
pub mod mirror;
pub mod rebalance;
pub mod resilver;

use std::sync::Arc;

use stornode_types::{Bucket, BucketProps, NodeId, XactKind};
use tokio::sync::watch;

use crate::capacity::CapacityTracker;
use crate::config::NodeConfig;
use crate::fs::Mountpaths;
use crate::jogger::{JoggerOpts, VisitObj};
use crate::lom::{Lom, LomCache, NameLocker};
use crate::memsys::{MAX_PAGE_SLAB_SIZE, MemSys};
use crate::meta::{BucketMd, ClusterMap, MetadataOwner};
use crate::notif::Notifs;
use crate::xact::{BckJog, CallError, Registry, XactError};

/// Transport for objects leaving this node during rebalance.
pub trait ObjectSender: Send + Sync {
    /// Deliver `lom` to `target`. Called from blocking jogger threads.
    fn send(&self, target: &str, lom: &Lom) -> Result<(), CallError>;
}

/// Everything a job needs from the node.
#[derive(Clone)]
pub struct JobEnv {
    pub node_id: NodeId,
    pub mountpaths: Arc<Mountpaths>,
    pub smap: Arc<MetadataOwner<ClusterMap>>,
    pub bmd: Arc<MetadataOwner<BucketMd>>,
    pub registry: Arc<Registry>,
    pub notifs: Arc<Notifs>,
    pub locker: Arc<NameLocker>,
    pub lom_cache: Arc<LomCache>,
    pub mm: Arc<MemSys>,
    pub capacity: Arc<dyn CapacityTracker>,
    pub sender: Arc<dyn ObjectSender>,
    pub config: watch::Receiver<NodeConfig>,
}

impl JobEnv {
    /// Current configuration snapshot
    pub fn config(&self) -> NodeConfig {
        self.config.borrow().clone()
    }

    /// Bucket properties, or the defaults for buckets unknown to the BMD
    pub fn bucket_props(&self, bucket: &Bucket) -> BucketProps {
        self.bmd.get().get(bucket).unwrap_or_default()
    }

    /// Jogger options with the node's scratch slab and tunables.
    pub fn jogger_opts(&self, kind: XactKind, visit_obj: VisitObj) -> Result<JoggerOpts, XactError> {
        let slab = self
            .mm
            .get_slab(MAX_PAGE_SLAB_SIZE)
            .map_err(|e| XactError::Start {
                kind,
                reason: e.to_string(),
            })?;
        let config = self.config();
        let mut opts = JoggerOpts::new(kind, Arc::clone(&self.mountpaths), slab, visit_obj);
        opts.throttle = config.throttle();
        opts.stop_timeout = config.stop_timeout();
        Ok(opts)
    }
}

/// Run a jogger-driven xaction to its terminal state in the background.
pub(crate) fn spawn_bckjog(jog: Arc<BckJog>) {
    tokio::spawn(async move {
        jog.run();
        let result = jog.wait().await;
        jog.base().finish(result);
    });
}
