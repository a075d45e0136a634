// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Target side of a cluster rebalance.
//!
//! A new RMD version means cluster membership changed. Every local object
//! whose HRW target is now another node is sent there and removed here.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use stornode_types::{NodeId, XactKind};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::resilver::{Args as ResilverArgs, Res};
use super::{JobEnv, ObjectSender};
use crate::fs::{Marker, persist_marker, remove_marker};
use crate::jogger::{JoggerGroup, VisitError};
use crate::lom::Lom;
use crate::meta::{ClusterMap, RebalanceMd, RmdOwner, reb_id};
use crate::xact::{
    BckJog, RetryArgs, Renewable, Renewed, Wpr, Xact, XactBase, XactError, XactHandle,
    call_with_retry,
};

/// What a received RMD started.
pub struct Received {
    pub rebalance: Renewed,
    /// Set when the RMD asked targets to resilver as well
    pub resilver: Option<Renewed>,
}

/// Install a newer RMD and start the rebalance it describes.
///
/// Older versions are ignored (Ok(None)). The installed version is accepted
/// once more if its rebalance was never started here, which is the case on
/// the node that modified the RMD itself.
pub async fn receive_rmd(
    env: &JobEnv,
    owner: &RmdOwner,
    res: &Res,
    rmd: RebalanceMd,
) -> Result<Option<Received>, XactError> {
    let have = owner.version();
    let version = rmd.version;
    if version < have || version <= owner.started() {
        debug!(have, started = owner.started(), got = version, "ignoring stale RMD");
        return Ok(None);
    }
    let resilver_tag = rmd.resilver.clone();
    info!(rmd = %rmd, resilver_active = res.is_active(1), "received RMD");
    if version > have && !owner.install(rmd).await? {
        // Lost to a concurrent install of the same or newer version
        return Ok(None);
    }
    if !owner.claim_started(version) {
        debug!(got = version, "rebalance already started");
        return Ok(None);
    }

    let id = reb_id(version);
    persist_marker(&env.mountpaths.get(), Marker::Rebalance)?;
    let rebalance = env.registry.renew(Box::new(Factory {
        env: env.clone(),
        id: id.clone(),
    }))?;
    if let Some(prev) = &rebalance.superseded {
        info!(prev = %prev.name(), cur = %rebalance.xact.name(), "superseded");
    }

    let resilver = if resilver_tag.is_empty() {
        None
    } else {
        let mut args = ResilverArgs::new(&Uuid::new_v4().to_string());
        // Objects leaving the node are the rebalance's job
        args.skip_glob_misplaced = true;
        Some(res.run_resilver(args)?)
    };
    Ok(Some(Received {
        rebalance,
        resilver,
    }))
}

struct Factory {
    env: JobEnv,
    id: String,
}

impl Renewable for Factory {
    fn kind(&self) -> XactKind {
        XactKind::Rebalance
    }

    fn when_prev_is_running(&self, _prev: &XactHandle) -> Result<Wpr, XactError> {
        Ok(Wpr::Supersede)
    }

    fn start(self: Box<Self>) -> Result<XactHandle, XactError> {
        let Factory { env, id } = *self;
        let base = Arc::new(XactBase::new(&id, XactKind::Rebalance, None));
        base.add_notifier(env.notifs.clone());

        let sender = Arc::new(Sender {
            base: Arc::clone(&base),
            env: env.clone(),
            smap: env.smap.get(),
            node_id: env.node_id.clone(),
            failed: AtomicI64::new(0),
        });
        let visit_obj = {
            let sender = Arc::clone(&sender);
            Arc::new(move |lom: &mut Lom, _buf: &mut [u8]| sender.visit_obj(lom))
        };
        let mut opts = env.jogger_opts(XactKind::Rebalance, visit_obj)?;
        opts.load = true;

        let xreb = Arc::new(Rebalance {
            jog: Arc::new(BckJog::new(base, JoggerGroup::new(opts, None))),
            sender,
        });
        info!(xact = %xreb.name(), smap = %xreb.sender.smap, "rebalancing");
        let handle: XactHandle = xreb.clone();
        tokio::spawn(async move { xreb.run(&env).await });
        Ok(handle)
    }
}

pub struct Rebalance {
    jog: Arc<BckJog>,
    sender: Arc<Sender>,
}

impl Xact for Rebalance {
    fn base(&self) -> &XactBase {
        self.jog.base()
    }
}

impl Rebalance {
    async fn run(&self, env: &JobEnv) {
        self.jog.run();
        let mut result = self.jog.wait().await;

        let failed = self.sender.failed.load(Ordering::Relaxed);
        if result.is_ok() && failed > 0 {
            result = Err(XactError::FatalObject {
                name: self.name(),
                reason: format!("failed to send {failed} object(s)"),
            });
        }
        match &result {
            Ok(()) => {
                if let Err(e) = remove_marker(&env.mountpaths.get(), Marker::Rebalance) {
                    warn!(xact = %self.name(), error = %e, "failed to remove marker");
                }
            }
            Err(e) => info!(xact = %self.name(), error = %e, "marker kept"),
        }
        self.base().finish(result);
    }
}

struct Sender {
    base: Arc<XactBase>,
    env: JobEnv,
    /// Cluster map the rebalance was started against
    smap: Arc<ClusterMap>,
    node_id: NodeId,
    failed: AtomicI64,
}

impl Sender {
    fn visit_obj(&self, lom: &mut Lom) -> Result<(), VisitError> {
        let uname = lom.uname();
        let target = match self.smap.hrw_target(&uname) {
            Some(t) if t != self.node_id => t,
            _ => return Ok(()),
        };

        let Some(_lock) = self.env.locker.try_lock(&uname, true) else {
            return Err(VisitError::Transient(format!("{uname} is busy")));
        };

        let args = RetryArgs::new(&format!("send {uname} to {target}"));
        let sender: &dyn ObjectSender = self.env.sender.as_ref();
        if let Err(e) = call_with_retry(&args, || sender.send(target, lom)) {
            self.failed.fetch_add(1, Ordering::Relaxed);
            warn!(xact = %self.base.name(), uname, target, error = %e, "failed to send");
            return Ok(());
        }

        // Delivered: drop every local replica, the primary last
        let primary = lom.mountpath().clone();
        let replicas: Vec<_> = lom
            .copies()
            .iter()
            .filter(|mp| **mp != primary)
            .cloned()
            .collect();
        for mp in replicas.iter().chain(std::iter::once(&primary)) {
            if let Err(e) = lom.del_copy(mp) {
                warn!(xact = %self.base.name(), uname, mountpath = %mp, error = %e, "failed to remove sent object");
            }
        }
        self.env.lom_cache.uncache(&uname);
        self.base.objs_add(1, lom.size() as i64);
        Ok(())
    }
}
