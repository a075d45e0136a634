// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Interface to the metadata distribution service.
//!
//! The transport that pushes new versions to cluster members lives outside
//! this crate; the runtime only hands it versioned snapshots and, when asked
//! to, waits for the returned handle.

use std::sync::Arc;
use std::time::Duration;

use stornode_types::ActionMessage;
use tokio::sync::oneshot;

use super::{BucketMd, ClusterMap, MetaError, RebalanceMd, Versioned};

/// A versioned snapshot ready for distribution.
#[derive(Debug, Clone)]
pub enum Revs {
    ClusterMap(Arc<ClusterMap>),
    Bmd(Arc<BucketMd>),
    Rmd(Arc<RebalanceMd>),
}

impl Revs {
    pub fn tag(&self) -> &'static str {
        match self {
            Revs::ClusterMap(_) => ClusterMap::TAG,
            Revs::Bmd(_) => BucketMd::TAG,
            Revs::Rmd(_) => RebalanceMd::TAG,
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            Revs::ClusterMap(m) => m.version(),
            Revs::Bmd(m) => m.version(),
            Revs::Rmd(m) => m.version(),
        }
    }
}

/// Snapshot plus the action that caused it.
#[derive(Debug, Clone)]
pub struct RevsPair {
    pub revs: Revs,
    pub msg: ActionMessage,
}

/// Outcome reported by the distribution service
pub type SyncResult = Result<(), String>;

/// Completion handle for one distribution.
pub struct SyncHandle {
    rx: oneshot::Receiver<SyncResult>,
}

impl SyncHandle {
    /// A handle plus the sender that completes it.
    pub fn new() -> (oneshot::Sender<SyncResult>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A handle that is already complete.
    pub fn done(result: SyncResult) -> Self {
        let (tx, handle) = Self::new();
        let _ = tx.send(result);
        handle
    }

    pub async fn wait(self, tag: &'static str) -> Result<(), MetaError> {
        match self.rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(MetaError::Sync { tag, reason }),
            Err(_) => Err(MetaError::Sync {
                tag,
                reason: "distribution dropped without completing".to_string(),
            }),
        }
    }

    pub async fn wait_timeout(self, tag: &'static str, timeout: Duration) -> Result<(), MetaError> {
        match tokio::time::timeout(timeout, self.wait(tag)).await {
            Ok(res) => res,
            Err(_) => Err(MetaError::Sync {
                tag,
                reason: format!("timed out after {:?}", timeout),
            }),
        }
    }
}

/// Pushes new metadata versions to the cluster.
pub trait MetaSyncer: Send + Sync {
    fn sync(&self, pairs: Vec<RevsPair>) -> SyncHandle;
}
