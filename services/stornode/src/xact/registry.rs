// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Registry of running and recently finished xactions.
//!
//! At most one non-terminal xaction exists per (kind, scope), where the scope
//! is the bucket for bucket-scoped kinds and the whole node otherwise. The
//! renew decision and the registration of the new xaction happen under one
//! lock, so two concurrent starters cannot both win.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use stornode_types::{Bucket, XactKind, XactQuery};
use tracing::{debug, info};

use super::{XactError, XactHandle};
use crate::fs::{Marker, MountpathSet, marker_exists};

/// What to do when a matching xaction is already running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wpr {
    /// Fail with [`XactError::AlreadyRunning`]
    Reject,
    /// Return the running xaction
    Reuse,
    /// Abort the running xaction and start a new one
    Supersede,
}

/// Factory for one kind of xaction.
pub trait Renewable: Send {
    fn kind(&self) -> XactKind;

    fn bucket(&self) -> Option<&Bucket> {
        None
    }

    fn when_prev_is_running(&self, prev: &XactHandle) -> Result<Wpr, XactError>;

    /// Create and launch the xaction. Must not block: long-running work is
    /// spawned.
    fn start(self: Box<Self>) -> Result<XactHandle, XactError>;
}

pub struct Renewed {
    pub xact: XactHandle,
    /// The running xaction was returned instead of a new one
    pub reused: bool,
    /// The running xaction this one replaced; abort already requested
    pub superseded: Option<XactHandle>,
}

/// How many finished xactions to keep, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_finished: usize,
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_finished: 64,
            max_age: Duration::from_secs(3600),
        }
    }
}

/// Interrupted-job state consulted at startup.
pub struct Marked {
    /// The running xaction, if any
    pub xact: Option<XactHandle>,
    /// The job's marker was found on disk
    pub interrupted: bool,
    /// The node did not shut down cleanly last time
    pub restarted: bool,
}

#[derive(Default)]
pub struct Registry {
    // Insertion order; the oldest entries come first
    entries: Mutex<Vec<XactHandle>>,
    retention: Mutex<RetentionPolicy>,
}

fn same_scope(x: &XactHandle, kind: XactKind, bucket: Option<&Bucket>) -> bool {
    x.kind() == kind && (!kind.is_bucket_scoped() || x.bucket() == bucket)
}

impl Registry {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            retention: Mutex::new(retention),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<XactHandle>> {
        match self.entries.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        match self.retention.lock() {
            Ok(r) => *r,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_retention(&self, policy: RetentionPolicy) {
        match self.retention.lock() {
            Ok(mut r) => *r = policy,
            Err(poisoned) => *poisoned.into_inner() = policy,
        }
    }

    /// Start a new xaction or resolve the conflict with the running one
    /// according to the factory's policy.
    pub fn renew(&self, factory: Box<dyn Renewable>) -> Result<Renewed, XactError> {
        let kind = factory.kind();
        let mut entries = self.entries();
        self.housekeep_locked(&mut entries);

        let mut superseded = None;
        let running = entries
            .iter()
            .find(|x| x.is_running() && same_scope(x, kind, factory.bucket()))
            .cloned();
        if let Some(prev) = running {
            match factory.when_prev_is_running(&prev)? {
                Wpr::Reject => {
                    debug!(kind = %kind, running = %prev.name(), "renew rejected");
                    return Err(XactError::AlreadyRunning {
                        kind,
                        id: prev.id().to_string(),
                    });
                }
                Wpr::Reuse => {
                    debug!(kind = %kind, running = %prev.name(), "renew reusing");
                    return Ok(Renewed {
                        xact: prev,
                        reused: true,
                        superseded: None,
                    });
                }
                Wpr::Supersede => {
                    info!(kind = %kind, running = %prev.name(), "superseding");
                    prev.abort("superseded");
                    superseded = Some(prev);
                }
            }
        }

        let xact = factory.start()?;
        info!(xact = %xact.name(), "started");
        entries.push(Arc::clone(&xact));
        Ok(Renewed {
            xact,
            reused: false,
            superseded,
        })
    }

    /// Register an xaction created outside of [`Registry::renew`].
    pub fn add(&self, xact: XactHandle) {
        self.entries().push(xact);
    }

    pub fn get(&self, id: &str) -> Option<XactHandle> {
        self.entries().iter().find(|x| x.id() == id).cloned()
    }

    pub fn get_running(&self, kind: XactKind, bucket: Option<&Bucket>) -> Option<XactHandle> {
        self.entries()
            .iter()
            .find(|x| x.is_running() && same_scope(x, kind, bucket))
            .cloned()
    }

    /// Matching xactions, oldest first. A query by ID ignores `only_running`.
    pub fn find(&self, query: &XactQuery) -> Vec<XactHandle> {
        self.entries()
            .iter()
            .filter(|x| {
                if let Some(id) = &query.id {
                    return x.id() == id;
                }
                if query.only_running && !x.is_running() {
                    return false;
                }
                if query.kind.is_some_and(|k| k != x.kind()) {
                    return false;
                }
                if let Some(b) = &query.bucket {
                    return x.bucket() == Some(b);
                }
                true
            })
            .cloned()
            .collect()
    }

    /// Abort by ID. Ok(false) if it had already finished.
    pub fn abort(&self, id: &str, cause: &str) -> Result<bool, XactError> {
        let xact = self
            .get(id)
            .ok_or_else(|| XactError::NotFound(id.to_string()))?;
        Ok(xact.abort(cause))
    }

    /// Abort every running xaction of `kind`. Returns how many were asked.
    pub fn abort_kind(&self, kind: XactKind, cause: &str) -> usize {
        self.running()
            .into_iter()
            .filter(|x| x.kind() == kind)
            .filter(|x| x.abort(cause))
            .count()
    }

    pub fn abort_all(&self, cause: &str) -> usize {
        self.running()
            .into_iter()
            .filter(|x| x.abort(cause))
            .count()
    }

    fn running(&self) -> Vec<XactHandle> {
        self.entries()
            .iter()
            .filter(|x| x.is_running())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict finished xactions past the retention limits.
    pub fn housekeep(&self) {
        let mut entries = self.entries();
        self.housekeep_locked(&mut entries);
    }

    fn housekeep_locked(&self, entries: &mut Vec<XactHandle>) {
        let policy = self.retention();
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(policy.max_age).unwrap_or(chrono::Duration::MAX);
        entries.retain(|x| match x.base().end_time() {
            Some(end) => now.signed_duration_since(end) <= max_age,
            None => true,
        });

        let mut finished = entries.iter().filter(|x| !x.is_running()).count();
        while finished > policy.max_finished {
            let oldest = entries
                .iter()
                .enumerate()
                .filter_map(|(i, x)| x.base().end_time().map(|end| (i, end)))
                .min_by_key(|(_, end)| *end)
                .map(|(i, _)| i);
            match oldest {
                Some(i) => {
                    entries.remove(i);
                    finished -= 1;
                }
                None => break,
            }
        }
    }

    pub fn rebalance_marked(&self, set: &MountpathSet) -> Marked {
        match self.get_running(XactKind::Rebalance, None) {
            Some(x) => Marked {
                xact: Some(x),
                interrupted: false,
                restarted: false,
            },
            None => Marked {
                xact: None,
                interrupted: marker_exists(set, Marker::Rebalance),
                restarted: marker_exists(set, Marker::NodeRestarted),
            },
        }
    }

    pub fn resilver_marked(&self, set: &MountpathSet) -> Marked {
        match self.get_running(XactKind::Resilver, None) {
            Some(x) => Marked {
                xact: Some(x),
                interrupted: false,
                restarted: false,
            },
            None => Marked {
                xact: None,
                interrupted: marker_exists(set, Marker::Resilver),
                restarted: false,
            },
        }
    }
}
