// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Completion notifications for extended actions.
//!
//! Interested parties register a [`Listener`] keyed by the action's UUID.
//! When the action reaches a terminal state the listener fires once and is
//! removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use stornode_types::{NodeId, XactKind};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NotifError {
    #[error("listener for {0} already registered")]
    Duplicate(String),
}

/// What a listener learns when the action terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub uuid: String,
    pub kind: XactKind,
    pub err: Option<String>,
    pub aborted: bool,
}

impl Notification {
    pub fn is_success(&self) -> bool {
        self.err.is_none() && !self.aborted
    }
}

/// Who registered the listener.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListenerOwner {
    /// Information center: the cluster-wide coordinator that tracks jobs
    #[default]
    Ic,
    Node(NodeId),
}

pub type NotifCallback = Box<dyn FnOnce(&Notification) + Send>;

pub struct Listener {
    uuid: String,
    kind: XactKind,
    owner: ListenerOwner,
    callback: NotifCallback,
}

impl Listener {
    pub fn new(uuid: &str, kind: XactKind, callback: NotifCallback) -> Self {
        Self {
            uuid: uuid.to_string(),
            kind,
            owner: ListenerOwner::default(),
            callback,
        }
    }

    pub fn with_owner(mut self, owner: ListenerOwner) -> Self {
        self.owner = owner;
        self
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn kind(&self) -> XactKind {
        self.kind
    }

    pub fn owner(&self) -> &ListenerOwner {
        &self.owner
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("uuid", &self.uuid)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Something an extended action reports its terminal transition to.
pub trait Notifier: Send + Sync {
    fn notify(&self, n: &Notification);
}

/// Registry of listeners keyed by action UUID.
#[derive(Default)]
pub struct Notifs {
    listeners: Mutex<HashMap<String, Listener>>,
}

impl Notifs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener) -> Result<(), NotifError> {
        let mut listeners = match self.listeners.lock() {
            Ok(l) => l,
            Err(poisoned) => poisoned.into_inner(),
        };
        if listeners.contains_key(&listener.uuid) {
            return Err(NotifError::Duplicate(listener.uuid));
        }
        debug!(uuid = %listener.uuid, kind = %listener.kind, owner = ?listener.owner, "listener added");
        listeners.insert(listener.uuid.clone(), listener);
        Ok(())
    }

    pub fn has(&self, uuid: &str) -> bool {
        self.listeners
            .lock()
            .map(|l| l.contains_key(uuid))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, uuid: &str) -> Option<Listener> {
        match self.listeners.lock() {
            Ok(mut l) => l.remove(uuid),
            Err(poisoned) => poisoned.into_inner().remove(uuid),
        }
    }

    /// Fire and remove the listener for `n.uuid`. The callback runs outside
    /// the registry lock. Returns false if nobody was listening.
    pub fn fire(&self, n: &Notification) -> bool {
        let Some(listener) = self.remove(&n.uuid) else {
            return false;
        };
        if listener.kind != n.kind {
            warn!(uuid = %n.uuid, expected = %listener.kind, got = %n.kind, "notification kind mismatch");
        }
        (listener.callback)(n);
        true
    }
}

impl Notifier for Notifs {
    fn notify(&self, n: &Notification) {
        self.fire(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(uuid: &str, hits: &Arc<AtomicUsize>) -> Listener {
        let hits = Arc::clone(hits);
        Listener::new(
            uuid,
            XactKind::Rebalance,
            Box::new(move |n| {
                assert!(n.is_success());
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn fires_exactly_once() {
        let notifs = Notifs::new();
        let hits = Arc::new(AtomicUsize::new(0));
        notifs.add(counting_listener("g7", &hits)).unwrap();
        assert!(notifs.has("g7"));

        let n = Notification {
            uuid: "g7".to_string(),
            kind: XactKind::Rebalance,
            err: None,
            aborted: false,
        };
        assert!(notifs.fire(&n));
        assert!(!notifs.fire(&n));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(notifs.is_empty());
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let notifs = Notifs::new();
        let hits = Arc::new(AtomicUsize::new(0));
        notifs.add(counting_listener("g1", &hits)).unwrap();
        assert_eq!(
            notifs.add(counting_listener("g1", &hits)),
            Err(NotifError::Duplicate("g1".to_string()))
        );
    }

    #[test]
    fn callback_may_register_new_listener() {
        let notifs = Arc::new(Notifs::new());
        let inner = Arc::clone(&notifs);
        notifs
            .add(Listener::new(
                "g2",
                XactKind::Rebalance,
                Box::new(move |_| {
                    let _ = inner.add(Listener::new("g3", XactKind::Rebalance, Box::new(|_| {})));
                }),
            ))
            .unwrap();
        notifs.fire(&Notification {
            uuid: "g2".to_string(),
            kind: XactKind::Rebalance,
            err: Some("boom".to_string()),
            aborted: false,
        });
        assert!(notifs.has("g3"));
    }
}
