// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! State shared by every extended action

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use stornode_types::{Bucket, XactKind, XactSnapshot, XactState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::XactError;
use crate::metrics;
use crate::notif::{Notification, Notifier};

struct Terminal {
    state: XactState,
    end_time: Option<DateTime<Utc>>,
    err: Option<String>,
    abort_cause: Option<String>,
}

pub struct XactBase {
    id: String,
    kind: XactKind,
    bucket: Option<Bucket>,
    start_time: DateTime<Utc>,
    abort: CancellationToken,
    terminal: Mutex<Terminal>,
    objects: AtomicI64,
    bytes: AtomicI64,
    idle: AtomicBool,
    notifiers: Mutex<Vec<Arc<dyn Notifier>>>,
    finished: watch::Sender<bool>,
}

impl XactBase {
    pub fn new(id: &str, kind: XactKind, bucket: Option<Bucket>) -> Self {
        metrics::record_xact_started(&kind.to_string());
        let (finished, _) = watch::channel(false);
        Self {
            id: id.to_string(),
            kind,
            bucket,
            start_time: Utc::now(),
            abort: CancellationToken::new(),
            terminal: Mutex::new(Terminal {
                state: XactState::Running,
                end_time: None,
                err: None,
                abort_cause: None,
            }),
            objects: AtomicI64::new(0),
            bytes: AtomicI64::new(0),
            idle: AtomicBool::new(false),
            notifiers: Mutex::new(Vec::new()),
            finished,
        }
    }

    fn terminal(&self) -> MutexGuard<'_, Terminal> {
        match self.terminal.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> XactKind {
        self.kind
    }

    pub fn bucket(&self) -> Option<&Bucket> {
        self.bucket.as_ref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.terminal().end_time
    }

    pub fn name(&self) -> String {
        match &self.bucket {
            Some(b) => format!("{}[{}]-{}", self.kind, self.id, b),
            None => format!("{}[{}]", self.kind, self.id),
        }
    }

    pub fn state(&self) -> XactState {
        self.terminal().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == XactState::Running
    }

    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    // ------------------------------------------------------------------
    // Abort
    // ------------------------------------------------------------------

    /// Request cooperative abort. The first cause is kept. Returns false if
    /// the xaction has already finished.
    pub fn abort(&self, cause: &str) -> bool {
        {
            let mut t = self.terminal();
            if t.state.is_terminal() {
                return false;
            }
            if t.abort_cause.is_none() {
                t.abort_cause = Some(cause.to_string());
            }
        }
        if !self.abort.is_cancelled() {
            info!(xact = %self.name(), cause, "abort requested");
        }
        self.abort.cancel();
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn abort_cause(&self) -> Option<String> {
        self.terminal().abort_cause.clone()
    }

    /// Resolves once abort has been requested.
    pub async fn aborted(&self) {
        self.abort.cancelled().await
    }

    // ------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------

    pub fn objs_add(&self, objects: i64, bytes: i64) {
        self.objects.fetch_add(objects, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        metrics::record_objects(&self.kind.to_string(), objects, bytes);
    }

    pub fn objs(&self) -> i64 {
        self.objects.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> i64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::Relaxed);
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Relaxed)
    }

    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        match self.notifiers.lock() {
            Ok(mut n) => n.push(notifier),
            Err(poisoned) => poisoned.into_inner().push(notifier),
        }
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    /// Transition to the terminal state. Only the first call has effect.
    ///
    /// An xaction that was asked to abort ends Aborted with the original
    /// cause, whatever `result` says. An `Aborted` error ends it Aborted
    /// too; any other error ends it Failed.
    pub fn finish(&self, result: Result<(), XactError>) -> bool {
        let (state, err) = {
            let mut t = self.terminal();
            if t.state.is_terminal() {
                return false;
            }
            let (state, err) = match (&result, self.abort.is_cancelled()) {
                (_, true) => (
                    XactState::Aborted,
                    t.abort_cause.clone().or_else(|| result.as_ref().err().map(|e| e.to_string())),
                ),
                (Err(XactError::Aborted { cause, .. }), false) => {
                    t.abort_cause = Some(cause.clone());
                    (XactState::Aborted, Some(cause.clone()))
                }
                (Err(e), false) => (XactState::Failed, Some(e.to_string())),
                (Ok(()), false) => (XactState::Finished, None),
            };
            t.state = state;
            t.err = err.clone();
            t.end_time = Some(Utc::now());
            (state, err)
        };
        // Anything still polling the token stops at its next checkpoint
        self.abort.cancel();

        match (&state, &err) {
            (XactState::Finished, _) => {
                info!(xact = %self.name(), objects = self.objs(), bytes = self.bytes(), "finished")
            }
            (_, Some(e)) => warn!(xact = %self.name(), state = %state, error = %e, "finished"),
            (_, None) => warn!(xact = %self.name(), state = %state, "finished"),
        }
        metrics::record_xact_finished(&self.kind.to_string(), &state.to_string());

        let n = Notification {
            uuid: self.id.clone(),
            kind: self.kind,
            err: err.filter(|_| state == XactState::Failed),
            aborted: state == XactState::Aborted,
        };
        let notifiers = match self.notifiers.lock() {
            Ok(mut n) => std::mem::take(&mut *n),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for notifier in notifiers {
            notifier.notify(&n);
        }

        self.finished.send_replace(true);
        true
    }

    /// Resolves once the xaction has reached a terminal state.
    pub async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn snap(&self) -> XactSnapshot {
        let t = self.terminal();
        XactSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            bucket: self.bucket.clone(),
            start_time: self.start_time,
            end_time: t.end_time,
            state: t.state,
            err: t.err.clone(),
            objects: self.objs(),
            bytes: self.bytes(),
            idle: self.is_idle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notif::{Listener, Notifs};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn finishes_exactly_once() {
        let x = XactBase::new("x1", XactKind::Resilver, None);
        assert!(x.is_running());
        assert!(x.finish(Ok(())));
        assert!(!x.finish(Err(XactError::NoMountpaths)));
        let snap = x.snap();
        assert_eq!(snap.state, XactState::Finished);
        assert!(snap.end_time.is_some());
        assert!(snap.err.is_none());
        // Finished xactions cannot be aborted
        assert!(!x.abort("late"));
        assert_eq!(x.state(), XactState::Finished);
    }

    #[test]
    fn abort_keeps_first_cause() {
        let x = XactBase::new("x2", XactKind::MakeNCopies, Some(Bucket::ais("b")));
        assert!(x.abort("user request"));
        assert!(x.abort("shutdown"));
        x.finish(Ok(()));
        let snap = x.snap();
        assert_eq!(snap.state, XactState::Aborted);
        assert_eq!(snap.err.as_deref(), Some("user request"));
        assert_eq!(x.name(), "make-n-copies[x2]-ais://b");
    }

    #[test]
    fn aborted_error_and_failure() {
        let x = XactBase::new("x3", XactKind::Resilver, None);
        x.finish(Err(XactError::Aborted {
            name: x.name(),
            cause: "out of space".to_string(),
        }));
        assert_eq!(x.state(), XactState::Aborted);
        assert_eq!(x.abort_cause().as_deref(), Some("out of space"));

        let y = XactBase::new("x4", XactKind::Resilver, None);
        y.finish(Err(XactError::NoMountpaths));
        assert_eq!(y.state(), XactState::Failed);
        assert_eq!(y.snap().err.as_deref(), Some("no mountpaths"));
    }

    #[test]
    fn notifies_on_terminal_transition() {
        let notifs = Arc::new(Notifs::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        notifs
            .add(Listener::new(
                "g5",
                XactKind::Rebalance,
                Box::new(move |n| {
                    assert!(n.aborted);
                    assert!(n.err.is_none());
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            ))
            .unwrap();

        let x = XactBase::new("g5", XactKind::Rebalance, None);
        x.add_notifier(notifs.clone());
        x.abort("superseded");
        x.finish(Ok(()));
        x.finish(Ok(()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waiters_wake_on_finish() {
        let x = Arc::new(XactBase::new("x6", XactKind::Election, None));
        let waiter = {
            let x = Arc::clone(&x);
            tokio::spawn(async move { x.wait_finished().await })
        };
        x.objs_add(3, 300);
        x.finish(Ok(()));
        waiter.await.unwrap();
        assert_eq!(x.snap().objects, 3);
        // Already finished: returns immediately
        x.wait_finished().await;
    }
}
