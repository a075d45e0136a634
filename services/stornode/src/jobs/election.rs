// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Election marker xaction.
//!
//! Exists only so that "an election is in progress" is visible through the
//! registry. It has no workers; the election logic finishes it.

use std::sync::Arc;

use stornode_types::XactKind;
use uuid::Uuid;

use super::JobEnv;
use crate::xact::{Renewable, Renewed, Wpr, Xact, XactBase, XactError, XactHandle};

pub fn renew_election(env: &JobEnv) -> Result<Renewed, XactError> {
    env.registry.renew(Box::new(Factory))
}

struct Factory;

impl Renewable for Factory {
    fn kind(&self) -> XactKind {
        XactKind::Election
    }

    fn when_prev_is_running(&self, _prev: &XactHandle) -> Result<Wpr, XactError> {
        Ok(Wpr::Reuse)
    }

    fn start(self: Box<Self>) -> Result<XactHandle, XactError> {
        let id = Uuid::new_v4().to_string();
        let base = Arc::new(XactBase::new(&id, XactKind::Election, None));
        base.set_idle(true);

        // Nothing else would ever finish an aborted election
        let watcher = Arc::clone(&base);
        tokio::spawn(async move {
            watcher.aborted().await;
            let cause = watcher.abort_cause().unwrap_or_else(|| "aborted".to_string());
            watcher.finish(Err(XactError::Aborted {
                name: watcher.name(),
                cause,
            }));
        });
        Ok(Arc::new(Election { base }))
    }
}

pub struct Election {
    base: Arc<XactBase>,
}

impl Xact for Election {
    fn base(&self) -> &XactBase {
        &self.base
    }
}

impl Election {
    /// Called by the election logic once a primary has been chosen.
    pub fn done(&self, result: Result<(), XactError>) -> bool {
        self.base.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::test_env;
    use stornode_types::XactState;

    #[tokio::test]
    async fn reused_until_done() {
        let t = test_env(1);
        let first = renew_election(&t.env).unwrap();
        let second = renew_election(&t.env).unwrap();
        assert!(second.reused);
        assert_eq!(first.xact.id(), second.xact.id());
        assert!(first.xact.snap().idle);

        first.xact.base().finish(Ok(()));
        let third = renew_election(&t.env).unwrap();
        assert!(!third.reused);
        assert_ne!(third.xact.id(), first.xact.id());
    }

    #[tokio::test]
    async fn abort_finishes_it() {
        let t = test_env(1);
        let renewed = renew_election(&t.env).unwrap();
        assert!(renewed.xact.abort("primary changed"));
        renewed.xact.base().wait_finished().await;
        let snap = renewed.xact.snap();
        assert_eq!(snap.state, XactState::Aborted);
        assert_eq!(snap.err.as_deref(), Some("primary changed"));
    }
}
