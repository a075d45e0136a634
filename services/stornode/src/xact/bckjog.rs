// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! An xaction driven by a jogger group.

use std::sync::Arc;

use tracing::debug;

use super::{XactBase, XactError};
use crate::jogger::{JoggerGroup, VisitError};

pub struct BckJog {
    base: Arc<XactBase>,
    joggers: JoggerGroup,
}

impl BckJog {
    pub fn new(base: Arc<XactBase>, joggers: JoggerGroup) -> Self {
        Self { base, joggers }
    }

    pub fn base(&self) -> &Arc<XactBase> {
        &self.base
    }

    pub fn num_joggers(&self) -> usize {
        self.joggers.num()
    }

    pub fn run(&self) {
        debug!(xact = %self.base.name(), joggers = self.joggers.num(), "running");
        self.joggers.run();
    }

    /// Wait for the traversal to complete or for abort, whichever comes
    /// first. On abort the joggers are stopped before returning.
    pub async fn wait(&self) -> Result<(), XactError> {
        tokio::select! {
            biased;
            _ = self.base.aborted() => {
                let _ = self.joggers.stop().await;
                Err(self.aborted_err())
            }
            _ = self.joggers.wait_finished() => {
                self.joggers.stop().await.map_err(|e| self.classify(e))
            }
        }
    }

    fn aborted_err(&self) -> XactError {
        XactError::Aborted {
            name: self.base.name(),
            cause: self.base.abort_cause().unwrap_or_else(|| "aborted".to_string()),
        }
    }

    fn classify(&self, err: VisitError) -> XactError {
        match err {
            VisitError::Aborted(cause) => {
                self.base.abort(&cause);
                self.aborted_err()
            }
            other => XactError::FatalObject {
                name: self.base.name(),
                reason: other.to_string(),
            },
        }
    }
}
