// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Extended actions (xactions): supervised, cancellable background jobs.
//!
//! Every xaction embeds an [`XactBase`] that owns its identity, abort signal,
//! counters and terminal state. The [`Registry`] decides, per kind and
//! bucket, whether a start request creates a new xaction, reuses the running
//! one, supersedes it, or is rejected.

pub mod base;
pub mod bckjog;
pub mod registry;
pub mod retry;

pub use base::XactBase;
pub use bckjog::BckJog;
pub use registry::{Marked, Registry, Renewable, Renewed, RetentionPolicy, Wpr};
pub use retry::{CallError, RetryArgs, call_with_retry};

use std::sync::Arc;

use stornode_types::{Bucket, XactId, XactKind, XactSnapshot, XactState};
use thiserror::Error;

use crate::fs::FsError;
use crate::meta::MetaError;

#[derive(Error, Debug)]
pub enum XactError {
    #[error("{kind} is already running ({id})")]
    AlreadyRunning { kind: XactKind, id: XactId },

    #[error("{name} aborted: {cause}")]
    Aborted { name: String, cause: String },

    #[error("xaction {0} not found")]
    NotFound(XactId),

    #[error("failed to start {kind}: {reason}")]
    Start { kind: XactKind, reason: String },

    #[error("{name}: {reason}")]
    FatalObject { name: String, reason: String },

    #[error("no mountpaths")]
    NoMountpaths,

    #[error("invalid number of copies {copies}: expecting 1 to {max}")]
    InvalidCopies { copies: u32, max: usize },

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Meta(#[from] MetaError),
}

impl XactError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, XactError::Aborted { .. })
    }
}

/// A running or finished extended action.
pub trait Xact: Send + Sync {
    fn base(&self) -> &XactBase;

    fn name(&self) -> String {
        self.base().name()
    }

    fn snap(&self) -> XactSnapshot {
        self.base().snap()
    }

    fn id(&self) -> &str {
        self.base().id()
    }

    fn kind(&self) -> XactKind {
        self.base().kind()
    }

    fn bucket(&self) -> Option<&Bucket> {
        self.base().bucket()
    }

    fn state(&self) -> XactState {
        self.base().state()
    }

    fn is_running(&self) -> bool {
        self.base().is_running()
    }

    /// Request cooperative abort. Returns false if already finished.
    fn abort(&self, cause: &str) -> bool {
        self.base().abort(cause)
    }
}

pub type XactHandle = Arc<dyn Xact>;
