// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Storage Node Runtime
//!
//! The runtime a storage target runs on top of its local mountpaths:
//! versioned cluster metadata, supervised background jobs (extended
//! actions), and the mountpath traversal those jobs are built on.
//!
//! # Modules
//!
//! - [`meta`] - Metadata owners: clone, modify, persist, publish
//! - [`xact`] - Extended action base, registry and renew policies
//! - [`jogger`] - One traversal worker per mountpath
//! - [`jobs`] - Resilver, rebalance, make-n-copies, cache warm-up, election
//! - [`notif`] - Completion listeners keyed by action UUID
//! - [`node`] - The target node facade and job start/query surface
//! - [`fs`], [`lom`], [`memsys`], [`capacity`] - Local storage plumbing

pub mod capacity;
pub mod config;
pub mod fs;
pub mod jobs;
pub mod jogger;
pub mod lom;
pub mod memsys;
pub mod meta;
pub mod metrics;
pub mod node;
pub mod notif;
pub mod xact;

pub use node::{Collaborators, LoopbackSyncer, NoTransport, NodeError, TargetNode};
