// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared types for the storage node runtime.
//!
//! This crate contains the vocabulary used by the node runtime itself and by
//! the outer layers (API handlers, CLI) that start, query and abort extended
//! actions (xactions) on a node.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, VariantNames};

// ============================================================================
// Type Aliases
// ============================================================================

/// Cluster node identifier
pub type NodeId = String;

/// Extended action identifier (cluster-wide unique token)
pub type XactId = String;

// ============================================================================
// Buckets
// ============================================================================

/// Default bucket provider for buckets native to the cluster.
pub const PROVIDER_AIS: &str = "ais";

/// A bucket reference: provider plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct Bucket {
    /// Backend provider ("ais" for cluster-native buckets)
    pub provider: String,
    /// Bucket name, unique within the provider
    pub name: String,
}

impl Bucket {
    /// Create a bucket reference for a cluster-native bucket.
    pub fn ais(name: &str) -> Self {
        Self {
            provider: PROVIDER_AIS.to_string(),
            name: name.to_string(),
        }
    }

    /// Unique name of an object within this bucket.
    pub fn make_uname(&self, obj_name: &str) -> String {
        format!("{}/{}/{}", self.provider, self.name, obj_name)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.provider, self.name)
    }
}

/// Bucket properties relevant to local placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BucketProps {
    /// Erasure coding enabled: objects may carry EC metafiles and slices
    pub ec_enabled: bool,
    /// Number of local replicas to maintain (N-way mirroring, N >= 1)
    pub mirror_copies: u32,
}

impl Default for BucketProps {
    fn default() -> Self {
        Self {
            ec_enabled: false,
            mirror_copies: 1,
        }
    }
}

// ============================================================================
// Cluster membership
// ============================================================================

/// Role of a node in the cluster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Metadata-coordinating gateway
    Proxy,
    /// Data-holding storage target
    Target,
}

// ============================================================================
// Local storage
// ============================================================================

/// Kind of content stored under a mountpath.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Whole objects
    Object,
    /// Erasure-coded slices
    EcSlice,
    /// Erasure-coding metafiles
    EcMeta,
    /// Temporary work files
    Workfile,
}

impl ContentType {
    /// Directory name for this content type under a mountpath.
    pub fn dir_name(self) -> &'static str {
        match self {
            ContentType::Object => "obj",
            ContentType::EcSlice => "ec",
            ContentType::EcMeta => "meta",
            ContentType::Workfile => "work",
        }
    }

    /// Inverse of [`ContentType::dir_name`].
    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name {
            "obj" => Some(ContentType::Object),
            "ec" => Some(ContentType::EcSlice),
            "meta" => Some(ContentType::EcMeta),
            "work" => Some(ContentType::Workfile),
            _ => None,
        }
    }
}

/// Local mountpath topology change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MountpathAction {
    Attach,
    Detach,
    Enable,
    Disable,
}

impl MountpathAction {
    /// Detach and disable take the mountpath out of service once resilvering
    /// has moved its content elsewhere.
    pub fn is_removal(self) -> bool {
        matches!(self, MountpathAction::Detach | MountpathAction::Disable)
    }
}

// ============================================================================
// Extended actions
// ============================================================================

/// Kinds of extended actions (long-running background jobs).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    VariantNames,
    EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum XactKind {
    /// Cluster-wide object redistribution after membership changes
    Rebalance,
    /// Local placement repair after mountpath changes
    Resilver,
    /// N-way local replication of a bucket
    MakeNCopies,
    /// Warm up the in-memory object metadata cache for a bucket
    LoadLomCache,
    /// Primary election in progress
    Election,
}

impl XactKind {
    /// Bucket-scoped kinds run once per bucket; the others once per node.
    pub fn is_bucket_scoped(self) -> bool {
        matches!(self, XactKind::MakeNCopies | XactKind::LoadLomCache)
    }
}

/// Lifecycle state of an extended action.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum XactState {
    Running,
    /// Finished successfully
    Finished,
    /// Finished with an error
    Failed,
    Aborted,
}

impl XactState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, XactState::Running)
    }
}

/// Point-in-time view of an extended action, as returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct XactSnapshot {
    pub id: XactId,
    pub kind: XactKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<Bucket>,
    pub start_time: DateTime<Utc>,
    /// Unset while running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub state: XactState,
    /// Last error, or the abort cause for aborted actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    pub objects: i64,
    pub bytes: i64,
    pub idle: bool,
}

impl XactSnapshot {
    pub fn is_running(&self) -> bool {
        self.state == XactState::Running
    }

    pub fn is_aborted(&self) -> bool {
        self.state == XactState::Aborted
    }
}

/// Filter for extended action queries.
///
/// All set fields must match. A query by ID also returns finished actions,
/// regardless of `only_running`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct XactQuery {
    pub id: Option<XactId>,
    pub kind: Option<XactKind>,
    pub bucket: Option<Bucket>,
    pub only_running: bool,
}

impl XactQuery {
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn by_kind(kind: XactKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn by_bucket(bucket: &Bucket) -> Self {
        Self {
            bucket: Some(bucket.clone()),
            ..Default::default()
        }
    }

    pub fn running(mut self) -> Self {
        self.only_running = true;
        self
    }
}

/// Options for starting an extended action through the job surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StartOptions {
    /// Target replica count (make-n-copies)
    pub copies: Option<u32>,
    /// Free-form tag recorded with the action
    pub tag: Option<String>,
    /// Block until cluster-wide distribution completes (rebalance)
    pub wait: bool,
}

/// Action message accompanying a metadata distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActionMessage {
    pub action: XactKind,
    /// Cluster-wide UUID of the action triggered by this distribution
    pub uuid: String,
}
