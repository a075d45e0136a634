// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Cluster membership map

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use stornode_types::{NodeId, NodeKind};

use super::Versioned;
use crate::fs::hrw_target;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: NodeKind,
    /// In maintenance: still a member, but not an HRW candidate
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub maintenance: bool,
}

impl NodeInfo {
    pub fn target(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::Target,
            maintenance: false,
        }
    }

    pub fn proxy(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: NodeKind::Proxy,
            maintenance: false,
        }
    }

    pub fn is_target(&self) -> bool {
        self.kind == NodeKind::Target
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMap {
    pub version: i64,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, NodeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<NodeId>,
}

impl Versioned for ClusterMap {
    const TAG: &'static str = "smap";
    const FILE_NAME: &'static str = ".ais.smap";

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

impl ClusterMap {
    /// Returns false if the node was already a member.
    pub fn add_node(&mut self, node: NodeInfo) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        self.nodes.insert(node.id.clone(), node);
        true
    }

    pub fn remove_node(&mut self, id: &str) -> Option<NodeInfo> {
        if self.primary.as_deref() == Some(id) {
            self.primary = None;
        }
        self.nodes.remove(id)
    }

    pub fn set_maintenance(&mut self, id: &str, on: bool) -> bool {
        match self.nodes.get_mut(id) {
            Some(n) => {
                n.maintenance = on;
                true
            }
            None => false,
        }
    }

    /// Targets eligible for placement
    pub fn active_targets(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes
            .values()
            .filter(|n| n.is_target() && !n.maintenance)
    }

    pub fn count_active_targets(&self) -> usize {
        self.active_targets().count()
    }

    /// The target an object belongs to.
    pub fn hrw_target(&self, uname: &str) -> Option<&str> {
        hrw_target(uname, self.active_targets().map(|n| n.id.as_str()))
    }
}

impl fmt::Display for ClusterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let targets = self.nodes.values().filter(|n| n.is_target()).count();
        write!(
            f,
            "Smap v{}[t={}, p={}]",
            self.version,
            targets,
            self.nodes.len() - targets
        )
    }
}
