// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared setup for the stornode integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use stornode::capacity::StaticCapacity;
use stornode::config::NodeConfig;
use stornode::fs::{Mountpath, hrw_mountpath};
use stornode::jobs::ObjectSender;
use stornode::lom::Lom;
use stornode::xact::CallError;
use stornode::{Collaborators, LoopbackSyncer, TargetNode};
use stornode_types::{Bucket, ContentType, XactQuery, XactSnapshot};
use tempfile::TempDir;
use tokio::sync::watch;

/// Object transport that records what it was asked to send.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl ObjectSender for RecordingSender {
    fn send(&self, target: &str, lom: &Lom) -> Result<(), CallError> {
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), lom.uname()));
        Ok(())
    }
}

pub struct TestNode {
    pub node: Arc<TargetNode>,
    pub sender: Arc<RecordingSender>,
    pub capacity: Arc<StaticCapacity>,
    pub config_tx: watch::Sender<NodeConfig>,
    /// Temp directory for mountpaths and metadata (kept alive for test duration)
    pub dir: TempDir,
}

impl TestNode {
    pub fn new(num_mpaths: usize) -> Self {
        Self::with_config(num_mpaths, |_| {})
    }

    pub fn with_config(num_mpaths: usize, tweak: impl FnOnce(&mut NodeConfig)) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut config = NodeConfig {
            node_id: "t1".to_string(),
            config_dir: dir.path().join("config"),
            mountpaths: (0..num_mpaths).map(|i| dir.path().join(format!("mp{i}"))).collect(),
            busy_retry_ms: 1,
            hrw_retry_ms: 1,
            ..NodeConfig::default()
        };
        tweak(&mut config);

        let (config_tx, config_rx) = watch::channel(config);
        let sender = Arc::new(RecordingSender::default());
        let capacity = Arc::new(StaticCapacity::new(90));
        let syncer = Arc::new(LoopbackSyncer::new());
        let node = Arc::new(
            TargetNode::new(
                config_rx,
                Collaborators {
                    sender: sender.clone(),
                    syncer: syncer.clone(),
                    capacity: Some(capacity.clone()),
                },
            )
            .expect("failed to create node"),
        );
        syncer.bind(&node);

        Self {
            node,
            sender,
            capacity,
            config_tx,
            dir,
        }
    }

    pub fn mountpath(&self, i: usize) -> Mountpath {
        self.node.mountpaths().get().available()[i].clone()
    }

    pub fn extra_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Wait for the xaction to finish and return its final snapshot.
    pub async fn wait(&self, id: &str) -> XactSnapshot {
        let xact = self.node.registry().get(id).expect("xaction not registered");
        xact.base().wait_finished().await;
        let mut snaps = self.node.query(&XactQuery::by_id(id));
        assert_eq!(snaps.len(), 1);
        snaps.remove(0)
    }

    /// Put `count` objects into `bck`, each on a mountpath other than its
    /// HRW one when there is a choice. Returns the object names.
    pub fn put_misplaced(&self, bck: &Bucket, count: usize) -> Vec<String> {
        let set = self.node.mountpaths().get();
        (0..count)
            .map(|i| {
                let name = format!("obj-{i:03}");
                let hrw = hrw_mountpath(&set, &bck.make_uname(&name)).unwrap();
                let mp = set
                    .available()
                    .iter()
                    .find(|mp| **mp != hrw)
                    .unwrap_or(&hrw);
                put_object(mp, bck, &name, name.as_bytes());
                name
            })
            .collect()
    }

    /// Put `count` objects into `bck` on their HRW mountpaths.
    pub fn put_placed(&self, bck: &Bucket, count: usize) -> Vec<String> {
        let set = self.node.mountpaths().get();
        (0..count)
            .map(|i| {
                let name = format!("obj-{i:03}");
                let hrw = hrw_mountpath(&set, &bck.make_uname(&name)).unwrap();
                put_object(&hrw, bck, &name, name.as_bytes());
                name
            })
            .collect()
    }

    /// Number of available mountpaths holding `name`
    pub fn copies(&self, bck: &Bucket, name: &str) -> usize {
        self.node
            .mountpaths()
            .get()
            .available()
            .iter()
            .filter(|mp| mp.make_fqn(ContentType::Object, bck, name).exists())
            .count()
    }

    /// The object is present on its HRW mountpath.
    pub fn at_hrw(&self, bck: &Bucket, name: &str) -> bool {
        let set = self.node.mountpaths().get();
        let hrw = hrw_mountpath(&set, &bck.make_uname(name)).unwrap();
        hrw.make_fqn(ContentType::Object, bck, name).exists()
    }
}

pub fn put_object(mp: &Mountpath, bck: &Bucket, name: &str, data: &[u8]) {
    let fqn = mp.make_fqn(ContentType::Object, bck, name);
    std::fs::create_dir_all(fqn.parent().unwrap()).unwrap();
    std::fs::write(fqn, data).unwrap();
}
