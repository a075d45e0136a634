// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Versioned cluster metadata and its in-process owners.
//!
//! Each metadata document (cluster map, bucket metadata, rebalance metadata)
//! has exactly one [`MetadataOwner`]. Readers get an immutable snapshot with
//! [`MetadataOwner::get`] and never block. Writers go through
//! [`MetadataOwner::modify`], which clones the current snapshot, applies the
//! change to the clone, persists it, and only then publishes it. Distribution
//! to the rest of the cluster is a separate, explicit step taken by the
//! caller with the returned [`Modified`] value.

pub mod bmd;
pub mod cluster_map;
pub mod rmd;
pub mod sync;

pub use bmd::BucketMd;
pub use cluster_map::{ClusterMap, NodeInfo};
pub use rmd::{RebalanceMd, RmdModified, RmdOwner, SyncRequest, parse_reb_id, reb_id};
pub use sync::{MetaSyncer, Revs, RevsPair, SyncHandle, SyncResult};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::metrics;

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("failed to persist {tag} to {path}: {source}")]
    Persist {
        tag: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to load {tag} from {path}: {reason}")]
    Load {
        tag: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("{tag} modification rejected: {reason}")]
    Modify { tag: &'static str, reason: String },

    #[error("{tag} distribution failed: {reason}")]
    Sync { tag: &'static str, reason: String },
}

impl MetaError {
    pub fn modify(tag: &'static str, reason: impl Into<String>) -> Self {
        MetaError::Modify {
            tag,
            reason: reason.into(),
        }
    }
}

/// A cluster-wide metadata document with a monotonically increasing version.
pub trait Versioned:
    Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Short name used in logs, metrics and sync messages
    const TAG: &'static str;
    /// File name under the node's config directory
    const FILE_NAME: &'static str;

    fn version(&self) -> i64;
    fn set_version(&mut self, version: i64);

    /// Clear fields that only describe a single modification.
    fn reset_transient(&mut self) {}
}

/// Result of a successful modify cycle.
#[derive(Debug)]
pub struct Modified<T> {
    /// Snapshot the modification was based on
    pub prev: Arc<T>,
    /// Newly published snapshot
    pub cur: Arc<T>,
}

/// The single in-process owner of one metadata document.
pub struct MetadataOwner<T: Versioned> {
    cur: RwLock<Arc<T>>,
    path: PathBuf,
    modify_lock: Mutex<()>,
}

impl<T: Versioned> MetadataOwner<T> {
    /// Create an owner holding the empty, version 0 document.
    pub fn new(config_dir: &Path) -> Self {
        Self {
            cur: RwLock::new(Arc::new(T::default())),
            path: config_dir.join(T::FILE_NAME),
            modify_lock: Mutex::new(()),
        }
    }

    /// Current snapshot.
    pub fn get(&self) -> Arc<T> {
        match self.cur.read() {
            Ok(cur) => Arc::clone(&cur),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn version(&self) -> i64 {
        self.get().version()
    }

    fn publish(&self, next: Arc<T>) {
        match self.cur.write() {
            Ok(mut cur) => *cur = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last persisted snapshot, if any.
    ///
    /// A missing file leaves the empty document in place. Any other failure
    /// is logged and also leaves the empty document: metadata can be
    /// re-synced from the cluster. Returns whether a snapshot was loaded.
    pub async fn load(&self) -> bool {
        match self.try_load().await {
            Ok(Some(loaded)) => {
                info!(tag = T::TAG, version = loaded.version(), path = %self.path.display(), "loaded metadata");
                self.publish(Arc::new(loaded));
                true
            }
            Ok(None) => {
                debug!(tag = T::TAG, path = %self.path.display(), "no persisted metadata");
                false
            }
            Err(e) => {
                error!(tag = T::TAG, error = %e, "failed to load metadata, starting empty");
                false
            }
        }
    }

    async fn try_load(&self) -> Result<Option<T>, MetaError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MetaError::Load {
                    tag: T::TAG,
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
            }
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| MetaError::Load {
                tag: T::TAG,
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Exclusive clone, mutate, persist, publish cycle.
    ///
    /// `pre` runs on a private clone with transient fields already reset.
    /// The clone is published with version `prev + 1` only after it has been
    /// persisted. If `pre` or the persist fails, the current snapshot is
    /// untouched.
    pub async fn modify<F>(&self, pre: F) -> Result<Modified<T>, MetaError>
    where
        F: FnOnce(&mut T) -> Result<(), MetaError>,
    {
        let _guard = self.modify_lock.lock().await;

        let prev = self.get();
        let mut clone = T::clone(&prev);
        clone.reset_transient();
        pre(&mut clone)?;
        clone.set_version(prev.version() + 1);

        persist(&self.path, T::TAG, &clone).await?;

        let cur = Arc::new(clone);
        self.publish(Arc::clone(&cur));
        metrics::record_meta_version(T::TAG, cur.version());
        debug!(tag = T::TAG, from = prev.version(), to = cur.version(), "metadata modified");
        Ok(Modified { prev, cur })
    }

    /// Install a snapshot received from the cluster.
    ///
    /// Versions not newer than the current one are ignored (Ok(false)).
    pub async fn install(&self, newer: T) -> Result<bool, MetaError> {
        let _guard = self.modify_lock.lock().await;

        let have = self.version();
        if newer.version() <= have {
            debug!(tag = T::TAG, have, got = newer.version(), "ignoring stale metadata");
            return Ok(false);
        }
        persist(&self.path, T::TAG, &newer).await?;
        metrics::record_meta_version(T::TAG, newer.version());
        self.publish(Arc::new(newer));
        Ok(true)
    }
}

/// Write `value` as JSON to a temporary file next to `path`, then rename.
async fn persist<T: Serialize>(path: &Path, tag: &'static str, value: &T) -> Result<(), MetaError> {
    let perr = |source: io::Error| MetaError::Persist {
        tag,
        path: path.to_path_buf(),
        source,
    };

    let data = serde_json::to_vec_pretty(value).map_err(|e| perr(io::Error::other(e)))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(perr)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    if let Err(e) = tokio::fs::write(&tmp, &data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(perr(e));
    }
    tokio::fs::rename(&tmp, path).await.map_err(perr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
    struct Doc {
        version: i64,
        items: Vec<String>,
        #[serde(skip)]
        scratch: Option<String>,
    }

    impl Versioned for Doc {
        const TAG: &'static str = "doc";
        const FILE_NAME: &'static str = ".test.doc";

        fn version(&self) -> i64 {
            self.version
        }

        fn set_version(&mut self, version: i64) {
            self.version = version;
        }

        fn reset_transient(&mut self) {
            self.scratch = None;
        }
    }

    #[tokio::test]
    async fn modify_increments_persists_and_publishes() {
        let dir = tempdir().unwrap();
        let owner: MetadataOwner<Doc> = MetadataOwner::new(dir.path());
        assert_eq!(owner.version(), 0);

        let before = owner.get();
        let m = owner
            .modify(|d| {
                d.items.push("a".to_string());
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(m.prev.version, 0);
        assert_eq!(m.cur.version, 1);
        // Snapshots taken earlier never change
        assert!(before.items.is_empty());
        assert_eq!(owner.get().items, vec!["a".to_string()]);

        let reloaded: MetadataOwner<Doc> = MetadataOwner::new(dir.path());
        assert!(reloaded.load().await);
        assert_eq!(*reloaded.get(), *owner.get());
    }

    #[tokio::test]
    async fn rejected_modification_changes_nothing() {
        let dir = tempdir().unwrap();
        let owner: MetadataOwner<Doc> = MetadataOwner::new(dir.path());
        let err = owner
            .modify(|d| {
                d.items.push("x".to_string());
                Err(MetaError::modify(Doc::TAG, "no"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MetaError::Modify { .. }));
        assert_eq!(owner.version(), 0);
        assert!(owner.get().items.is_empty());
    }

    #[tokio::test]
    async fn load_tolerates_missing_and_corrupt_files() {
        let dir = tempdir().unwrap();
        let owner: MetadataOwner<Doc> = MetadataOwner::new(dir.path());
        assert!(!owner.load().await);

        std::fs::write(dir.path().join(Doc::FILE_NAME), b"{not json").unwrap();
        assert!(!owner.load().await);
        assert_eq!(owner.version(), 0);
    }

    #[tokio::test]
    async fn install_ignores_stale_versions() {
        let dir = tempdir().unwrap();
        let owner: MetadataOwner<Doc> = MetadataOwner::new(dir.path());
        owner.modify(|_| Ok(())).await.unwrap();
        owner.modify(|_| Ok(())).await.unwrap();

        let stale = Doc {
            version: 2,
            ..Default::default()
        };
        assert!(!owner.install(stale).await.unwrap());

        let newer = Doc {
            version: 9,
            items: vec!["n".to_string()],
            scratch: None,
        };
        assert!(owner.install(newer).await.unwrap());
        assert_eq!(owner.version(), 9);
    }
}
