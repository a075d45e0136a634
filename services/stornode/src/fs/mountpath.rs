// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Mountpaths and the node's current mountpath set

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use stornode_types::{Bucket, ContentType};
use tracing::info;

use super::{FsError, content_rel_path};

/// Directory holding marker files under each mountpath root
pub const MARKERS_DIR: &str = ".markers";

/// One independently managed local volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mountpath {
    path: PathBuf,
}

impl Mountpath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stable identity used for HRW weighting.
    pub fn id(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Fully qualified name of content stored on this mountpath.
    pub fn make_fqn(&self, ct: ContentType, bucket: &Bucket, name: &str) -> PathBuf {
        self.path
            .join(content_rel_path(ct, &bucket.provider, &bucket.name, name))
    }

    /// Root of a content type's tree on this mountpath
    pub fn ct_dir(&self, ct: ContentType) -> PathBuf {
        self.path.join(ct.dir_name())
    }

    pub fn bucket_dir(&self, ct: ContentType, bucket: &Bucket) -> PathBuf {
        self.ct_dir(ct).join(&bucket.provider).join(&bucket.name)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.ct_dir(ContentType::Workfile)
    }

    pub fn markers_dir(&self) -> PathBuf {
        self.path.join(MARKERS_DIR)
    }
}

impl fmt::Display for Mountpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mp[{}]", self.path.display())
    }
}

/// Immutable snapshot of the node's mountpaths.
#[derive(Debug, Clone, Default)]
pub struct MountpathSet {
    available: Vec<Mountpath>,
    disabled: Vec<Mountpath>,
}

impl MountpathSet {
    pub fn available(&self) -> &[Mountpath] {
        &self.available
    }

    pub fn disabled(&self) -> &[Mountpath] {
        &self.disabled
    }

    pub fn len(&self) -> usize {
        self.available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.available.iter().any(|mp| mp.path() == path)
    }

    pub fn get(&self, path: &Path) -> Option<&Mountpath> {
        self.available.iter().find(|mp| mp.path() == path)
    }

    /// Find the mountpath that holds `fqn`, along with the path relative to it.
    pub fn resolve<'a>(&self, fqn: &'a Path) -> Option<(&Mountpath, &'a Path)> {
        self.available
            .iter()
            .chain(self.disabled.iter())
            .find_map(|mp| fqn.strip_prefix(mp.path()).ok().map(|rel| (mp, rel)))
    }

    /// Split a fully qualified name into its parts.
    pub fn parse_fqn(&self, fqn: &Path) -> Option<ParsedFqn> {
        let (mp, rel) = self.resolve(fqn)?;
        let mut parts = rel.iter();
        let ct = ContentType::from_dir_name(parts.next()?.to_str()?)?;
        let provider = parts.next()?.to_str()?;
        let bucket = parts.next()?.to_str()?;
        let name: PathBuf = parts.collect();
        let name = name.to_str()?;
        if name.is_empty() {
            return None;
        }
        Some(ParsedFqn {
            mountpath: mp.clone(),
            content_type: ct,
            bucket: Bucket {
                provider: provider.to_string(),
                name: bucket.to_string(),
            },
            obj_name: name.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFqn {
    pub mountpath: Mountpath,
    pub content_type: ContentType,
    pub bucket: Bucket,
    pub obj_name: String,
}

/// Holder of the current [`MountpathSet`].
///
/// Readers clone out a consistent snapshot; topology changes build a new set
/// and swap it in.
pub struct Mountpaths {
    current: RwLock<Arc<MountpathSet>>,
}

impl Mountpaths {
    /// Create the holder, ensuring each mountpath root exists.
    pub fn new(paths: &[PathBuf]) -> Result<Self, FsError> {
        let mut available = Vec::with_capacity(paths.len());
        for path in paths {
            std::fs::create_dir_all(path).map_err(|e| FsError::io(path, e))?;
            available.push(Mountpath::new(path.clone()));
        }
        available.sort();
        available.dedup();
        Ok(Self {
            current: RwLock::new(Arc::new(MountpathSet {
                available,
                disabled: Vec::new(),
            })),
        })
    }

    pub fn get(&self) -> Arc<MountpathSet> {
        match self.current.read() {
            Ok(cur) => Arc::clone(&cur),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn attach(&self, path: &Path) -> Result<Mountpath, FsError> {
        std::fs::create_dir_all(path).map_err(|e| FsError::io(path, e))?;
        let mp = Mountpath::new(path);
        self.update(|set| {
            if set.contains(path) || set.disabled.iter().any(|d| d.path() == path) {
                return Err(FsError::MountpathExists(path.display().to_string()));
            }
            set.available.push(mp.clone());
            set.available.sort();
            Ok(())
        })?;
        info!(mountpath = %mp, "attached mountpath");
        Ok(mp)
    }

    pub fn detach(&self, path: &Path) -> Result<Mountpath, FsError> {
        let mut removed = None;
        self.update(|set| {
            let before = set.available.len() + set.disabled.len();
            set.available.retain(|mp| mp.path() != path);
            set.disabled.retain(|mp| mp.path() != path);
            if before == set.available.len() + set.disabled.len() {
                return Err(FsError::MountpathNotFound(path.display().to_string()));
            }
            removed = Some(Mountpath::new(path));
            Ok(())
        })?;
        info!(path = %path.display(), "detached mountpath");
        removed.ok_or_else(|| FsError::MountpathNotFound(path.display().to_string()))
    }

    pub fn disable(&self, path: &Path) -> Result<Mountpath, FsError> {
        let mut disabled = None;
        self.update(|set| {
            let idx = set
                .available
                .iter()
                .position(|mp| mp.path() == path)
                .ok_or_else(|| FsError::MountpathNotFound(path.display().to_string()))?;
            let mp = set.available.remove(idx);
            set.disabled.push(mp.clone());
            disabled = Some(mp);
            Ok(())
        })?;
        disabled.ok_or_else(|| FsError::MountpathNotFound(path.display().to_string()))
    }

    pub fn enable(&self, path: &Path) -> Result<Mountpath, FsError> {
        let mut enabled = None;
        self.update(|set| {
            let idx = set
                .disabled
                .iter()
                .position(|mp| mp.path() == path)
                .ok_or_else(|| FsError::MountpathNotFound(path.display().to_string()))?;
            let mp = set.disabled.remove(idx);
            set.available.push(mp.clone());
            set.available.sort();
            enabled = Some(mp);
            Ok(())
        })?;
        enabled.ok_or_else(|| FsError::MountpathNotFound(path.display().to_string()))
    }

    fn update<F>(&self, f: F) -> Result<(), FsError>
    where
        F: FnOnce(&mut MountpathSet) -> Result<(), FsError>,
    {
        let mut cur = match self.current.write() {
            Ok(cur) => cur,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = MountpathSet::clone(&cur);
        f(&mut next)?;
        *cur = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn attach_detach_disable_enable() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let mpaths = Mountpaths::new(&[a.clone()]).unwrap();
        let before = mpaths.get();

        mpaths.attach(&b).unwrap();
        assert_eq!(mpaths.get().len(), 2);
        // Earlier snapshots are unaffected
        assert_eq!(before.len(), 1);
        assert!(matches!(mpaths.attach(&b), Err(FsError::MountpathExists(_))));

        mpaths.disable(&a).unwrap();
        let set = mpaths.get();
        assert_eq!(set.available().len(), 1);
        assert_eq!(set.disabled().len(), 1);

        mpaths.enable(&a).unwrap();
        mpaths.detach(&b).unwrap();
        let set = mpaths.get();
        assert_eq!(set.available(), &[Mountpath::new(a)]);
        assert!(matches!(mpaths.detach(&b), Err(FsError::MountpathNotFound(_))));
    }

    #[test]
    fn fqn_layout_and_resolve() {
        let dir = tempdir().unwrap();
        let mpaths = Mountpaths::new(&[dir.path().join("m1")]).unwrap();
        let set = mpaths.get();
        let mp = &set.available()[0];
        let bck = Bucket::ais("b1");

        let fqn = mp.make_fqn(ContentType::Object, &bck, "dir/obj");
        assert!(fqn.ends_with("obj/ais/b1/dir/obj"));

        let (found, rel) = set.resolve(&fqn).unwrap();
        assert_eq!(found, mp);
        assert_eq!(rel, Path::new("obj/ais/b1/dir/obj"));

        let parsed = set.parse_fqn(&fqn).unwrap();
        assert_eq!(parsed.content_type, ContentType::Object);
        assert_eq!(parsed.bucket, bck);
        assert_eq!(parsed.obj_name, "dir/obj");
        assert!(set.parse_fqn(&mp.path().join(".markers/resilver")).is_none());
    }
}
