// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Local objects: placement, replicas, per-object locks and the attribute
//! cache.
//!
//! A replica of an object is a file at the same relative path on another
//! mountpath. The copy on the object's HRW mountpath is the primary one.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use stornode_types::{Bucket, ContentType};

use crate::fs::{self, FsError, Mountpath, MountpathSet, hrw_mountpath};

/// Local object metadata
#[derive(Debug, Clone)]
pub struct Lom {
    bucket: Bucket,
    name: String,
    mountpath: Mountpath,
    fqn: PathBuf,
    size: u64,
    /// Available mountpaths holding a replica, this one included
    copies: Vec<Mountpath>,
    hrw: Option<Mountpath>,
}

impl Lom {
    pub fn new(bucket: &Bucket, name: &str, mountpath: &Mountpath) -> Self {
        Self {
            fqn: mountpath.make_fqn(ContentType::Object, bucket, name),
            bucket: bucket.clone(),
            name: name.to_string(),
            mountpath: mountpath.clone(),
            size: 0,
            copies: Vec::new(),
            hrw: None,
        }
    }

    /// Object located by its fully qualified name; None for non-objects.
    pub fn from_fqn(set: &MountpathSet, fqn: &Path) -> Option<Self> {
        let parsed = set.parse_fqn(fqn)?;
        if parsed.content_type != ContentType::Object {
            return None;
        }
        Some(Self {
            bucket: parsed.bucket,
            name: parsed.obj_name,
            mountpath: parsed.mountpath,
            fqn: fqn.to_path_buf(),
            size: 0,
            copies: Vec::new(),
            hrw: None,
        })
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uname(&self) -> String {
        self.bucket.make_uname(&self.name)
    }

    pub fn fqn(&self) -> &Path {
        &self.fqn
    }

    pub fn mountpath(&self) -> &Mountpath {
        &self.mountpath
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn copies(&self) -> &[Mountpath] {
        &self.copies
    }

    pub fn num_copies(&self) -> usize {
        self.copies.len()
    }

    pub fn hrw_mountpath(&self) -> Option<&Mountpath> {
        self.hrw.as_ref()
    }

    /// Read size, locate replicas and compute placement against `set`.
    pub fn load(&mut self, set: &MountpathSet) -> Result<(), FsError> {
        let md = std::fs::metadata(&self.fqn).map_err(|e| FsError::io(&self.fqn, e))?;
        self.size = md.len();
        self.copies = set
            .available()
            .iter()
            .filter(|mp| {
                **mp == self.mountpath
                    || mp
                        .make_fqn(ContentType::Object, &self.bucket, &self.name)
                        .exists()
            })
            .cloned()
            .collect();
        self.hrw = hrw_mountpath(set, &self.uname()).ok();
        Ok(())
    }

    pub fn is_hrw(&self) -> bool {
        self.hrw.as_ref() == Some(&self.mountpath)
    }

    /// A replica whose primary exists elsewhere
    pub fn is_copy(&self) -> bool {
        !self.is_hrw()
            && self
                .hrw
                .as_ref()
                .is_some_and(|hrw| self.copies.contains(hrw))
    }

    /// Next placement fix-up: the HRW mountpath if it lacks the object
    /// (`true`), otherwise a mountpath for a missing replica (`false`).
    /// None when placement is already correct.
    pub fn to_mpath(&self, set: &MountpathSet, target_copies: usize) -> Option<(Mountpath, bool)> {
        let hrw = hrw_mountpath(set, &self.uname()).ok()?;
        if !self.copies.contains(&hrw) {
            return Some((hrw, true));
        }
        if self.copies.len() >= target_copies {
            return None;
        }
        set.available()
            .iter()
            .find(|mp| !self.copies.contains(mp))
            .map(|mp| (mp.clone(), false))
    }

    /// Copy this object to `dst`. Returns bytes copied.
    pub fn copy_to(&mut self, dst: &Mountpath, buf: &mut [u8]) -> Result<u64, FsError> {
        let dst_fqn = dst.make_fqn(ContentType::Object, &self.bucket, &self.name);
        let n = fs::copy_file(&self.fqn, &dst_fqn, &dst.work_dir(), buf)?;
        if !self.copies.contains(dst) {
            self.copies.push(dst.clone());
        }
        Ok(n)
    }

    /// Remove the replica on `mp`. Missing replicas are not an error.
    pub fn del_copy(&mut self, mp: &Mountpath) -> Result<(), FsError> {
        let fqn = mp.make_fqn(ContentType::Object, &self.bucket, &self.name);
        match std::fs::remove_file(&fqn) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(FsError::io(&fqn, e)),
        }
        self.copies.retain(|c| c != mp);
        Ok(())
    }

    /// Add replicas on mountpaths that lack one until there are `n`.
    /// Returns bytes copied.
    pub fn add_copies(
        &mut self,
        set: &MountpathSet,
        n: usize,
        buf: &mut [u8],
    ) -> Result<u64, FsError> {
        let mut total = 0;
        while self.copies.len() < n {
            let Some(dst) = set
                .available()
                .iter()
                .find(|mp| !self.copies.contains(mp))
                .cloned()
            else {
                break;
            };
            total += self.copy_to(&dst, buf)?;
        }
        Ok(total)
    }

    /// Delete replicas other than this one, last found first, until there
    /// are `n`. Returns bytes removed.
    pub fn del_copies(&mut self, n: usize) -> Result<u64, FsError> {
        let mut total = 0;
        while self.copies.len() > n.max(1) {
            let Some(victim) = self
                .copies
                .iter()
                .rev()
                .find(|mp| **mp != self.mountpath)
                .cloned()
            else {
                break;
            };
            self.del_copy(&victim)?;
            total += self.size;
        }
        Ok(total)
    }
}

// ============================================================================
// Per-object locks
// ============================================================================

#[derive(Default)]
struct LockState {
    exclusive: bool,
    readers: usize,
}

/// Per-object read/write locks keyed by uname.
#[derive(Default)]
pub struct NameLocker {
    locks: Mutex<HashMap<String, LockState>>,
    released: Condvar,
}

impl NameLocker {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, LockState>> {
        match self.locks.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn acquirable(state: Option<&LockState>, exclusive: bool) -> bool {
        match state {
            None => true,
            Some(s) if exclusive => !s.exclusive && s.readers == 0,
            Some(s) => !s.exclusive,
        }
    }

    fn take(table: &mut HashMap<String, LockState>, uname: &str, exclusive: bool) {
        let state = table.entry(uname.to_string()).or_default();
        if exclusive {
            state.exclusive = true;
        } else {
            state.readers += 1;
        }
    }

    /// Non-blocking lock attempt.
    pub fn try_lock(&self, uname: &str, exclusive: bool) -> Option<NameLockGuard<'_>> {
        let mut table = self.table();
        if !Self::acquirable(table.get(uname), exclusive) {
            return None;
        }
        Self::take(&mut table, uname, exclusive);
        Some(NameLockGuard {
            locker: self,
            uname: uname.to_string(),
            exclusive,
        })
    }

    /// Blocking lock with an upper bound on the wait.
    pub fn lock_timeout(
        &self,
        uname: &str,
        exclusive: bool,
        timeout: Duration,
    ) -> Option<NameLockGuard<'_>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut table = self.table();
        while !Self::acquirable(table.get(uname), exclusive) {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            if left.is_zero() {
                return None;
            }
            table = match self.released.wait_timeout(table, left) {
                Ok((t, _)) => t,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Self::take(&mut table, uname, exclusive);
        Some(NameLockGuard {
            locker: self,
            uname: uname.to_string(),
            exclusive,
        })
    }

    fn unlock(&self, uname: &str, exclusive: bool) {
        let mut table = self.table();
        if let Some(state) = table.get_mut(uname) {
            if exclusive {
                state.exclusive = false;
            } else {
                state.readers = state.readers.saturating_sub(1);
            }
            if !state.exclusive && state.readers == 0 {
                table.remove(uname);
            }
        }
        drop(table);
        self.released.notify_all();
    }
}

/// Held object lock; unlocks on drop.
pub struct NameLockGuard<'a> {
    locker: &'a NameLocker,
    uname: String,
    exclusive: bool,
}

impl Drop for NameLockGuard<'_> {
    fn drop(&mut self) {
        self.locker.unlock(&self.uname, self.exclusive);
    }
}

// ============================================================================
// Attribute cache
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLom {
    pub size: u64,
    pub mountpath: PathBuf,
    pub num_copies: usize,
}

/// In-memory object attributes keyed by uname.
#[derive(Default)]
pub struct LomCache {
    entries: Mutex<HashMap<String, CachedLom>>,
}

impl LomCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, CachedLom>> {
        match self.entries.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn put(&self, lom: &Lom) {
        self.table().insert(
            lom.uname(),
            CachedLom {
                size: lom.size(),
                mountpath: lom.mountpath().path().to_path_buf(),
                num_copies: lom.num_copies(),
            },
        );
    }

    pub fn get(&self, uname: &str) -> Option<CachedLom> {
        self.table().get(uname).cloned()
    }

    pub fn uncache(&self, uname: &str) -> bool {
        self.table().remove(uname).is_some()
    }

    /// Drop all entries of a bucket.
    pub fn evict_bucket(&self, bucket: &Bucket) {
        let prefix = bucket.make_uname("");
        self.table().retain(|uname, _| !uname.starts_with(&prefix));
    }

    /// Drop everything; cached placement is stale after a mountpath change.
    pub fn clear(&self) {
        self.table().clear();
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
