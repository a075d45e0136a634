// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Highest-random-weight placement

use sha2::{Digest, Sha256};

use super::{FsError, Mountpath, MountpathSet};

fn weight(id: &str, uname: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update([0u8]);
    hasher.update(uname.as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Pick the id with the highest weight for `uname`. Ties go to the first id
/// in iteration order.
fn pick<'a, I>(uname: &str, ids: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&str, u64)> = None;
    for id in ids {
        let w = weight(id, uname);
        match best {
            Some((_, bw)) if bw >= w => {}
            _ => best = Some((id, w)),
        }
    }
    best.map(|(id, _)| id)
}

/// Canonical mountpath for an object among the available mountpaths.
pub fn hrw_mountpath(set: &MountpathSet, uname: &str) -> Result<Mountpath, FsError> {
    let ids: Vec<String> = set.available().iter().map(Mountpath::id).collect();
    let winner = pick(uname, ids.iter().map(String::as_str)).ok_or(FsError::NoMountpaths)?;
    set.available()
        .iter()
        .find(|mp| mp.id() == winner)
        .cloned()
        .ok_or(FsError::NoMountpaths)
}

/// Canonical node for an object among the given node ids.
pub fn hrw_target<'a, I>(uname: &str, node_ids: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    pick(uname, node_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Mountpaths;
    use tempfile::tempdir;

    #[test]
    fn placement_is_deterministic_and_spread() {
        let dir = tempdir().unwrap();
        let paths: Vec<_> = (0..4).map(|i| dir.path().join(format!("mp{i}"))).collect();
        let mpaths = Mountpaths::new(&paths).unwrap();
        let set = mpaths.get();

        let mut hits = std::collections::HashMap::new();
        for i in 0..400 {
            let uname = format!("ais/b/obj-{i}");
            let a = hrw_mountpath(&set, &uname).unwrap();
            let b = hrw_mountpath(&set, &uname).unwrap();
            assert_eq!(a, b);
            *hits.entry(a).or_insert(0) += 1;
        }
        // Every mountpath gets a share
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn removing_a_mountpath_only_moves_its_objects() {
        let dir = tempdir().unwrap();
        let paths: Vec<_> = (0..3).map(|i| dir.path().join(format!("mp{i}"))).collect();
        let mpaths = Mountpaths::new(&paths).unwrap();
        let before = mpaths.get();
        mpaths.detach(&paths[2]).unwrap();
        let after = mpaths.get();

        for i in 0..200 {
            let uname = format!("ais/b/obj-{i}");
            let old = hrw_mountpath(&before, &uname).unwrap();
            let new = hrw_mountpath(&after, &uname).unwrap();
            if old.path() != paths[2] {
                assert_eq!(old, new);
            }
        }
    }

    #[test]
    fn empty_set_has_no_placement() {
        let set = MountpathSet::default();
        assert!(matches!(
            hrw_mountpath(&set, "ais/b/o"),
            Err(FsError::NoMountpaths)
        ));
        assert_eq!(hrw_target("ais/b/o", std::iter::empty()), None);
    }
}
