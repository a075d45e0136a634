// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! On-disk markers for interrupted jobs.
//!
//! A marker is an empty file written under every available mountpath. It is
//! created when a job starts and removed when it finishes cleanly, so its
//! presence after a restart means the job was interrupted.

use std::io;

use strum::{AsRefStr, Display};
use tracing::warn;

use super::{FsError, MountpathSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Marker {
    Resilver,
    Rebalance,
    /// Left by the previous run of the node; found at startup when the node
    /// did not shut down cleanly.
    NodeRestarted,
}

/// Write the marker on every available mountpath. Fails only if it could
/// not be written anywhere.
pub fn persist_marker(set: &MountpathSet, marker: Marker) -> Result<(), FsError> {
    if set.is_empty() {
        return Err(FsError::NoMountpaths);
    }
    let mut written = 0;
    let mut last_err = None;
    for mp in set.available() {
        let dir = mp.markers_dir();
        let path = dir.join(marker.as_ref());
        let res = std::fs::create_dir_all(&dir).and_then(|_| std::fs::write(&path, b""));
        match res {
            Ok(()) => written += 1,
            Err(e) => {
                warn!(marker = %marker, path = %path.display(), error = %e, "failed to write marker");
                last_err = Some(FsError::io(&path, e));
            }
        }
    }
    match (written, last_err) {
        (0, Some(e)) => Err(e),
        _ => Ok(()),
    }
}

/// Remove the marker from every mountpath, available or disabled.
pub fn remove_marker(set: &MountpathSet, marker: Marker) -> Result<(), FsError> {
    let mut first_err = None;
    for mp in set.available().iter().chain(set.disabled()) {
        let path = mp.markers_dir().join(marker.as_ref());
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(FsError::io(&path, e));
                }
            }
        }
    }
    first_err.map_or(Ok(()), Err)
}

pub fn marker_exists(set: &MountpathSet, marker: Marker) -> bool {
    set.available()
        .iter()
        .any(|mp| mp.markers_dir().join(marker.as_ref()).exists())
}
