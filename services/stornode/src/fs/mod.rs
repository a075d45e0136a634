// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Local storage: mountpaths, on-disk layout, HRW placement and markers.
//!
//! Every mountpath uses the same layout:
//!
//! ```text
//! <mountpath>/<content-type-dir>/<provider>/<bucket>/<object-name>
//! <mountpath>/.markers/<marker-name>
//! ```

pub mod hrw;
pub mod marker;
pub mod mountpath;

pub use hrw::{hrw_mountpath, hrw_target};
pub use marker::{Marker, marker_exists, persist_marker, remove_marker};
pub use mountpath::{Mountpath, MountpathSet, Mountpaths, ParsedFqn};

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use stornode_types::ContentType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no mountpaths available")]
    NoMountpaths,
    #[error("mountpath {0} not found")]
    MountpathNotFound(String),
    #[error("mountpath {0} already exists")]
    MountpathExists(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: out of space ({used_pct}% used)")]
    OutOfSpace { path: PathBuf, used_pct: u32 },
}

impl FsError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        FsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Out of space, either reported by the kernel or by capacity tracking
    pub fn is_oos(&self) -> bool {
        match self {
            FsError::OutOfSpace { .. } => true,
            FsError::Io { source, .. } => is_oos(source),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub fn is_oos(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::StorageFull || err.raw_os_error() == Some(libc::ENOSPC)
}

/// Copy `src` to `dst` through a work file on the destination mountpath,
/// then rename into place. Returns the number of bytes copied.
///
/// `buf` is the caller's scratch buffer; its size determines the I/O chunk.
pub fn copy_file(src: &Path, dst: &Path, work_dir: &Path, buf: &mut [u8]) -> Result<u64, FsError> {
    let mut reader = std::fs::File::open(src).map_err(|e| FsError::io(src, e))?;

    std::fs::create_dir_all(work_dir).map_err(|e| FsError::io(work_dir, e))?;
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;
    }

    let work = work_dir.join(format!("{}.tmp", uuid::Uuid::new_v4()));
    let result = copy_through(&mut reader, &work, buf).and_then(|n| {
        std::fs::rename(&work, dst)
            .map(|_| n)
            .map_err(|e| FsError::io(dst, e))
    });
    if result.is_err() {
        // Work file may or may not exist at this point
        let _ = std::fs::remove_file(&work);
    }
    result
}

fn copy_through(reader: &mut std::fs::File, work: &Path, buf: &mut [u8]) -> Result<u64, FsError> {
    let mut writer = std::fs::File::create(work).map_err(|e| FsError::io(work, e))?;
    let mut total = 0u64;
    loop {
        let n = reader.read(buf).map_err(|e| FsError::io(work, e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .map_err(|e| FsError::io(work, e))?;
        total += n as u64;
    }
    writer.sync_all().map_err(|e| FsError::io(work, e))?;
    Ok(total)
}

/// Relative location of content within a mountpath.
pub fn content_rel_path(ct: ContentType, provider: &str, bucket: &str, name: &str) -> PathBuf {
    Path::new(ct.dir_name()).join(provider).join(bucket).join(name)
}
