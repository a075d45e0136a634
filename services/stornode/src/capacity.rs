// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Mountpath capacity tracking
//!
//! Jobs only read capacity state. Keeping it current is the tracker's job.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::fs::{FsError, Mountpaths};

pub trait CapacityTracker: Send + Sync {
    /// Err(OutOfSpace) when any available mountpath is at or above the high
    /// watermark.
    fn check(&self) -> Result<(), FsError>;

    /// Applied on config reload
    fn set_high_watermark(&self, pct: u32);

    fn is_oos(&self) -> bool {
        self.check().is_err_and(|e| e.is_oos())
    }
}

/// Capacity from `statvfs(2)` on each mountpath.
pub struct StatvfsCapacity {
    mountpaths: Arc<Mountpaths>,
    high_watermark_pct: AtomicU32,
}

impl StatvfsCapacity {
    pub fn new(mountpaths: Arc<Mountpaths>, high_watermark_pct: u32) -> Self {
        Self {
            mountpaths,
            high_watermark_pct: AtomicU32::new(high_watermark_pct),
        }
    }
}

impl CapacityTracker for StatvfsCapacity {
    fn set_high_watermark(&self, pct: u32) {
        self.high_watermark_pct.store(pct, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), FsError> {
        let hwm = self.high_watermark_pct.load(Ordering::Relaxed);
        for mp in self.mountpaths.get().available() {
            let used_pct = used_pct(mp.path())?;
            debug!(mountpath = %mp, used_pct, "capacity");
            if used_pct >= hwm {
                return Err(FsError::OutOfSpace {
                    path: mp.path().to_path_buf(),
                    used_pct,
                });
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn used_pct(path: &Path) -> Result<u32, FsError> {
    let st = nix::sys::statvfs::statvfs(path).map_err(|e| FsError::io(path, e.into()))?;
    let total = st.blocks() as u64;
    if total == 0 {
        return Ok(0);
    }
    let used = total.saturating_sub(st.blocks_available() as u64);
    Ok(((used * 100) / total) as u32)
}

#[cfg(not(unix))]
fn used_pct(_path: &Path) -> Result<u32, FsError> {
    Ok(0)
}

/// Fixed, settable capacity state.
#[derive(Default)]
pub struct StaticCapacity {
    used_pct: AtomicU32,
    high_watermark_pct: AtomicU32,
}

impl StaticCapacity {
    pub fn new(high_watermark_pct: u32) -> Self {
        Self {
            used_pct: AtomicU32::new(0),
            high_watermark_pct: AtomicU32::new(high_watermark_pct),
        }
    }

    pub fn set_used(&self, pct: u32) {
        self.used_pct.store(pct, Ordering::Relaxed);
    }
}

impl CapacityTracker for StaticCapacity {
    fn set_high_watermark(&self, pct: u32) {
        self.high_watermark_pct.store(pct, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), FsError> {
        let used_pct = self.used_pct.load(Ordering::Relaxed);
        let hwm = self.high_watermark_pct.load(Ordering::Relaxed);
        if hwm > 0 && used_pct >= hwm {
            return Err(FsError::OutOfSpace {
                path: Default::default(),
                used_pct,
            });
        }
        Ok(())
    }
}
