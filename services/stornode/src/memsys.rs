// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Scratch buffers for object copies.
//!
//! A [`MemSys`] hands out size-classed [`Slab`]s. Each jogger worker checks
//! out one [`SlabBuf`] for its lifetime; dropping the buffer returns it to
//! its slab for the next worker.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use thiserror::Error;

pub const PAGE_SIZE: usize = 4 * 1024;
pub const MAX_PAGE_SLAB_SIZE: usize = 128 * 1024;

/// Slab size classes, smallest first
const SIZE_CLASSES: [usize; 6] = [
    PAGE_SIZE,
    8 * 1024,
    16 * 1024,
    32 * 1024,
    64 * 1024,
    MAX_PAGE_SLAB_SIZE,
];

/// Free buffers kept per slab; extra returns are dropped
const MAX_FREE_PER_SLAB: usize = 64;

#[derive(Error, Debug)]
pub enum MemError {
    #[error("no slab for buffer size {0}")]
    InvalidSize(usize),
}

/// Size-classed slab directory
pub struct MemSys {
    slabs: Vec<Arc<Slab>>,
}

impl Default for MemSys {
    fn default() -> Self {
        Self::new()
    }
}

impl MemSys {
    pub fn new() -> Self {
        Self {
            slabs: SIZE_CLASSES
                .iter()
                .map(|&size| Arc::new(Slab::new(size)))
                .collect(),
        }
    }

    /// The smallest slab whose buffers hold at least `size` bytes.
    pub fn get_slab(&self, size: usize) -> Result<Arc<Slab>, MemError> {
        if size == 0 {
            return Err(MemError::InvalidSize(size));
        }
        self.slabs
            .iter()
            .find(|s| s.buf_size() >= size)
            .cloned()
            .ok_or(MemError::InvalidSize(size))
    }
}

/// Pool of equally sized buffers.
pub struct Slab {
    buf_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl Slab {
    pub fn new(buf_size: usize) -> Self {
        Self {
            buf_size,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn alloc(self: &Arc<Self>) -> SlabBuf {
        let reused = self.free.lock().ok().and_then(|mut free| free.pop());
        let buf = reused.unwrap_or_else(|| vec![0u8; self.buf_size]);
        SlabBuf {
            buf,
            slab: Arc::clone(self),
        }
    }

    pub fn num_free(&self) -> usize {
        self.free.lock().map(|f| f.len()).unwrap_or_default()
    }

    fn release(&self, buf: Vec<u8>) {
        if let Ok(mut free) = self.free.lock()
            && free.len() < MAX_FREE_PER_SLAB
        {
            free.push(buf);
        }
    }
}

/// A checked-out buffer; returned to its slab on drop.
pub struct SlabBuf {
    buf: Vec<u8>,
    slab: Arc<Slab>,
}

impl Deref for SlabBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for SlabBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for SlabBuf {
    fn drop(&mut self) {
        self.slab.release(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, PAGE_SIZE)]
    #[test_case(PAGE_SIZE, PAGE_SIZE)]
    #[test_case(PAGE_SIZE + 1, 8 * 1024)]
    #[test_case(MAX_PAGE_SLAB_SIZE, MAX_PAGE_SLAB_SIZE)]
    fn size_classes(want: usize, got: usize) {
        let mm = MemSys::new();
        assert_eq!(mm.get_slab(want).unwrap().buf_size(), got);
    }

    #[test]
    fn oversize_is_rejected() {
        let mm = MemSys::new();
        assert!(mm.get_slab(MAX_PAGE_SLAB_SIZE + 1).is_err());
        assert!(mm.get_slab(0).is_err());
    }

    #[test]
    fn buffers_are_returned_on_drop() {
        let slab = Arc::new(Slab::new(PAGE_SIZE));
        {
            let mut a = slab.alloc();
            let _b = slab.alloc();
            a[0] = 1;
            assert_eq!(a.len(), PAGE_SIZE);
            assert_eq!(slab.num_free(), 0);
        }
        assert_eq!(slab.num_free(), 2);
        let _c = slab.alloc();
        assert_eq!(slab.num_free(), 1);
    }
}
