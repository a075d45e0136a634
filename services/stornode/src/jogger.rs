// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Mountpath joggers: one traversal worker per mountpath.
//!
//! A [`JoggerGroup`] walks `<mountpath>/<content-type>/...` (or a single
//! bucket's subtree) on every eligible mountpath in parallel and calls the
//! caller's visit callbacks for each file. Workers run on the blocking pool
//! and check the group's stop token between items.
//!
//! Callback outcomes are classified at the worker boundary:
//!
//! - [`VisitError::SkipDir`] prunes the rest of the current directory.
//! - [`VisitError::Transient`] skips the item.
//! - [`VisitError::Fatal`] and [`VisitError::Aborted`] stop that worker only
//!   and land in the group's first-error slot.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stornode_types::{Bucket, ContentType, NodeId, XactKind};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::fs::{FsError, Mountpath, Mountpaths, ParsedFqn};
use crate::lom::Lom;
use crate::memsys::Slab;
use crate::meta::ClusterMap;
use crate::metrics;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VisitError {
    #[error("skip directory")]
    SkipDir,
    #[error("skipped: {0}")]
    Transient(String),
    #[error("{0}")]
    Fatal(String),
    #[error("aborted: {0}")]
    Aborted(String),
}

impl VisitError {
    /// Vanished files are skipped, running out of space aborts, anything else
    /// is fatal.
    pub fn from_fs(err: &FsError) -> Self {
        if err.is_not_found() {
            VisitError::Transient(err.to_string())
        } else if err.is_oos() {
            VisitError::Aborted(err.to_string())
        } else {
            VisitError::Fatal(err.to_string())
        }
    }
}

/// Non-object content found during the walk.
#[derive(Debug, Clone)]
pub struct Ct {
    pub fqn: PathBuf,
    pub mountpath: Mountpath,
    pub content_type: ContentType,
    pub bucket: Bucket,
    pub obj_name: String,
}

impl Ct {
    fn new(fqn: &Path, parsed: ParsedFqn) -> Self {
        Self {
            fqn: fqn.to_path_buf(),
            mountpath: parsed.mountpath,
            content_type: parsed.content_type,
            bucket: parsed.bucket,
            obj_name: parsed.obj_name,
        }
    }

    /// Same content on another mountpath
    pub fn fqn_on(&self, mp: &Mountpath, ct: ContentType) -> PathBuf {
        mp.make_fqn(ct, &self.bucket, &self.obj_name)
    }
}

pub type VisitObj = Arc<dyn Fn(&mut Lom, &mut [u8]) -> Result<(), VisitError> + Send + Sync>;
pub type VisitCt = Arc<dyn Fn(&Ct, &mut [u8]) -> Result<(), VisitError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    /// Pause after this many items
    pub every: u64,
    pub sleep: Duration,
}

pub struct JoggerOpts {
    /// Job the walk runs for; labels logs and metrics
    pub kind: XactKind,
    pub mountpaths: Arc<Mountpaths>,
    pub slab: Arc<Slab>,
    pub content_types: Vec<ContentType>,
    pub visit_obj: VisitObj,
    pub visit_ct: Option<VisitCt>,
    /// Walk only this bucket
    pub bucket: Option<Bucket>,
    /// Load object attributes before the visit; skips vanished objects and
    /// non-primary replicas
    pub load: bool,
    pub throttle: Option<Throttle>,
    /// Skip objects whose HRW target is another node
    pub skip_globally_misplaced: Option<(Arc<ClusterMap>, NodeId)>,
    pub stop_timeout: Duration,
}

impl JoggerOpts {
    pub fn new(
        kind: XactKind,
        mountpaths: Arc<Mountpaths>,
        slab: Arc<Slab>,
        visit_obj: VisitObj,
    ) -> Self {
        Self {
            kind,
            mountpaths,
            slab,
            content_types: vec![ContentType::Object],
            visit_obj,
            visit_ct: None,
            bucket: None,
            load: false,
            throttle: None,
            skip_globally_misplaced: None,
            stop_timeout: Duration::from_secs(30),
        }
    }
}

type FirstErr = Arc<Mutex<Option<VisitError>>>;

fn set_first_err(slot: &FirstErr, err: VisitError) {
    let mut slot = match slot.lock() {
        Ok(s) => s,
        Err(poisoned) => poisoned.into_inner(),
    };
    if slot.is_none() {
        *slot = Some(err);
    }
}

pub struct JoggerGroup {
    opts: Arc<JoggerOpts>,
    mountpaths: Vec<Mountpath>,
    stop: CancellationToken,
    first_err: FirstErr,
    finished: Arc<watch::Sender<bool>>,
    started: AtomicBool,
}

impl JoggerGroup {
    /// One worker per available mountpath, or a single worker for `single`.
    pub fn new(opts: JoggerOpts, single: Option<Mountpath>) -> Self {
        let mountpaths = match single {
            Some(mp) => vec![mp],
            None => opts.mountpaths.get().available().to_vec(),
        };
        let (finished, _) = watch::channel(false);
        Self {
            opts: Arc::new(opts),
            mountpaths,
            stop: CancellationToken::new(),
            first_err: Arc::new(Mutex::new(None)),
            finished: Arc::new(finished),
            started: AtomicBool::new(false),
        }
    }

    pub fn num(&self) -> usize {
        self.mountpaths.len()
    }

    /// Start all workers. Must be called from within a tokio runtime; does
    /// not block. Calling it again has no effect.
    pub fn run(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut handles = Vec::with_capacity(self.mountpaths.len());
        for mp in &self.mountpaths {
            let jogger = Jogger {
                mountpath: mp.clone(),
                opts: Arc::clone(&self.opts),
                stop: self.stop.clone(),
            };
            let first_err = Arc::clone(&self.first_err);
            handles.push(tokio::task::spawn_blocking(move || {
                let mp = jogger.mountpath.clone();
                if let Err(e) = jogger.run() {
                    warn!(mountpath = %mp, error = %e, "jogger stopped early");
                    set_first_err(&first_err, e);
                }
            }));
        }

        let first_err = Arc::clone(&self.first_err);
        let finished = Arc::clone(&self.finished);
        tokio::spawn(async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "jogger panicked");
                    set_first_err(&first_err, VisitError::Fatal(format!("jogger panicked: {e}")));
                }
            }
            finished.send_replace(true);
        });
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Resolves once every worker is done.
    pub async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn first_error(&self) -> Option<VisitError> {
        match self.first_err.lock() {
            Ok(e) => e.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Ask workers to stop after their current item and wait for them, up
    /// to the configured timeout. Returns the first worker error.
    pub async fn stop(&self) -> Result<(), VisitError> {
        self.stop.cancel();
        if !self.started.swap(true, Ordering::AcqRel) {
            // Never ran
            self.finished.send_replace(true);
        }
        if tokio::time::timeout(self.opts.stop_timeout, self.wait_finished())
            .await
            .is_err()
        {
            warn!(
                kind = %self.opts.kind,
                timeout = ?self.opts.stop_timeout,
                "joggers did not stop in time"
            );
        }
        match self.first_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct Jogger {
    mountpath: Mountpath,
    opts: Arc<JoggerOpts>,
    stop: CancellationToken,
}

impl Jogger {
    fn run(&self) -> Result<(), VisitError> {
        let mut buf = self.opts.slab.alloc();
        let mut visited = 0u64;
        for ct in &self.opts.content_types {
            let root = match &self.opts.bucket {
                Some(b) => self.mountpath.bucket_dir(*ct, b),
                None => self.mountpath.ct_dir(*ct),
            };
            if !root.is_dir() {
                continue;
            }
            if !self.walk(*ct, &root, &mut buf, &mut visited)? {
                break;
            }
        }
        debug!(mountpath = %self.mountpath, kind = %self.opts.kind, visited, "jogger done");
        Ok(())
    }

    /// Returns false if stopped.
    fn walk(
        &self,
        ct: ContentType,
        root: &Path,
        buf: &mut [u8],
        visited: &mut u64,
    ) -> Result<bool, VisitError> {
        let mut it = WalkDir::new(root).into_iter();
        while let Some(entry) = it.next() {
            if self.stop.is_cancelled() {
                return Ok(false);
            }
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.io_error().is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound) => {
                    continue;
                }
                Err(e) => return Err(VisitError::Fatal(e.to_string())),
            };
            if !entry.file_type().is_file() {
                continue;
            }

            match self.visit(ct, entry.path(), buf) {
                Ok(()) => {}
                Err(VisitError::SkipDir) => it.skip_current_dir(),
                Err(VisitError::Transient(reason)) => {
                    debug!(fqn = %entry.path().display(), reason, "skipped");
                    metrics::record_skipped(&self.opts.kind.to_string());
                }
                Err(e) => return Err(e),
            }

            *visited += 1;
            if let Some(t) = self.opts.throttle
                && t.every > 0
                && *visited % t.every == 0
            {
                std::thread::sleep(t.sleep);
            }
        }
        Ok(true)
    }

    fn visit(&self, ct: ContentType, fqn: &Path, buf: &mut [u8]) -> Result<(), VisitError> {
        let set = self.opts.mountpaths.get();
        if ct != ContentType::Object {
            let Some(visit_ct) = &self.opts.visit_ct else {
                return Ok(());
            };
            let Some(parsed) = set.parse_fqn(fqn) else {
                return Ok(());
            };
            return visit_ct(&Ct::new(fqn, parsed), buf);
        }

        let Some(mut lom) = Lom::from_fqn(&set, fqn) else {
            return Ok(());
        };
        if let Some((smap, self_id)) = &self.opts.skip_globally_misplaced
            && smap
                .hrw_target(&lom.uname())
                .is_some_and(|t| t != self_id.as_str())
        {
            return Ok(());
        }
        if self.opts.load {
            match lom.load(&set) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(VisitError::from_fs(&e)),
            }
            if lom.is_copy() {
                return Ok(());
            }
        }
        (self.opts.visit_obj)(&mut lom, buf)
    }
}
