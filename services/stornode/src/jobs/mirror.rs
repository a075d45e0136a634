// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Make-n-copies: bring every object of a bucket to exactly N local replicas.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use stornode_types::{Bucket, XactKind};
use tracing::{info, warn};

use super::{JobEnv, spawn_bckjog};
use crate::fs::MountpathSet;
use crate::jogger::{JoggerGroup, Throttle, VisitError};
use crate::lom::Lom;
use crate::xact::{BckJog, Renewable, Renewed, Wpr, Xact, XactBase, XactError, XactHandle};

/// Capacity is re-checked every this many processed objects
const CAPACITY_CHECK_EVERY: i64 = 100;

/// Used when the node config does not throttle joggers
const DEFAULT_THROTTLE: Throttle = Throttle {
    every: 256,
    sleep: Duration::from_millis(1),
};

/// N must be between 1 and the number of available mountpaths.
pub fn validate_ncopies(set: &MountpathSet, copies: u32) -> Result<(), XactError> {
    let max = set.len();
    if copies == 0 || copies as usize > max {
        return Err(XactError::InvalidCopies { copies, max });
    }
    Ok(())
}

pub struct MncArgs {
    pub uuid: String,
    pub bucket: Bucket,
    pub tag: String,
    pub copies: u32,
}

/// Renew make-n-copies for a bucket. Fails if one is already running for
/// that bucket.
pub fn make_ncopies(env: &JobEnv, args: MncArgs) -> Result<Renewed, XactError> {
    env.registry.renew(Box::new(Factory {
        env: env.clone(),
        args,
    }))
}

struct Factory {
    env: JobEnv,
    args: MncArgs,
}

impl Renewable for Factory {
    fn kind(&self) -> XactKind {
        XactKind::MakeNCopies
    }

    fn bucket(&self) -> Option<&Bucket> {
        Some(&self.args.bucket)
    }

    fn when_prev_is_running(&self, prev: &XactHandle) -> Result<Wpr, XactError> {
        warn!(
            "{} is currently running, cannot start a new {} {}",
            prev.name(),
            XactKind::MakeNCopies,
            self.args.bucket
        );
        Ok(Wpr::Reject)
    }

    fn start(self: Box<Self>) -> Result<XactHandle, XactError> {
        let Factory { env, args } = *self;
        let base = Arc::new(XactBase::new(
            &args.uuid,
            XactKind::MakeNCopies,
            Some(args.bucket.clone()),
        ));
        let name = format!("{} tag={}, copies={}", base.name(), args.tag, args.copies);

        let copies = args.copies;
        let visitor = Arc::new(Visitor {
            base: Arc::clone(&base),
            env: env.clone(),
            copies: copies as usize,
            name: name.clone(),
            busy_retry: env.config().busy_retry(),
            processed: AtomicI64::new(0),
        });
        let visit_obj = Arc::new(move |lom: &mut Lom, buf: &mut [u8]| visitor.visit_obj(lom, buf));
        let mut opts = env.jogger_opts(XactKind::MakeNCopies, visit_obj)?;
        // Loading is what skips the non-primary replicas
        opts.load = true;
        opts.bucket = Some(args.bucket.clone());
        opts.throttle = opts.throttle.or(Some(DEFAULT_THROTTLE));

        let xact = Arc::new(MakeNCopies {
            jog: Arc::new(BckJog::new(base, JoggerGroup::new(opts, None))),
            name,
        });
        let handle: XactHandle = xact.clone();

        match validate_ncopies(&env.mountpaths.get(), copies) {
            Ok(()) => {
                info!(xact = %xact.name, "starting");
                spawn_bckjog(Arc::clone(&xact.jog));
            }
            Err(e) => {
                xact.base().finish(Err(e));
            }
        }
        Ok(handle)
    }
}

pub struct MakeNCopies {
    jog: Arc<BckJog>,
    name: String,
}

impl Xact for MakeNCopies {
    fn base(&self) -> &XactBase {
        self.jog.base()
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

struct Visitor {
    base: Arc<XactBase>,
    env: JobEnv,
    copies: usize,
    name: String,
    busy_retry: Duration,
    /// Objects changed by this visitor across all joggers
    processed: AtomicI64,
}

impl Visitor {
    fn visit_obj(&self, lom: &mut Lom, buf: &mut [u8]) -> Result<(), VisitError> {
        let n = lom.num_copies();
        if n == self.copies {
            return Ok(());
        }

        let uname = lom.uname();
        let Some(_lock) = self
            .env
            .locker
            .lock_timeout(&uname, true, self.busy_retry)
        else {
            return Err(VisitError::Transient(format!("{uname} is busy")));
        };

        let result = if n > self.copies {
            lom.del_copies(self.copies)
        } else {
            lom.add_copies(&self.env.mountpaths.get(), self.copies, buf)
        };
        let size = match result {
            Ok(size) => size,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) if e.is_oos() => return Err(self.abort(&e.to_string())),
            Err(e) => return Err(VisitError::from_fs(&e)),
        };
        self.env.lom_cache.uncache(&uname);

        self.base.objs_add(1, size as i64);
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % CAPACITY_CHECK_EVERY == 0
            && let Err(e) = self.env.capacity.check()
        {
            return Err(self.abort(&e.to_string()));
        }
        Ok(())
    }

    fn abort(&self, cause: &str) -> VisitError {
        info!(xact = %self.name, cause, "aborting");
        self.base.abort(cause);
        VisitError::Aborted(cause.to_string())
    }
}
