// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Resilver: restore local placement after a mountpath change.
//!
//! Every object is moved (copied) to its HRW mountpath and topped up to the
//! bucket's replica count. Extra replicas are left alone; removing them is a
//! storage cleanup concern. EC slices follow their object to the HRW
//! mountpath, metafile first.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use stornode_types::{Bucket, ContentType, MountpathAction, XactKind};
use tracing::{debug, error, info, warn};

use super::JobEnv;
use crate::config::NodeConfig;
use crate::fs::{
    self, FsError, Marker, Mountpath, MountpathSet, hrw_mountpath, persist_marker, remove_marker,
};
use crate::jogger::{Ct, JoggerGroup, VisitError};
use crate::lom::Lom;
use crate::notif::Notifier;
use crate::xact::{BckJog, Renewable, Renewed, Wpr, Xact, XactBase, XactError, XactHandle};

/// Activity window used by [`Res::is_active`]
const TIMED_DURATION: Duration = Duration::from_secs(4);

/// Placement fix-up attempts while HRW keeps moving
const MAX_HRW_RETRIES: u32 = 3;

/// Called with the outcome after a detach or disable resilver, before the
/// xaction finishes.
pub type PostDd = Box<dyn FnOnce(&Mountpath, MountpathAction, Option<&XactError>) + Send>;

pub struct Args {
    pub uuid: String,
    pub notif: Option<Arc<dyn Notifier>>,
    /// Mountpath whose change triggered the resilver
    pub rmi: Option<Mountpath>,
    pub action: Option<MountpathAction>,
    /// Only valid for detach and disable
    pub post_dd: Option<PostDd>,
    pub skip_glob_misplaced: bool,
    /// Walk only `rmi`
    pub single_rmi_jogger: bool,
    /// Policy when a resilver is already running
    pub when_running: Wpr,
}

impl Args {
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            notif: None,
            rmi: None,
            action: None,
            post_dd: None,
            skip_glob_misplaced: false,
            single_rmi_jogger: false,
            when_running: Wpr::Supersede,
        }
    }
}

#[derive(Default)]
struct Timing {
    begin: Option<Instant>,
    end: Option<Instant>,
    /// Resilvers started and not yet done; a superseded one may still be winding down
    running: usize,
}

impl Timing {
    fn begin(&mut self) {
        self.begin = Some(Instant::now());
        self.end = None;
        self.running += 1;
    }

    fn end(&mut self) {
        self.running = self.running.saturating_sub(1);
        if self.running == 0 {
            self.end = Some(Instant::now());
        }
    }
}

/// Resilver entry point and activity tracking.
pub struct Res {
    env: JobEnv,
    timing: Arc<Mutex<Timing>>,
}

fn timing(t: &Mutex<Timing>) -> MutexGuard<'_, Timing> {
    match t.lock() {
        Ok(t) => t,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Res {
    pub fn new(env: JobEnv) -> Self {
        Self {
            env,
            timing: Arc::new(Mutex::new(Timing::default())),
        }
    }

    /// A resilver is running, or started within `multiplier` activity
    /// windows, or ended less than one window ago.
    pub fn is_active(&self, multiplier: u32) -> bool {
        let t = timing(&self.timing);
        let Some(begin) = t.begin else {
            return false;
        };
        if begin.elapsed() < TIMED_DURATION * multiplier {
            return true;
        }
        match t.end {
            None => true,
            Some(end) => end.elapsed() < TIMED_DURATION,
        }
    }

    /// Persist the resilver marker and renew the xaction, which then runs in
    /// the background. The activity window opens only when a new xaction
    /// starts.
    pub fn run_resilver(&self, args: Args) -> Result<Renewed, XactError> {
        let set = self.env.mountpaths.get();
        if set.is_empty() {
            error!("resilver: no mountpaths");
            return Err(XactError::NoMountpaths);
        }
        persist_marker(&set, Marker::Resilver)?;

        let factory = Factory {
            env: self.env.clone(),
            timing: Arc::clone(&self.timing),
            args,
        };
        self.env.registry.renew(Box::new(factory))
    }
}

struct Factory {
    env: JobEnv,
    timing: Arc<Mutex<Timing>>,
    args: Args,
}

impl Renewable for Factory {
    fn kind(&self) -> XactKind {
        XactKind::Resilver
    }

    fn when_prev_is_running(&self, _prev: &XactHandle) -> Result<Wpr, XactError> {
        Ok(self.args.when_running)
    }

    fn start(self: Box<Self>) -> Result<XactHandle, XactError> {
        let Factory {
            env,
            timing: window,
            mut args,
        } = *self;
        let base = Arc::new(XactBase::new(&args.uuid, XactKind::Resilver, None));
        if let Some(notif) = args.notif.take() {
            base.add_notifier(notif);
        }

        let ctx = Arc::new(JoggerCtx {
            base: Arc::clone(&base),
            env: env.clone(),
            config: env.config(),
        });
        let visit_obj = {
            let ctx = Arc::clone(&ctx);
            Arc::new(move |lom: &mut Lom, buf: &mut [u8]| ctx.visit_obj(lom, buf))
        };
        let mut opts = env.jogger_opts(XactKind::Resilver, visit_obj)?;
        opts.content_types = vec![ContentType::Object, ContentType::EcSlice];
        opts.visit_ct = Some(Arc::new(move |ct: &Ct, buf: &mut [u8]| ctx.visit_ct(ct, buf)));
        if args.skip_glob_misplaced {
            opts.skip_globally_misplaced = Some((env.smap.get(), env.node_id.clone()));
        }

        let single = match (&args.rmi, args.single_rmi_jogger) {
            (Some(rmi), true) => Some(rmi.clone()),
            _ => None,
        };
        let joggers = JoggerGroup::new(opts, single);
        info!(
            xact = %base.name(),
            action = ?args.action,
            rmi = ?args.rmi.as_ref().map(|m| m.to_string()),
            joggers = joggers.num(),
            "resilvering"
        );

        let xres = Arc::new(Resilver {
            jog: Arc::new(BckJog::new(base, joggers)),
        });
        let handle: XactHandle = xres.clone();
        timing(&window).begin();
        tokio::spawn(async move {
            xres.run(&env, args).await;
            timing(&window).end();
        });
        Ok(handle)
    }
}

pub struct Resilver {
    jog: Arc<BckJog>,
}

impl Xact for Resilver {
    fn base(&self) -> &XactBase {
        self.jog.base()
    }
}

impl Resilver {
    async fn run(&self, env: &JobEnv, args: Args) {
        self.jog.run();
        let result = self.jog.wait().await;
        match &result {
            Ok(()) => match remove_marker(&env.mountpaths.get(), Marker::Resilver) {
                Ok(()) => info!(xact = %self.name(), "removed marker"),
                Err(e) => warn!(xact = %self.name(), error = %e, "failed to remove marker"),
            },
            Err(e) if e.is_aborted() => {
                info!(xact = %self.name(), error = %e, "aborted, marker kept")
            }
            Err(e) => warn!(xact = %self.name(), error = %e, "failed, marker kept"),
        }

        if let (Some(post_dd), Some(rmi), Some(action)) = (args.post_dd, &args.rmi, args.action) {
            post_dd(rmi, action, result.as_ref().err());
        }
        self.base().finish(result);
    }
}

struct JoggerCtx {
    base: Arc<XactBase>,
    env: JobEnv,
    config: NodeConfig,
}

impl JoggerCtx {
    fn visit_obj(&self, lom: &mut Lom, buf: &mut [u8]) -> Result<(), VisitError> {
        let uname = lom.uname();
        let _lock = match self.env.locker.try_lock(&uname, true) {
            Some(guard) => guard,
            None => {
                thread::sleep(self.config.busy_retry());
                match self.env.locker.try_lock(&uname, true) {
                    Some(guard) => guard,
                    None => return Err(VisitError::Transient(format!("{uname} is busy"))),
                }
            }
        };

        let props = self.env.bucket_props(lom.bucket());
        let set = self.env.mountpaths.get();

        // EC metafile moves before the data it describes
        let mut meta = None;
        if props.ec_enabled {
            let hrw = match hrw_mountpath(&set, &uname) {
                Ok(hrw) => hrw,
                Err(e) => {
                    warn!(xact = %self.base.name(), uname, error = %e, "no HRW mountpath");
                    return Ok(());
                }
            };
            if hrw != *lom.mountpath() {
                match move_ec_meta(lom.bucket(), lom.name(), lom.mountpath(), &hrw, buf) {
                    Ok(m) => meta = m,
                    Err(e) => return self.ec_meta_failed(&uname, &e),
                }
            }
        }

        if let Err(e) = lom.load(&set) {
            if !e.is_not_found() {
                debug!(xact = %self.base.name(), uname, error = %e, "load failed");
            }
            return Ok(());
        }

        let target = props.mirror_copies.max(1) as usize;
        match self.fix_placement(lom, target, buf) {
            Ok(copied) => {
                if copied {
                    self.base.objs_add(1, lom.size() as i64);
                }
                if let Some((old, _)) = meta
                    && let Err(e) = std::fs::remove_file(&old)
                {
                    warn!(xact = %self.base.name(), uname, fqn = %old.display(), error = %e, "failed to remove old metafile");
                }
                Ok(())
            }
            Err(e) => {
                if let Some((_, new)) = meta
                    && let Err(e) = std::fs::remove_file(&new)
                {
                    warn!(xact = %self.base.name(), uname, fqn = %new.display(), error = %e, "failed to remove metafile copy");
                }
                if let VisitError::Aborted(cause) = &e {
                    self.base.abort(cause);
                }
                Err(e)
            }
        }
    }

    /// Copy to the HRW mountpath, then add missing replicas. Starts over
    /// from `orig` if the HRW mountpath moves in the meantime. Returns
    /// whether anything was copied.
    fn fix_placement(&self, orig: &Lom, target: usize, buf: &mut [u8]) -> Result<bool, VisitError> {
        let mut lom = orig.clone();
        let mut copied = false;
        let mut fixed_hrw = false;
        let mut retries = 0;
        loop {
            let set = self.env.mountpaths.get();
            let Some((mi, is_hrw)) = lom.to_mpath(&set, target) else {
                return Ok(copied);
            };

            if is_hrw {
                if fixed_hrw {
                    retries += 1;
                    if retries > MAX_HRW_RETRIES {
                        let reason = format!(
                            "hrw mountpaths keep changing ({} => {})",
                            orig.mountpath(),
                            mi
                        );
                        error!(xact = %self.base.name(), uname = %orig.uname(), reason, "giving up");
                        return Err(VisitError::Fatal(format!("{}: {reason}", orig.uname())));
                    }
                    thread::sleep(self.config.hrw_retry());
                    lom = orig.clone();
                    copied = false;
                    fixed_hrw = false;
                    continue;
                }

                self.env.lom_cache.uncache(&lom.uname());
                lom = match fix_hrw(&mut lom, &mi, &set, buf) {
                    Ok(hlom) => hlom,
                    Err(e) if e.is_not_found() => return Ok(false),
                    Err(e) => {
                        error!(xact = %self.base.name(), uname = %lom.uname(), error = %e, "failed to restore");
                        return Err(VisitError::from_fs(&e));
                    }
                };
                fixed_hrw = true;
                copied = true;
                continue;
            }

            match lom.copy_to(&mi, buf) {
                Ok(_) => copied = true,
                Err(e) if e.is_oos() => return Err(self.abort(&e)),
                Err(e) if e.is_not_found() => return Ok(copied),
                Err(e) => {
                    warn!(xact = %self.base.name(), uname = %lom.uname(), to = %mi, error = %e, "failed to copy");
                    return Ok(copied);
                }
            }
        }
    }

    /// Out of space aborts the whole resilver; anything else skips the object.
    fn ec_meta_failed(&self, uname: &str, e: &FsError) -> Result<(), VisitError> {
        if e.is_oos() {
            return Err(self.abort(e));
        }
        warn!(xact = %self.base.name(), uname, error = %e, "failed to copy EC metafile");
        Ok(())
    }

    fn abort(&self, e: &FsError) -> VisitError {
        let cause = e.to_string();
        self.base.abort(&cause);
        VisitError::Aborted(cause)
    }

    fn visit_ct(&self, ct: &Ct, buf: &mut [u8]) -> Result<(), VisitError> {
        if !self.env.bucket_props(&ct.bucket).ec_enabled {
            return Err(VisitError::SkipDir);
        }
        self.mv_slice(ct, buf)
    }

    /// Move an EC slice and its metafile to the HRW mountpath. On success
    /// the sources are removed; on failure the copied metafile is.
    fn mv_slice(&self, ct: &Ct, buf: &mut [u8]) -> Result<(), VisitError> {
        let uname = ct.bucket.make_uname(&ct.obj_name);
        let dest = match hrw_mountpath(&self.env.mountpaths.get(), &uname) {
            Ok(dest) => dest,
            Err(e) => {
                warn!(xact = %self.base.name(), uname, error = %e, "no HRW mountpath");
                return Ok(());
            }
        };
        if dest == ct.mountpath {
            return Ok(());
        }

        let (src_meta, dst_meta) = match move_ec_meta(&ct.bucket, &ct.obj_name, &ct.mountpath, &dest, buf) {
            Ok(Some(m)) => m,
            // Slice without a metafile is unusable; cleanup takes it
            Ok(None) => return Ok(()),
            Err(e) => return self.ec_meta_failed(&uname, &e),
        };

        let dest_fqn = ct.fqn_on(&dest, ContentType::EcSlice);
        debug!(xact = %self.base.name(), from = %ct.fqn.display(), to = %dest_fqn.display(), "moving slice");
        if let Err(e) = fs::copy_file(&ct.fqn, &dest_fqn, &dest.work_dir(), buf) {
            error!(xact = %self.base.name(), uname, error = %e, "failed to copy slice, rolling back");
            if let Err(e) = std::fs::remove_file(&dst_meta) {
                warn!(fqn = %dst_meta.display(), error = %e, "failed to remove metafile copy");
            }
            return if e.is_oos() {
                Err(self.abort(&e))
            } else {
                Ok(())
            };
        }

        let err_meta = std::fs::remove_file(&src_meta).err();
        let err_slice = std::fs::remove_file(&ct.fqn).err();
        if err_meta.is_some() || err_slice.is_some() {
            warn!(
                xact = %self.base.name(),
                fqn = %ct.fqn.display(),
                slice = ?err_slice,
                meta = ?err_meta,
                "failed to clean up"
            );
        }
        Ok(())
    }
}

/// Copy `lom` to its HRW mountpath and return the object there.
fn fix_hrw(
    lom: &mut Lom,
    mi: &Mountpath,
    set: &MountpathSet,
    buf: &mut [u8],
) -> Result<Lom, FsError> {
    lom.copy_to(mi, buf)?;
    let mut hlom = Lom::new(lom.bucket(), lom.name(), mi);
    hlom.load(set)?;
    Ok(hlom)
}

/// Copy an object's EC metafile between mountpaths. Returns the source and
/// destination paths, or None if there is no metafile.
fn move_ec_meta(
    bucket: &Bucket,
    name: &str,
    src: &Mountpath,
    dst: &Mountpath,
    buf: &mut [u8],
) -> Result<Option<(PathBuf, PathBuf)>, FsError> {
    let src_fqn = src.make_fqn(ContentType::EcMeta, bucket, name);
    if !src_fqn.exists() {
        return Ok(None);
    }
    let dst_fqn = dst.make_fqn(ContentType::EcMeta, bucket, name);
    match fs::copy_file(&src_fqn, &dst_fqn, &dst.work_dir(), buf) {
        Ok(_) => Ok(Some((src_fqn, dst_fqn))),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
