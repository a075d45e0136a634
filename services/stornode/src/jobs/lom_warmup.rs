// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Warm the object attribute cache for one bucket.

use std::sync::Arc;

use stornode_types::{Bucket, XactKind};
use tracing::debug;

use super::{JobEnv, spawn_bckjog};
use crate::jogger::{JoggerGroup, VisitError};
use crate::lom::Lom;
use crate::xact::{BckJog, Renewable, Renewed, Wpr, Xact, XactBase, XactError, XactHandle};

/// Renew the cache warm-up for `bucket`. A running warm-up of the same
/// bucket is returned as is.
pub fn load_lom_cache(env: &JobEnv, uuid: &str, bucket: &Bucket) -> Result<Renewed, XactError> {
    env.registry.renew(Box::new(Factory {
        env: env.clone(),
        uuid: uuid.to_string(),
        bucket: bucket.clone(),
    }))
}

struct Factory {
    env: JobEnv,
    uuid: String,
    bucket: Bucket,
}

impl Renewable for Factory {
    fn kind(&self) -> XactKind {
        XactKind::LoadLomCache
    }

    fn bucket(&self) -> Option<&Bucket> {
        Some(&self.bucket)
    }

    fn when_prev_is_running(&self, _prev: &XactHandle) -> Result<Wpr, XactError> {
        Ok(Wpr::Reuse)
    }

    fn start(self: Box<Self>) -> Result<XactHandle, XactError> {
        let Factory { env, uuid, bucket } = *self;
        let base = Arc::new(XactBase::new(
            &uuid,
            XactKind::LoadLomCache,
            Some(bucket.clone()),
        ));

        // Entries of objects gone since the last warm-up must not survive it
        env.lom_cache.evict_bucket(&bucket);
        let cache = Arc::clone(&env.lom_cache);
        let counter = Arc::clone(&base);
        let visit_obj = Arc::new(
            move |lom: &mut Lom, _buf: &mut [u8]| -> Result<(), VisitError> {
                cache.put(lom);
                counter.objs_add(1, lom.size() as i64);
                Ok(())
            },
        );
        let mut opts = env.jogger_opts(XactKind::LoadLomCache, visit_obj)?;
        opts.load = true;
        opts.bucket = Some(bucket);

        let xact = Arc::new(LoadLomCache {
            jog: Arc::new(BckJog::new(base, JoggerGroup::new(opts, None))),
        });
        debug!(xact = %xact.name(), joggers = xact.jog.num_joggers(), "warming up");
        spawn_bckjog(Arc::clone(&xact.jog));
        Ok(xact)
    }
}

pub struct LoadLomCache {
    jog: Arc<BckJog>,
}

impl Xact for LoadLomCache {
    fn base(&self) -> &XactBase {
        self.jog.base()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::hrw_mountpath;
    use crate::jobs::testing::{put, test_env};
    use stornode_types::{ContentType, XactState};

    #[tokio::test]
    async fn caches_bucket_objects() {
        let t = test_env(2);
        let set = t.env.mountpaths.get();
        let (warm, cold) = (Bucket::ais("warm"), Bucket::ais("cold"));
        for i in 0..6 {
            let name = format!("o{i}");
            for bck in [&warm, &cold] {
                let hrw = hrw_mountpath(&set, &bck.make_uname(&name)).unwrap();
                put(&hrw, ContentType::Object, bck, &name, b"abc");
            }
        }

        let renewed = load_lom_cache(&t.env, "llc1", &warm).unwrap();
        renewed.xact.base().wait_finished().await;
        assert_eq!(renewed.xact.state(), XactState::Finished);
        assert_eq!(t.env.lom_cache.len(), 6);
        let cached = t.env.lom_cache.get(&warm.make_uname("o3")).unwrap();
        assert_eq!(cached.size, 3);
        assert!(t.env.lom_cache.get(&cold.make_uname("o3")).is_none());
    }

    #[tokio::test]
    async fn rewarm_drops_deleted_objects() {
        let t = test_env(1);
        let bck = Bucket::ais("b");
        let mp = t.env.mountpaths.get().available()[0].clone();
        for i in 0..3 {
            put(&mp, ContentType::Object, &bck, &format!("o{i}"), b"x");
        }
        let first = load_lom_cache(&t.env, "w1", &bck).unwrap();
        first.xact.base().wait_finished().await;
        assert_eq!(t.env.lom_cache.len(), 3);

        std::fs::remove_file(mp.make_fqn(ContentType::Object, &bck, "o1")).unwrap();
        let second = load_lom_cache(&t.env, "w2", &bck).unwrap();
        second.xact.base().wait_finished().await;
        assert_eq!(t.env.lom_cache.len(), 2);
        assert!(t.env.lom_cache.get(&bck.make_uname("o1")).is_none());
    }

    #[tokio::test]
    async fn running_warmup_is_reused() {
        let t = test_env(1);
        let bck = Bucket::ais("b");
        let mp = t.env.mountpaths.get().available()[0].clone();
        for i in 0..4 {
            put(&mp, ContentType::Object, &bck, &format!("o{i}"), b"x");
        }
        // Slow the walk down so the first warm-up is still running
        t.config_tx.send_modify(|c| {
            c.jogger_throttle_every = 1;
            c.jogger_throttle_sleep_ms = 100;
        });

        let first = load_lom_cache(&t.env, "first", &bck).unwrap();
        let second = load_lom_cache(&t.env, "second", &bck).unwrap();
        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(second.xact.id(), "first");

        // Other buckets are independent
        let other = load_lom_cache(&t.env, "other", &Bucket::ais("c")).unwrap();
        assert!(!other.reused);

        first.xact.base().wait_finished().await;
        assert_eq!(t.env.lom_cache.len(), 4);
    }
}
