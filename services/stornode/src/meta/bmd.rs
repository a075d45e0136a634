// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Bucket metadata

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use stornode_types::{Bucket, BucketProps};

use super::Versioned;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketMd {
    pub version: i64,
    /// provider -> bucket name -> props
    #[serde(default)]
    pub providers: BTreeMap<String, BTreeMap<String, BucketProps>>,
}

impl Versioned for BucketMd {
    const TAG: &'static str = "bmd";
    const FILE_NAME: &'static str = ".ais.bmd";

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

impl BucketMd {
    /// Returns false if the bucket already exists.
    pub fn add(&mut self, bucket: &Bucket, props: BucketProps) -> bool {
        let names = self.providers.entry(bucket.provider.clone()).or_default();
        if names.contains_key(&bucket.name) {
            return false;
        }
        names.insert(bucket.name.clone(), props);
        true
    }

    pub fn del(&mut self, bucket: &Bucket) -> bool {
        let Some(names) = self.providers.get_mut(&bucket.provider) else {
            return false;
        };
        let removed = names.remove(&bucket.name).is_some();
        if names.is_empty() {
            self.providers.remove(&bucket.provider);
        }
        removed
    }

    pub fn get(&self, bucket: &Bucket) -> Option<BucketProps> {
        self.providers
            .get(&bucket.provider)
            .and_then(|names| names.get(&bucket.name))
            .copied()
    }

    pub fn exists(&self, bucket: &Bucket) -> bool {
        self.get(bucket).is_some()
    }

    pub fn set_props(&mut self, bucket: &Bucket, props: BucketProps) -> bool {
        match self
            .providers
            .get_mut(&bucket.provider)
            .and_then(|names| names.get_mut(&bucket.name))
        {
            Some(p) => {
                *p = props;
                true
            }
            None => false,
        }
    }

    pub fn buckets(&self) -> impl Iterator<Item = (Bucket, BucketProps)> + '_ {
        self.providers.iter().flat_map(|(provider, names)| {
            names.iter().map(move |(name, props)| {
                (
                    Bucket {
                        provider: provider.clone(),
                        name: name.clone(),
                    },
                    *props,
                )
            })
        })
    }

    pub fn num_buckets(&self) -> usize {
        self.providers.values().map(BTreeMap::len).sum()
    }
}
