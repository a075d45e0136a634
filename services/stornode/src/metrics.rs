// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for the storage node
//!
//! - Extended actions started and finished, by kind and outcome
//! - Objects and bytes processed, by kind
//! - Objects skipped on transient errors
//! - Metadata versions published, by document

use prometheus::{CounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

// Metric definitions are constant; a failure here is a programming error.
#[allow(clippy::expect_used)]
mod metrics_impl {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref REGISTRY: Registry = Registry::new();

        pub static ref XACTS_STARTED: CounterVec = CounterVec::new(
            Opts::new("stornode_xacts_started_total", "Extended actions started by kind"),
            &["kind"]
        ).expect("valid metric name and labels");

        /// Terminal transitions by kind and outcome (finished, failed, aborted)
        pub static ref XACTS_FINISHED: CounterVec = CounterVec::new(
            Opts::new("stornode_xacts_finished_total", "Extended actions finished by kind and outcome"),
            &["kind", "outcome"]
        ).expect("valid metric name and labels");

        pub static ref OBJECTS_TOTAL: CounterVec = CounterVec::new(
            Opts::new("stornode_objects_total", "Objects processed by kind"),
            &["kind"]
        ).expect("valid metric name and labels");

        pub static ref BYTES_TOTAL: CounterVec = CounterVec::new(
            Opts::new("stornode_bytes_total", "Bytes processed by kind"),
            &["kind"]
        ).expect("valid metric name and labels");

        pub static ref SKIPPED_TOTAL: CounterVec = CounterVec::new(
            Opts::new("stornode_objects_skipped_total", "Objects skipped on transient errors by kind"),
            &["kind"]
        ).expect("valid metric name and labels");

        pub static ref META_VERSION: IntGaugeVec = IntGaugeVec::new(
            Opts::new("stornode_meta_version", "Last published metadata version by document"),
            &["tag"]
        ).expect("valid metric name and labels");
    }
}

pub use metrics_impl::{
    BYTES_TOTAL, META_VERSION, OBJECTS_TOTAL, REGISTRY, SKIPPED_TOTAL, XACTS_FINISHED,
    XACTS_STARTED,
};

/// Register all metrics with the registry. Call once at startup.
#[allow(clippy::expect_used)]
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(XACTS_STARTED.clone()))
        .expect("Failed to register XACTS_STARTED");
    REGISTRY
        .register(Box::new(XACTS_FINISHED.clone()))
        .expect("Failed to register XACTS_FINISHED");
    REGISTRY
        .register(Box::new(OBJECTS_TOTAL.clone()))
        .expect("Failed to register OBJECTS_TOTAL");
    REGISTRY
        .register(Box::new(BYTES_TOTAL.clone()))
        .expect("Failed to register BYTES_TOTAL");
    REGISTRY
        .register(Box::new(SKIPPED_TOTAL.clone()))
        .expect("Failed to register SKIPPED_TOTAL");
    REGISTRY
        .register(Box::new(META_VERSION.clone()))
        .expect("Failed to register META_VERSION");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_xact_started(kind: &str) {
    XACTS_STARTED.with_label_values(&[kind]).inc();
}

pub fn record_xact_finished(kind: &str, outcome: &str) {
    XACTS_FINISHED.with_label_values(&[kind, outcome]).inc();
}

pub fn record_objects(kind: &str, objects: i64, bytes: i64) {
    if objects > 0 {
        OBJECTS_TOTAL.with_label_values(&[kind]).inc_by(objects as f64);
    }
    if bytes > 0 {
        BYTES_TOTAL.with_label_values(&[kind]).inc_by(bytes as f64);
    }
}

pub fn record_skipped(kind: &str) {
    SKIPPED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_meta_version(tag: &str, version: i64) {
    META_VERSION.with_label_values(&[tag]).set(version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_values_show_up_in_gather() {
        // Registration is global; tolerate other tests having done it
        let _ = REGISTRY.register(Box::new(XACTS_STARTED.clone()));
        record_xact_started("election");
        let text = gather_metrics();
        assert!(text.contains("stornode_xacts_started_total"));
        assert!(text.contains("kind=\"election\""));
    }
}
