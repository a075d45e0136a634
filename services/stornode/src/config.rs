// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Configuration for the storage node

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::sync::watch;

use crate::jogger::Throttle;
use crate::xact::RetentionPolicy;

/// Node configuration loaded from environment variables or JSON file
///
/// The JSON config file carries the tunables that are safe to change at
/// runtime; see `merge_reloadable()`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's ID in the cluster map
    /// Note: This field is NOT reloadable - changes require restart
    #[serde(skip)]
    pub node_id: String,

    /// Directory holding persisted cluster metadata
    /// Note: This field is NOT reloadable - changes require restart
    #[serde(skip)]
    pub config_dir: PathBuf,

    /// Local mountpaths at startup
    /// Note: This field is NOT reloadable - mountpaths change through
    /// attach/detach
    #[serde(skip)]
    pub mountpaths: Vec<PathBuf>,

    /// Finished xactions kept for queries
    pub xact_retain_finished: usize,

    /// Seconds a finished xaction stays queryable
    pub xact_retain_secs: u64,

    /// Joggers pause every this many items (0 disables throttling)
    pub jogger_throttle_every: u64,

    pub jogger_throttle_sleep_ms: u64,

    /// Upper bound on waiting for joggers to stop
    pub jogger_stop_timeout_secs: u64,

    /// Used-space percentage past which jobs that add data abort
    pub high_watermark_pct: u32,

    /// Wait before the second lock attempt on a busy object
    pub busy_retry_ms: u64,

    /// Wait between placement fix-up attempts while mountpaths are changing
    pub hrw_retry_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            config_dir: PathBuf::new(),
            mountpaths: Vec::new(),
            xact_retain_finished: 64,
            xact_retain_secs: 3600,
            jogger_throttle_every: 0,
            jogger_throttle_sleep_ms: 10,
            jogger_stop_timeout_secs: 30,
            high_watermark_pct: 90,
            busy_retry_ms: 500,
            hrw_retry_ms: 100,
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let node_id =
            std::env::var("STORNODE_ID").context("STORNODE_ID environment variable required")?;

        let config_dir: PathBuf = std::env::var("CONFIG_DIR")
            .unwrap_or_else(|_| "/var/lib/stornode".to_string())
            .into();

        // Comma-separated list: "/mnt/d1,/mnt/d2"
        let mountpaths: Vec<PathBuf> = std::env::var("MOUNTPATHS")
            .context("MOUNTPATHS environment variable required")?
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        if mountpaths.is_empty() {
            bail!("MOUNTPATHS must name at least one mountpath");
        }

        let xact_retain_finished = std::env::var("XACT_RETAIN_FINISHED")
            .unwrap_or_else(|_| "64".to_string())
            .parse()
            .context("Invalid XACT_RETAIN_FINISHED")?;

        let xact_retain_secs = std::env::var("XACT_RETAIN_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .context("Invalid XACT_RETAIN_SECS")?;

        let jogger_throttle_every = std::env::var("JOGGER_THROTTLE_EVERY")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .context("Invalid JOGGER_THROTTLE_EVERY")?;

        let jogger_throttle_sleep_ms = std::env::var("JOGGER_THROTTLE_SLEEP_MS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("Invalid JOGGER_THROTTLE_SLEEP_MS")?;

        let jogger_stop_timeout_secs = std::env::var("JOGGER_STOP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("Invalid JOGGER_STOP_TIMEOUT_SECS")?;

        let high_watermark_pct = std::env::var("HIGH_WATERMARK_PCT")
            .unwrap_or_else(|_| "90".to_string())
            .parse()
            .context("Invalid HIGH_WATERMARK_PCT")?;

        let config = Self {
            node_id,
            config_dir,
            mountpaths,
            xact_retain_finished,
            xact_retain_secs,
            jogger_throttle_every,
            jogger_throttle_sleep_ms,
            jogger_stop_timeout_secs,
            high_watermark_pct,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    ///
    /// Used for runtime reloading via SIGUSR1. Node identity, config dir and
    /// mountpaths are not read from the file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.high_watermark_pct == 0 || self.high_watermark_pct > 100 {
            bail!(
                "high_watermark_pct must be within 1..=100, got {}",
                self.high_watermark_pct
            );
        }
        Ok(())
    }

    /// Merge runtime-reloadable fields from another config
    pub fn merge_reloadable(&mut self, other: &NodeConfig) {
        self.xact_retain_finished = other.xact_retain_finished;
        self.xact_retain_secs = other.xact_retain_secs;
        self.jogger_throttle_every = other.jogger_throttle_every;
        self.jogger_throttle_sleep_ms = other.jogger_throttle_sleep_ms;
        self.jogger_stop_timeout_secs = other.jogger_stop_timeout_secs;
        self.high_watermark_pct = other.high_watermark_pct;
        self.busy_retry_ms = other.busy_retry_ms;
        self.hrw_retry_ms = other.hrw_retry_ms;
    }

    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_finished: self.xact_retain_finished,
            max_age: Duration::from_secs(self.xact_retain_secs),
        }
    }

    pub fn throttle(&self) -> Option<Throttle> {
        (self.jogger_throttle_every > 0).then(|| Throttle {
            every: self.jogger_throttle_every,
            sleep: Duration::from_millis(self.jogger_throttle_sleep_ms),
        })
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.jogger_stop_timeout_secs)
    }

    pub fn busy_retry(&self) -> Duration {
        Duration::from_millis(self.busy_retry_ms)
    }

    pub fn hrw_retry(&self) -> Duration {
        Duration::from_millis(self.hrw_retry_ms)
    }

    /// Start watching for SIGUSR1 to reload config from file
    ///
    /// When SIGUSR1 is received, the config file is re-read and the merged
    /// configuration is sent to subscribers via the watch channel.
    #[cfg(unix)]
    pub async fn start_config_watcher(
        config_file: PathBuf,
        current_config: Self,
        config_tx: watch::Sender<Self>,
    ) {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigusr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to register SIGUSR1 handler");
                return;
            }
        };

        let mut config = current_config;

        loop {
            sigusr1.recv().await;
            tracing::info!(
                config_file = %config_file.display(),
                "Received SIGUSR1, reloading config"
            );

            match Self::from_file(&config_file).await {
                Ok(new_config) => {
                    config.merge_reloadable(&new_config);

                    if config_tx.send(config.clone()).is_err() {
                        tracing::warn!("No config subscribers, reload had no effect");
                    } else {
                        tracing::info!(
                            high_watermark_pct = config.high_watermark_pct,
                            jogger_throttle_every = config.jogger_throttle_every,
                            xact_retain_finished = config.xact_retain_finished,
                            "Config reloaded successfully"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        config_file = %config_file.display(),
                        "Failed to reload config"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // =========================================================================
    // Configuration Tests
    // =========================================================================
    //
    // `from_env()` is not tested here: `std::env::set_var` is unsafe in the
    // 2024 edition and the parsing is a straight read of each variable.
    //
    // =========================================================================

    fn make_config() -> NodeConfig {
        NodeConfig {
            node_id: "t1".to_string(),
            config_dir: PathBuf::from("/var/lib/stornode"),
            mountpaths: vec![PathBuf::from("/mnt/d1"), PathBuf::from("/mnt/d2")],
            ..NodeConfig::default()
        }
    }

    // -------------------------------------------------------------------------
    // Test 1: merge_keeps_identity
    // -------------------------------------------------------------------------

    #[test]
    fn merge_keeps_identity() {
        let mut config = make_config();
        let other = NodeConfig {
            high_watermark_pct: 80,
            jogger_throttle_every: 100,
            ..NodeConfig::default()
        };

        config.merge_reloadable(&other);

        assert_eq!(config.node_id, "t1");
        assert_eq!(config.mountpaths.len(), 2);
        assert_eq!(config.high_watermark_pct, 80);
        assert_eq!(
            config.throttle(),
            Some(Throttle {
                every: 100,
                sleep: Duration::from_millis(10),
            })
        );
    }

    // -------------------------------------------------------------------------
    // Test 2: from_file_ignores_non_reloadable
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn from_file_ignores_non_reloadable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"node_id": "evil", "xact_retain_finished": 5, "busy_retry_ms": 1}"#,
        )
        .unwrap();

        let config = NodeConfig::from_file(&path).await.unwrap();
        assert!(config.node_id.is_empty());
        assert_eq!(config.xact_retain_finished, 5);
        assert_eq!(config.busy_retry(), Duration::from_millis(1));
        // Unset fields keep their defaults
        assert_eq!(config.high_watermark_pct, 90);
    }

    // -------------------------------------------------------------------------
    // Test 3: from_file_rejects_bad_watermark
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn from_file_rejects_bad_watermark() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"high_watermark_pct": 150}"#).unwrap();
        assert!(NodeConfig::from_file(&path).await.is_err());
    }

    // -------------------------------------------------------------------------
    // Test 4: derived_settings
    // -------------------------------------------------------------------------

    #[test]
    fn derived_settings() {
        let config = make_config();
        assert_eq!(config.throttle(), None);
        assert_eq!(config.stop_timeout(), Duration::from_secs(30));
        assert_eq!(config.retention().max_finished, 64);
        assert_eq!(config.retention().max_age, Duration::from_secs(3600));
    }
}
