// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Bounded retries for per-object network calls made from jogger workers.
//!
//! Workers run on blocking threads, so the retry loop sleeps the thread.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Outcome of one failed attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Worth retrying as is (timeouts, resets)
    #[error("{0}")]
    Soft(String),
    /// Likely to persist; retried fewer times
    #[error("{0}")]
    Hard(String),
}

#[derive(Debug, Clone)]
pub struct RetryArgs {
    /// Logged with every retry
    pub action: String,
    pub soft_err: u32,
    pub hard_err: u32,
    pub sleep: Duration,
    /// Double the sleep after each failed attempt
    pub backoff: bool,
    pub max_sleep: Duration,
}

impl RetryArgs {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            soft_err: 5,
            hard_err: 2,
            sleep: Duration::from_millis(50),
            backoff: true,
            max_sleep: Duration::from_secs(2),
        }
    }
}

/// Call `f` until it succeeds or either error budget is spent. Returns the
/// last error on failure.
pub fn call_with_retry<T, F>(args: &RetryArgs, mut f: F) -> Result<T, CallError>
where
    F: FnMut() -> Result<T, CallError>,
{
    let (mut soft, mut hard) = (0u32, 0u32);
    let mut sleep = args.sleep;
    loop {
        let err = match f() {
            Ok(v) => {
                if soft + hard > 0 {
                    debug!(action = %args.action, soft, hard, "succeeded after retries");
                }
                return Ok(v);
            }
            Err(e) => e,
        };
        let exhausted = match &err {
            CallError::Soft(_) => {
                soft += 1;
                soft >= args.soft_err
            }
            CallError::Hard(_) => {
                hard += 1;
                hard >= args.hard_err
            }
        };
        if exhausted {
            warn!(action = %args.action, soft, hard, error = %err, "giving up");
            return Err(err);
        }
        debug!(action = %args.action, soft, hard, error = %err, "retrying");
        thread::sleep(sleep);
        if args.backoff {
            sleep = (sleep * 2).min(args.max_sleep);
        }
    }
}
