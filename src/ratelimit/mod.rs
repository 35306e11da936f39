//! Sliding-window rate limiting
//!
//! Counts timestamps per `(subject, action class)` key inside a trailing
//! window. Checks prune lazily; a background sweep evicts idle keys to
//! bound memory. Prune and sweep run under the same lock, so a sweep can
//! never drop an entry that still counts toward an in-flight check.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Class of rate-limited activity. Each class gets its own window per
/// subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    /// General commands, keyed by sender.
    Command,
    /// Outbound conversation traffic, keyed by conversation.
    Message,
    /// Fun-loop starts, keyed by (sender, fun kind).
    FunStart,
    /// Admin mutations, keyed by sender.
    AdminAction,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::Command => "command",
            ActionClass::Message => "message",
            ActionClass::FunStart => "fun_start",
            ActionClass::AdminAction => "admin_action",
        }
    }
}

/// A limit over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: usize,
    pub window: Duration,
}

impl Quota {
    pub const fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window }
    }

    pub const fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

/// The quota set enforced by the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RateQuotas {
    /// Per-sender general command rate.
    pub commands: Quota,
    /// Per-conversation message rate.
    pub messages: Quota,
    /// Per-(sender, fun kind) fun-start rate.
    pub fun_starts: Quota,
    /// Per-sender admin-action rate.
    pub admin_actions: Quota,
}

impl Default for RateQuotas {
    fn default() -> Self {
        Self {
            commands: Quota::per_minute(30),
            messages: Quota::per_minute(50),
            fun_starts: Quota::per_minute(5),
            admin_actions: Quota::per_minute(20),
        }
    }
}

impl RateQuotas {
    /// Largest window in the set; sweeps must retain at least this much.
    pub fn max_window(&self) -> Duration {
        [
            self.commands.window,
            self.messages.window,
            self.fun_starts.window,
            self.admin_actions.window,
        ]
        .into_iter()
        .max()
        .unwrap_or(Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    subject: String,
    class: ActionClass,
}

/// Sliding-window counter table.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<WindowKey, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and record one event for `(subject, class)`.
    ///
    /// Prunes entries older than the quota window, admits if the remaining
    /// count is under the limit, and records the event only on admission.
    pub fn check(&self, subject: &str, class: ActionClass, quota: Quota) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let entries = windows
            .entry(WindowKey {
                subject: subject.to_string(),
                class,
            })
            .or_default();

        entries.retain(|t| now.duration_since(*t) < quota.window);
        if entries.len() < quota.limit {
            entries.push(now);
            true
        } else {
            false
        }
    }

    /// Evict keys with no activity inside `retention`.
    ///
    /// `retention` must be at least the largest quota window in use
    /// ([`RateQuotas::max_window`]); entries newer than it are kept, so no
    /// in-window admission is ever lost to a sweep.
    pub fn sweep(&self, retention: Duration) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, entries| {
            entries.retain(|t| now.duration_since(*t) < retention);
            !entries.is_empty()
        });
        let evicted = before - windows.len();
        if evicted > 0 {
            debug!(evicted, remaining = windows.len(), "rate window sweep");
        }
    }

    /// Number of tracked keys (sweep diagnostics and tests).
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

/// Spawn the periodic sweep task. Cancelling the token stops it.
pub fn spawn_sweeper(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    retention: Duration,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => limiter.sweep(retention),
            }
        }
    })
}
