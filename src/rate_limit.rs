//! Fixed-window throttling of authentication attempts.
//!
//! The counter map is the one piece of shared mutable in-process state in
//! this crate. It is sharded so distinct keys do not contend; the
//! window-check-and-increment for one key is a single atomic unit under its
//! shard lock. Windows reset unconditionally on elapse: fixed windows over
//! sliding-window smoothing, trading burst tolerance for predictability.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SHARD_COUNT: usize = 16;

/// Operation classes with independent quotas.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RateLimitAction {
    Login,
    SecondFactor,
}

impl fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => f.write_str("login"),
            Self::SecondFactor => f.write_str("second_factor"),
        }
    }
}

/// Outcome of one check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window (0 when denied).
    pub remaining: u32,
    /// Time until the window resets; only set when denied.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    const ALLOWED_UNLIMITED: Self = Self {
        allowed: true,
        remaining: u32::MAX,
        retry_after: None,
    };
}

/// Window length and maximum count for one operation class.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateQuota {
    pub window: Duration,
    pub max: u32,
}

/// Gate shared across concurrent requests. Implementations must be safe to
/// call from many tasks at once; a distributed store can be swapped in here.
pub trait RateLimiter: Send + Sync {
    fn check(&self, caller: &str, action: RateLimitAction) -> RateLimitDecision;
}

/// Limiter that allows everything. Useful in tests and internal tooling.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _caller: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::ALLOWED_UNLIMITED
    }
}

struct WindowEntry {
    count: u32,
    window_started: Instant,
}

/// Process-local fixed-window counters keyed by (caller, action).
pub struct FixedWindowLimiter {
    shards: Vec<Mutex<HashMap<String, WindowEntry>>>,
    quotas: HashMap<RateLimitAction, RateQuota>,
}

impl FixedWindowLimiter {
    #[must_use]
    pub fn new(quotas: impl IntoIterator<Item = (RateLimitAction, RateQuota)>) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            quotas: quotas.into_iter().collect(),
        }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, WindowEntry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Count one request against the key's current window.
    pub fn check_quota(&self, key: &str, quota: RateQuota) -> RateLimitDecision {
        self.check_quota_at(key, quota, Instant::now())
    }

    fn check_quota_at(&self, key: &str, quota: RateQuota, now: Instant) -> RateLimitDecision {
        let mut entries = self.shard(key).lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(key.to_string()).or_insert(WindowEntry {
            count: 0,
            window_started: now,
        });

        let elapsed = now.saturating_duration_since(entry.window_started);
        if elapsed >= quota.window {
            // Unconditional reset once the window has closed.
            entry.count = 0;
            entry.window_started = now;
        }
        entry.count = entry.count.saturating_add(1);

        if entry.count <= quota.max {
            RateLimitDecision {
                allowed: true,
                remaining: quota.max - entry.count,
                retry_after: None,
            }
        } else {
            let elapsed = now.saturating_duration_since(entry.window_started);
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after: Some(quota.window.saturating_sub(elapsed)),
            }
        }
    }

    /// Drop entries whose window has closed. Locks one shard at a time so
    /// checks on other shards proceed while sweeping.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let mut reclaimed = 0_usize;
        for shard in &self.shards {
            let mut entries = shard.lock().unwrap_or_else(PoisonError::into_inner);
            let before = entries.len();
            let max_window = self
                .quotas
                .values()
                .map(|quota| quota.window)
                .max()
                .unwrap_or(Duration::ZERO);
            entries.retain(|_, entry| {
                now.saturating_duration_since(entry.window_started) < max_window
            });
            reclaimed += before - entries.len();
        }
        if reclaimed > 0 {
            debug!(reclaimed, "rate limiter sweep reclaimed stale windows");
        }
    }

    /// Start a periodic sweep task. The returned guard stops the task when
    /// dropped or via [`SweeperHandle::stop`].
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let limiter = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = task_token.cancelled() => break,
                    () = tokio::time::sleep(interval) => limiter.sweep(),
                }
            }
        });
        SweeperHandle {
            token,
            task: Some(task),
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, caller: &str, action: RateLimitAction) -> RateLimitDecision {
        // Actions without a configured quota are not throttled.
        let Some(quota) = self.quotas.get(&action) else {
            return RateLimitDecision::ALLOWED_UNLIMITED;
        };
        self.check_quota(&format!("{caller}:{action}"), *quota)
    }
}

/// Lifecycle handle for the sweep task.
pub struct SweeperHandle {
    token: CancellationToken,
    // Option so `stop` can take the handle out from under the Drop impl.
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweep task and wait for it to finish.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
