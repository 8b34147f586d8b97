//! Process-local fixed-window rate limiting for user-triggered actions.
//!
//! Each [`LimiterPolicy`] has a ceiling per window. Counters are keyed by
//! `policy:user_id` and reset when the window that started with the first
//! request of the key elapses.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::error::SyncCoreError;

/// Stale windows are swept once the map grows past this many keys
const SWEEP_THRESHOLD: usize = 10_000;

/// Named throttling policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterPolicy {
    ManualSync,
    SummaryGeneration,
}

impl LimiterPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            LimiterPolicy::ManualSync => "manual_sync",
            LimiterPolicy::SummaryGeneration => "summary_generation",
        }
    }

    fn key(self, user_id: Uuid) -> String {
        format!("{}:{}", self.as_str(), user_id)
    }
}

impl fmt::Display for LimiterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ceiling and window for one policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyLimit {
    pub max_requests: u32,
    pub window: Duration,
}

/// Result of a single [`RateLimiter::check`]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Seconds until the window resets, rounded up
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    /// Convert a rejection into the domain error carrying `Retry-After`
    pub fn into_result(self) -> Result<Self, SyncCoreError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(SyncCoreError::RateLimitExceeded {
                retry_after_secs: self.retry_after_secs,
            })
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    manual_sync: PolicyLimit,
    summary_generation: PolicyLimit,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(manual_sync: PolicyLimit, summary_generation: PolicyLimit) -> Self {
        Self {
            manual_sync,
            summary_generation,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Per-minute policies from configuration
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let minute = Duration::from_secs(60);
        Self::new(
            PolicyLimit {
                max_requests: config.manual_sync_per_minute,
                window: minute,
            },
            PolicyLimit {
                max_requests: config.summary_per_minute,
                window: minute,
            },
        )
    }

    pub fn limit_for(&self, policy: LimiterPolicy) -> PolicyLimit {
        match policy {
            LimiterPolicy::ManualSync => self.manual_sync,
            LimiterPolicy::SummaryGeneration => self.summary_generation,
        }
    }

    /// Count one request for `(policy, user_id)` against the current window
    pub fn check(&self, policy: LimiterPolicy, user_id: Uuid) -> RateLimitDecision {
        self.check_at(policy, user_id, Instant::now())
    }

    /// [`Self::check`] with an explicit clock reading
    pub fn check_at(&self, policy: LimiterPolicy, user_id: Uuid, now: Instant) -> RateLimitDecision {
        let limit = self.limit_for(policy);
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        if windows.len() > SWEEP_THRESHOLD {
            windows.retain(|_, w| now.saturating_duration_since(w.started) < self.longest_window());
        }

        let window = windows.entry(policy.key(user_id)).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.saturating_duration_since(window.started) >= limit.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        let allowed = window.count < limit.max_requests;
        if allowed {
            window.count += 1;
        }

        let until_reset = limit
            .window
            .saturating_sub(now.saturating_duration_since(window.started));
        let reset_at = Utc::now()
            + chrono::Duration::from_std(until_reset).unwrap_or_else(|_| chrono::Duration::zero());

        if !allowed {
            metrics::counter!("rate_limit_rejections_total", "policy" => policy.as_str())
                .increment(1);
        }

        RateLimitDecision {
            allowed,
            limit: limit.max_requests,
            remaining: limit.max_requests.saturating_sub(window.count),
            reset_at,
            retry_after_secs: until_reset.as_secs() + u64::from(until_reset.subsec_nanos() > 0),
        }
    }

    fn longest_window(&self) -> Duration {
        self.manual_sync.window.max(self.summary_generation.window)
    }
}
