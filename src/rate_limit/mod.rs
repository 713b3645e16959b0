//! Rate gate: per-client fixed-window admission control
//!
//! What this module provides
//! - A `RateLimiter` capability consulted before any model call is made
//! - `FixedWindowLimiter`, an in-memory implementation keyed by `ClientKey`
//!
//! Exports
//! - Models
//!   - `ClientKey` (best-effort client identity, `"unknown"` fallback bucket)
//!   - `RateRecord { count, reset_at }`
//!   - `Decision { allowed, remaining, reset_at }`
//! - Utils
//!   - `FixedWindowLimiter::spawn_sweeper(interval)` background eviction task
//!
//! Implementation strategy
//! - One `Mutex<HashMap<ClientKey, RateRecord>>`; read-check-modify for a key
//!   happens under a single lock acquisition so concurrent requests from the
//!   same client cannot both pass the limit
//! - Windows are fixed: the first admitted request opens a window of
//!   `window` length; nothing slides
//! - Memory is bounded by sweeping expired records periodically and by
//!   evicting the record closest to expiry when `max_entries` is reached
//!
//! Testing strategy
//! - Drive `check_at` with explicit instants to assert window arithmetic
//! - Paused tokio clock to exercise the sweeper task

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// Best-effort identity of the caller, used only as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Shared bucket for callers whose address could not be determined.
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Counter for one client within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRecord {
    pub count: u32,
    pub reset_at: Instant,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: Instant,
}

/// Admission control consulted once per incoming chat request.
pub trait RateLimiter: Send + Sync + 'static {
    /// Admit or reject a request from `key`, consuming quota only when admitted.
    fn check(&self, key: &ClientKey) -> Decision;

    /// Configured number of admitted requests per window.
    fn limit(&self) -> u32;
}

/// Fixed-window limiter backed by a bounded in-memory map.
pub struct FixedWindowLimiter {
    config: RateLimitConfig,
    records: Mutex<HashMap<ClientKey, RateRecord>>,
}

impl FixedWindowLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Convenience constructor with default sweep settings.
    pub fn with_limit(limit: u32, window: Duration) -> Self {
        Self::new(RateLimitConfig {
            limit,
            window,
            ..RateLimitConfig::default()
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admission check evaluated at `now`.
    pub fn check_at(&self, key: &ClientKey, now: Instant) -> Decision {
        let limit = self.config.limit;
        let mut records = self.lock();

        if let Some(record) = records.get_mut(key) {
            if now < record.reset_at {
                if record.count >= limit {
                    return Decision {
                        allowed: false,
                        remaining: 0,
                        reset_at: record.reset_at,
                    };
                }
                record.count += 1;
                return Decision {
                    allowed: true,
                    remaining: limit - record.count,
                    reset_at: record.reset_at,
                };
            }
        } else if records.len() >= self.config.max_entries {
            make_room(&mut records, self.config.max_entries, now);
        }

        let record = RateRecord {
            count: 1,
            reset_at: now + self.config.window,
        };
        records.insert(key.clone(), record);
        Decision {
            allowed: true,
            remaining: limit.saturating_sub(1),
            reset_at: record.reset_at,
        }
    }

    /// Current record for `key`, if one is tracked.
    pub fn record(&self, key: &ClientKey) -> Option<RateRecord> {
        self.lock().get(key).copied()
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every record whose window has elapsed; returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, r| now < r.reset_at);
        before - records.len()
    }

    /// Periodically sweep expired records until the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    break;
                };
                let removed = limiter.sweep();
                if removed > 0 {
                    debug!(removed, remaining = limiter.len(), "swept expired rate records");
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientKey, RateRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &ClientKey) -> Decision {
        self.check_at(key, Instant::now())
    }

    fn limit(&self) -> u32 {
        self.config.limit
    }
}

fn make_room(records: &mut HashMap<ClientKey, RateRecord>, max_entries: usize, now: Instant) {
    records.retain(|_, r| now < r.reset_at);
    if records.len() < max_entries {
        return;
    }
    let oldest = records
        .iter()
        .min_by_key(|(_, r)| r.reset_at)
        .map(|(k, _)| k.clone());
    if let Some(key) = oldest {
        warn!(client = %key, "rate record map full; evicting record closest to expiry");
        records.remove(&key);
    }
}
