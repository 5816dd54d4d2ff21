//! Per-user wager throttling
//!
//! Two rules apply to every wager:
//! - a cooldown between consecutive wagers by the same user
//! - a cap on wagers inside a rolling window
//!
//! State is process-local and resets on restart. It never takes part in
//! ledger invariants; a shared-store implementation can replace
//! [`InMemoryRateLimiter`] behind the [`RateLimiter`] trait.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::errors::{EngineError, RateLimitReason};
use crate::ledger::types::UserId;

/// Result of a cooldown check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownCheck {
    pub allowed: bool,
    pub retry_after_secs: f64,
}

pub trait RateLimiter: Send + Sync {
    /// Whether the cooldown since the user's last wager has elapsed
    fn check_cooldown(&self, user_id: UserId) -> CooldownCheck;

    /// Whether the user still has room inside the rolling window
    fn check_rate_window(&self, user_id: UserId) -> bool;

    /// Record an accepted wager attempt
    fn record_activity(&self, user_id: UserId);

    /// Check both rules and record the activity as one step.
    ///
    /// The default composes the three calls above; implementations with
    /// concurrent callers should override it so the check and the record
    /// cannot interleave.
    fn try_acquire(&self, user_id: UserId) -> Result<(), EngineError> {
        let cooldown = self.check_cooldown(user_id);
        if !cooldown.allowed {
            return Err(EngineError::RateLimited {
                retry_after_secs: cooldown.retry_after_secs,
                reason: RateLimitReason::Cooldown,
            });
        }
        if !self.check_rate_window(user_id) {
            return Err(EngineError::RateLimited {
                retry_after_secs: 0.0,
                reason: RateLimitReason::Window,
            });
        }
        self.record_activity(user_id);
        Ok(())
    }
}

/// Activity of one user
#[derive(Debug, Default)]
struct ActivityWindow {
    last_bet: Option<DateTime<Utc>>,
    /// Timestamps inside the window, oldest first
    recent: VecDeque<DateTime<Utc>>,
}

impl ActivityWindow {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let span = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(3_650));
        let cutoff = now - span;
        while let Some(&front) = self.recent.front() {
            if front <= cutoff {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn cooldown_remaining(&self, now: DateTime<Utc>, cooldown: Duration) -> Option<Duration> {
        let last = self.last_bet?;
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        cooldown.checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    /// Time until the oldest entry leaves the window
    fn window_retry_after(&self, now: DateTime<Utc>, window: Duration) -> Duration {
        self.recent
            .front()
            .and_then(|oldest| {
                let expires = *oldest + chrono::Duration::from_std(window).ok()?;
                (expires - now).to_std().ok()
            })
            .unwrap_or(Duration::ZERO)
    }

    fn record(&mut self, now: DateTime<Utc>) {
        self.last_bet = Some(now);
        self.recent.push_back(now);
    }
}

/// Rate limiter backed by a concurrent map of per-user windows
pub struct InMemoryRateLimiter {
    cooldown: Duration,
    window: Duration,
    max_per_window: usize,
    windows: DashMap<UserId, ActivityWindow>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldown: Duration::from_millis(config.bet_cooldown_ms),
            window: Duration::from_secs(config.window_secs),
            max_per_window: config.max_bets_per_window,
            windows: DashMap::new(),
            clock,
        }
    }

    /// Number of users with tracked activity
    pub fn tracked_users(&self) -> usize {
        self.windows.len()
    }

    /// Forget all activity, as a restart would
    pub fn reset(&self) {
        self.windows.clear();
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check_cooldown(&self, user_id: UserId) -> CooldownCheck {
        let now = self.clock.now();
        let remaining = self
            .windows
            .get(&user_id)
            .and_then(|w| w.cooldown_remaining(now, self.cooldown));

        match remaining {
            Some(left) => CooldownCheck {
                allowed: false,
                retry_after_secs: left.as_secs_f64(),
            },
            None => CooldownCheck {
                allowed: true,
                retry_after_secs: 0.0,
            },
        }
    }

    fn check_rate_window(&self, user_id: UserId) -> bool {
        let now = self.clock.now();
        match self.windows.get_mut(&user_id) {
            Some(mut w) => {
                w.prune(now, self.window);
                w.recent.len() < self.max_per_window
            }
            None => true,
        }
    }

    fn record_activity(&self, user_id: UserId) {
        let now = self.clock.now();
        let mut w = self.windows.entry(user_id).or_default();
        w.prune(now, self.window);
        w.record(now);
    }

    fn try_acquire(&self, user_id: UserId) -> Result<(), EngineError> {
        let now = self.clock.now();
        // The entry guard holds the shard lock for the whole check-and-record.
        let mut w = self.windows.entry(user_id).or_default();

        if let Some(left) = w.cooldown_remaining(now, self.cooldown) {
            debug!(user_id, retry_after_ms = left.as_millis() as u64, "Wager inside cooldown");
            return Err(EngineError::RateLimited {
                retry_after_secs: left.as_secs_f64(),
                reason: RateLimitReason::Cooldown,
            });
        }

        w.prune(now, self.window);
        if w.recent.len() >= self.max_per_window {
            let retry = w.window_retry_after(now, self.window);
            debug!(user_id, in_window = w.recent.len(), "Wager rate window full");
            return Err(EngineError::RateLimited {
                retry_after_secs: retry.as_secs_f64(),
                reason: RateLimitReason::Window,
            });
        }

        w.record(now);
        Ok(())
    }
}
