//! Anti-spam rate limiting for mention notifications.
//!
//! # Responsibility
//! - Enforce a minimum interval per `(sender, target)` pair.
//! - Enforce a sliding-window quota per sender across all targets.
//! - Garbage-collect idle cooldown state.
//!
//! # Invariants
//! - A denial never consumes either budget.
//! - Approval and recording happen under the same pair of entry locks,
//!   taken sender-first, so interleaved checks cannot both pass on stale
//!   reads.
//! - Recorded timestamps never decrease per key.

use crate::clock::Clock;
use crate::config::MentionConfig;
use crate::model::identity::IdentityId;
use crate::shard::ShardedMap;
use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Limits applied by [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub pair_cooldown: Duration,
    /// Zero disables the sender quota.
    pub sender_quota: u32,
    pub sender_window: Duration,
    pub entry_ttl: Duration,
}

impl From<&MentionConfig> for RateLimitPolicy {
    fn from(config: &MentionConfig) -> Self {
        Self {
            pair_cooldown: config.pair_cooldown(),
            sender_quota: config.sender_quota_count,
            sender_window: config.sender_quota_window(),
            entry_ttl: config.cooldown_entry_ttl(),
        }
    }
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    PairCooldown { remaining: Duration },
    SenderQuota { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Default)]
struct PairState {
    last_notified: Option<Instant>,
}

#[derive(Debug, Default)]
struct SenderWindow {
    recent: VecDeque<Instant>,
    last_notified: Option<Instant>,
}

impl SenderWindow {
    fn in_window(&self, now: Instant, window: Duration) -> impl Iterator<Item = &Instant> {
        self.recent
            .iter()
            .filter(move |at| now.saturating_duration_since(**at) < window)
    }
}

pub struct RateLimiter {
    policy: RateLimitPolicy,
    clock: Arc<dyn Clock>,
    pairs: ShardedMap<(IdentityId, IdentityId), PairState>,
    senders: ShardedMap<IdentityId, SenderWindow>,
    last_sweep: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            policy,
            clock,
            pairs: ShardedMap::new(),
            senders: ShardedMap::new(),
            last_sweep: Mutex::new(now),
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Checks both caps and records the notification when allowed.
    pub fn allow(&self, sender: IdentityId, target: IdentityId) -> bool {
        self.check(sender, target).is_allowed()
    }

    /// Like [`RateLimiter::allow`] but reports which cap denied.
    pub fn check(&self, sender: IdentityId, target: IdentityId) -> RateDecision {
        let now = self.clock.now();

        let sender_entry = self
            .senders
            .entry_or_insert_with(&sender, SenderWindow::default);
        let mut window = sender_entry.lock();
        let pair_entry = self
            .pairs
            .entry_or_insert_with(&(sender, target), PairState::default);
        let mut pair = pair_entry.lock();

        if let Some(last) = pair.last_notified {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.policy.pair_cooldown {
                return RateDecision::PairCooldown {
                    remaining: self.policy.pair_cooldown - elapsed,
                };
            }
        }

        if self.policy.sender_quota > 0 {
            let mut in_window = window.in_window(now, self.policy.sender_window);
            let oldest = in_window.next().copied();
            let used = oldest.map_or(0, |_| 1 + in_window.count());
            if used >= self.policy.sender_quota as usize {
                let retry_after = oldest.map_or(Duration::ZERO, |oldest| {
                    self.policy
                        .sender_window
                        .saturating_sub(now.saturating_duration_since(oldest))
                });
                return RateDecision::SenderQuota { retry_after };
            }
        }

        let stamp = pair.last_notified.map_or(now, |last| last.max(now));
        pair.last_notified = Some(stamp);

        let sender_stamp = window.last_notified.map_or(now, |last| last.max(now));
        let sender_window = self.policy.sender_window;
        window
            .recent
            .retain(|at| sender_stamp.saturating_duration_since(*at) < sender_window);
        window.recent.push_back(sender_stamp);
        window.last_notified = Some(sender_stamp);

        RateDecision::Allowed
    }

    /// Removes cooldown entries idle for longer than the configured TTL.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        *self.last_sweep.lock() = now;
        let ttl = self.policy.entry_ttl;
        let is_live =
            |last: Option<Instant>| last.is_some_and(|at| now.saturating_duration_since(at) < ttl);

        let removed = self.pairs.retain(|_, pair| is_live(pair.last_notified))
            + self.senders.retain(|_, window| is_live(window.last_notified));
        if removed > 0 {
            debug!(
                "event=cooldown_sweep module=rate_limit status=ok removed={} pairs={} senders={}",
                removed,
                self.pairs.len(),
                self.senders.len()
            );
        }
        removed
    }

    /// Runs [`RateLimiter::sweep`] at most once per half TTL.
    pub fn sweep_if_due(&self) -> usize {
        let now = self.clock.now();
        let interval = (self.policy.entry_ttl / 2).max(Duration::from_secs(1));
        let due = now.saturating_duration_since(*self.last_sweep.lock()) >= interval;
        if due {
            self.sweep()
        } else {
            0
        }
    }

    pub fn tracked_pairs(&self) -> usize {
        self.pairs.len()
    }

    pub fn tracked_senders(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{RateDecision, RateLimitPolicy, RateLimiter};
    use crate::clock::ManualClock;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use uuid::Uuid;

    fn policy() -> RateLimitPolicy {
        RateLimitPolicy {
            pair_cooldown: Duration::from_secs(30),
            sender_quota: 5,
            sender_window: Duration::from_secs(60),
            entry_ttl: Duration::from_secs(600),
        }
    }

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (RateLimiter::new(policy(), clock.clone()), clock)
    }

    #[test]
    fn pair_cooldown_blocks_repeats_until_window_passes() {
        let (limiter, clock) = limiter();
        let (sender, target) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(limiter.allow(sender, target));
        clock.advance(Duration::from_secs(10));
        assert_eq!(
            limiter.check(sender, target),
            RateDecision::PairCooldown {
                remaining: Duration::from_secs(20)
            }
        );
        clock.advance(Duration::from_secs(21));
        assert!(limiter.allow(sender, target));
    }

    #[test]
    fn sender_quota_caps_distinct_targets() {
        let (limiter, clock) = limiter();
        let sender = Uuid::new_v4();

        let allowed = (0..6)
            .filter(|_| {
                clock.advance(Duration::from_secs(1));
                limiter.allow(sender, Uuid::new_v4())
            })
            .count();
        assert_eq!(allowed, 5);

        clock.advance(Duration::from_secs(60));
        assert!(limiter.allow(sender, Uuid::new_v4()));
    }

    #[test]
    fn quota_denial_does_not_consume_pair_budget() {
        let (limiter, clock) = limiter();
        let sender = Uuid::new_v4();
        for _ in 0..5 {
            assert!(limiter.allow(sender, Uuid::new_v4()));
        }

        let sixth = Uuid::new_v4();
        assert!(matches!(
            limiter.check(sender, sixth),
            RateDecision::SenderQuota { .. }
        ));

        clock.advance(Duration::from_secs(61));
        // The denied pair was never recorded, so no pair cooldown applies.
        assert_eq!(limiter.check(sender, sixth), RateDecision::Allowed);
    }

    #[test]
    fn senders_are_independent() {
        let (limiter, _clock) = limiter();
        let target = Uuid::new_v4();
        assert!(limiter.allow(Uuid::new_v4(), target));
        assert!(limiter.allow(Uuid::new_v4(), target));
    }

    #[test]
    fn sweep_evicts_idle_entries_after_ttl() {
        let (limiter, clock) = limiter();
        assert!(limiter.allow(Uuid::new_v4(), Uuid::new_v4()));
        assert_eq!(limiter.tracked_pairs(), 1);
        assert_eq!(limiter.tracked_senders(), 1);

        clock.advance(Duration::from_secs(599));
        assert_eq!(limiter.sweep(), 0);

        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.sweep(), 2);
        assert_eq!(limiter.tracked_pairs(), 0);
        assert_eq!(limiter.tracked_senders(), 0);
    }

    #[test]
    fn concurrent_checks_on_one_pair_approve_once() {
        let (limiter, _clock) = limiter();
        let limiter = Arc::new(limiter);
        let (sender, target) = (Uuid::new_v4(), Uuid::new_v4());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || limiter.allow(sender, target))
            })
            .collect();
        let approvals = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(approvals, 1);
    }
}
