//! Per-sender sliding-window rate limiter.
//!
//! Each sender keeps a window of recent action instants. A sender is limited
//! when any tier already holds `max_messages` actions younger than its
//! `window_secs`. Windows are pruned lazily on every record, so memory is
//! bounded by the set of active senders and there is no background sweeper.

use dashmap::DashMap;
use parley_common::{Error, RateLimitConfig, RateTier, Result};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct Tier {
    window: Duration,
    max_messages: usize,
}

/// Multi-tier sliding-window rate limiter keyed by sender id.
#[derive(Debug)]
pub struct RateLimiter {
    tiers: Vec<Tier>,
    /// Longest tier window; older entries are pruned
    horizon: Duration,
    unrestricted_sender: Option<String>,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Build a limiter from configuration.
    ///
    /// An empty tier list means no limit. A tier with a zero window or a zero
    /// message count is a configuration error.
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        let tiers = config
            .tiers
            .iter()
            .enumerate()
            .map(|(i, tier)| Self::tier(i, tier))
            .collect::<Result<Vec<_>>>()?;

        let horizon = tiers.iter().map(|t| t.window).max().unwrap_or_default();

        Ok(Self {
            tiers,
            horizon,
            unrestricted_sender: config.unrestricted_sender.clone(),
            windows: DashMap::new(),
        })
    }

    fn tier(index: usize, tier: &RateTier) -> Result<Tier> {
        if tier.window_secs == 0 || tier.max_messages == 0 {
            return Err(Error::Config(format!(
                "rate_limit.tiers[{index}] must have a non-zero window and message count (got {}s / {})",
                tier.window_secs, tier.max_messages
            )));
        }
        Ok(Tier {
            window: Duration::from_secs(tier.window_secs),
            max_messages: tier.max_messages,
        })
    }

    /// Limiter that never limits.
    pub fn unlimited() -> Self {
        Self {
            tiers: Vec::new(),
            horizon: Duration::ZERO,
            unrestricted_sender: None,
            windows: DashMap::new(),
        }
    }

    fn is_unrestricted(&self, sender_id: &str) -> bool {
        self.unrestricted_sender.as_deref() == Some(sender_id)
    }

    /// Whether any tier is full for this window at `now`.
    ///
    /// Instants later than `now` count as in-window, so clock confusion errs
    /// towards limiting.
    fn window_full(&self, window: &VecDeque<Instant>, now: Instant) -> bool {
        self.tiers.iter().any(|tier| {
            let recent = window
                .iter()
                .filter(|&&t| {
                    now.checked_duration_since(t)
                        .map_or(true, |age| age <= tier.window)
                })
                .count();
            recent >= tier.max_messages
        })
    }

    fn push_and_prune(&self, window: &mut VecDeque<Instant>, now: Instant) {
        window.push_back(now);
        window.retain(|&t| {
            now.checked_duration_since(t)
                .map_or(true, |age| age <= self.horizon)
        });
    }

    /// Whether the sender would be limited right now.
    pub fn should_limit(&self, sender_id: &str) -> bool {
        self.should_limit_at(sender_id, Instant::now())
    }

    pub fn should_limit_at(&self, sender_id: &str, now: Instant) -> bool {
        if self.tiers.is_empty() || self.is_unrestricted(sender_id) {
            return false;
        }
        self.windows
            .get(sender_id)
            .map_or(false, |window| self.window_full(&window, now))
    }

    /// Record an action by the sender.
    pub fn record_action(&self, sender_id: &str) {
        self.record_action_at(sender_id, Instant::now());
    }

    pub fn record_action_at(&self, sender_id: &str, now: Instant) {
        if self.tiers.is_empty() || self.is_unrestricted(sender_id) {
            return;
        }
        let mut window = self.windows.entry(sender_id.to_string()).or_default();
        self.push_and_prune(&mut window, now);
    }

    /// Check and, when allowed, record in one step under the sender's entry
    /// lock. Returns `true` when the sender is limited; limited attempts are
    /// not recorded.
    pub fn check_and_record(&self, sender_id: &str) -> bool {
        self.check_and_record_at(sender_id, Instant::now())
    }

    pub fn check_and_record_at(&self, sender_id: &str, now: Instant) -> bool {
        if self.tiers.is_empty() || self.is_unrestricted(sender_id) {
            return false;
        }

        let mut window = self.windows.entry(sender_id.to_string()).or_default();
        if self.window_full(&window, now) {
            debug!(sender_id, recent = window.len(), "Sender rate limited");
            return true;
        }
        self.push_and_prune(&mut window, now);
        false
    }

    /// Number of senders with tracked state.
    pub fn tracked_senders(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(tiers: &[(u64, usize)]) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            tiers: tiers.iter().map(|&(w, m)| RateTier::new(w, m)).collect(),
            unrestricted_sender: Some("operator".into()),
        })
        .unwrap()
    }

    #[test]
    fn limits_from_message_n_plus_one() {
        let rl = limiter(&[(60, 3)]);
        let t0 = Instant::now();
        for i in 0..3 {
            assert!(!rl.check_and_record_at("alice", t0 + Duration::from_secs(i)));
        }
        assert!(rl.should_limit_at("alice", t0 + Duration::from_secs(3)));
        assert!(rl.check_and_record_at("alice", t0 + Duration::from_secs(9)));
        // other senders unaffected
        assert!(!rl.should_limit_at("bob", t0 + Duration::from_secs(9)));
    }

    #[test]
    fn window_slides() {
        let rl = limiter(&[(60, 3)]);
        let t0 = Instant::now();
        for i in 0..3 {
            assert!(!rl.check_and_record_at("alice", t0 + Duration::from_secs(i * 3)));
        }
        assert!(rl.check_and_record_at("alice", t0 + Duration::from_secs(10)));
        assert!(!rl.check_and_record_at("alice", t0 + Duration::from_secs(71)));
    }

    #[test]
    fn boundary_age_counts_as_in_window() {
        let rl = limiter(&[(60, 1)]);
        let t0 = Instant::now();
        rl.record_action_at("alice", t0);
        assert!(rl.should_limit_at("alice", t0 + Duration::from_secs(60)));
        assert!(!rl.should_limit_at("alice", t0 + Duration::from_millis(60_001)));
    }

    #[test]
    fn tiers_apply_independently() {
        let rl = limiter(&[(10, 2), (100, 3)]);
        let t0 = Instant::now();
        assert!(!rl.check_and_record_at("a", t0));
        assert!(!rl.check_and_record_at("a", t0 + Duration::from_secs(1)));
        // short tier full
        assert!(rl.check_and_record_at("a", t0 + Duration::from_secs(2)));
        // short tier clear, long tier has room for one more
        assert!(!rl.check_and_record_at("a", t0 + Duration::from_secs(20)));
        // long tier full even though short tier is clear
        assert!(rl.check_and_record_at("a", t0 + Duration::from_secs(40)));
    }

    #[test]
    fn prunes_beyond_longest_window() {
        let rl = limiter(&[(10, 5), (30, 10)]);
        let t0 = Instant::now();
        for i in 0..4 {
            rl.record_action_at("a", t0 + Duration::from_secs(i));
        }
        rl.record_action_at("a", t0 + Duration::from_secs(100));
        assert_eq!(rl.windows.get("a").unwrap().len(), 1);
    }

    #[test]
    fn unrestricted_sender_bypasses() {
        let rl = limiter(&[(60, 1)]);
        for _ in 0..10 {
            assert!(!rl.check_and_record("operator"));
        }
        assert_eq!(rl.tracked_senders(), 0);
    }

    #[test]
    fn empty_tiers_never_limit() {
        let rl = limiter(&[]);
        for _ in 0..100 {
            assert!(!rl.check_and_record("alice"));
        }
        assert!(!RateLimiter::unlimited().should_limit("alice"));
    }

    #[test]
    fn zero_tiers_rejected() {
        let err = RateLimiter::new(&RateLimitConfig {
            tiers: vec![RateTier::new(60, 0)],
            unrestricted_sender: None,
        })
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn future_instants_count_against_sender() {
        let rl = limiter(&[(60, 1)]);
        let t0 = Instant::now();
        rl.record_action_at("a", t0 + Duration::from_secs(5));
        assert!(rl.should_limit_at("a", t0));
    }

    #[test]
    fn concurrent_checks_for_one_sender_are_atomic() {
        let rl = std::sync::Arc::new(limiter(&[(60, 10)]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = rl.clone();
                std::thread::spawn(move || (0..10).filter(|_| !rl.check_and_record("alice")).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }
}
