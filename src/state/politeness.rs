//! Process-wide per-domain politeness
//!
//! Every scheduler in the process shares one table, so two jobs crawling the
//! same host still space their requests as if they were one crawler. Each
//! job brings its own request delay as a floor; robots.txt crawl-delays and
//! 429 cooldowns are recorded per domain and bind every job.

use crate::state::DomainState;
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct PolitenessTable {
    domains: DashMap<String, DomainState>,
}

impl PolitenessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next request slot for `domain` if it is free
    ///
    /// The check and the reservation happen under the domain's entry lock,
    /// so concurrent callers never both get the same slot.
    ///
    /// # Arguments
    ///
    /// * `domain` - Domain key of the request
    /// * `floor` - The caller's own minimum spacing (its request delay)
    /// * `now` - The current time instant
    pub fn try_acquire(&self, domain: &str, floor: Duration, now: Instant) -> bool {
        let mut state = self.domains.entry(domain.to_string()).or_default();
        if state.time_until_ready(now, floor).is_some() {
            return false;
        }
        state.record_request(now);
        true
    }

    /// Raises the domain's minimum spacing (robots.txt crawl-delay)
    pub fn raise_interval(&self, domain: &str, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        self.domains
            .entry(domain.to_string())
            .or_default()
            .set_min_interval(interval);
    }

    /// Blocks the domain for `duration` from `now`
    pub fn apply_cooldown(&self, domain: &str, now: Instant, duration: Duration) {
        self.domains
            .entry(domain.to_string())
            .or_default()
            .apply_cooldown(now, duration);
    }

    /// Time until a caller with spacing `floor` may hit the domain again
    pub fn time_until(&self, domain: &str, floor: Duration, now: Instant) -> Option<Duration> {
        self.domains
            .get(domain)
            .and_then(|state| state.time_until_ready(now, floor))
    }

    /// Requests dispatched to the domain since the process started
    pub fn request_count(&self, domain: &str) -> u32 {
        self.domains.get(domain).map_or(0, |state| state.request_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const DELAY: Duration = Duration::from_millis(1000);

    #[test]
    fn test_acquire_reserves_the_slot() {
        let table = PolitenessTable::new();
        let now = Instant::now();

        assert!(table.try_acquire("example.com", DELAY, now));
        assert!(!table.try_acquire("example.com", DELAY, now + Duration::from_millis(999)));
        assert!(table.try_acquire("example.com", DELAY, now + DELAY));
        assert_eq!(table.request_count("example.com"), 2);

        // Other domains are independent
        assert!(table.try_acquire("other.org", DELAY, now));
    }

    #[test]
    fn test_floor_is_per_caller() {
        let table = PolitenessTable::new();
        let now = Instant::now();
        assert!(table.try_acquire("example.com", Duration::ZERO, now));

        let later = now + Duration::from_millis(200);
        assert!(!table.try_acquire("example.com", Duration::from_millis(500), later));
        assert!(table.try_acquire("example.com", Duration::from_millis(100), later));
    }

    #[test]
    fn test_crawl_delay_binds_every_caller() {
        let table = PolitenessTable::new();
        let now = Instant::now();
        table.raise_interval("example.com", Duration::from_secs(2));
        assert!(table.try_acquire("example.com", Duration::ZERO, now));

        assert_eq!(
            table.time_until("example.com", Duration::ZERO, now + Duration::from_millis(500)),
            Some(Duration::from_millis(1500))
        );
        assert!(!table.try_acquire("example.com", Duration::ZERO, now + Duration::from_secs(1)));
    }

    #[test]
    fn test_cooldown_blocks_acquire() {
        let table = PolitenessTable::new();
        let now = Instant::now();
        table.apply_cooldown("example.com", now, Duration::from_secs(5));

        assert!(!table.try_acquire("example.com", Duration::ZERO, now + Duration::from_secs(4)));
        assert!(table.try_acquire("example.com", Duration::ZERO, now + Duration::from_secs(5)));
        assert!(table.time_until("unknown.org", DELAY, now).is_none());
    }

    #[test]
    fn test_concurrent_acquire_grants_one_slot() {
        let table = Arc::new(PolitenessTable::new());
        let now = Instant::now();

        let granted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let table = Arc::clone(&table);
                    scope.spawn(move || table.try_acquire("example.com", DELAY, now))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(granted, 1);
        assert_eq!(table.request_count("example.com"), 1);
    }
}
