use std::time::{Duration, Instant};

/// Tracks politeness state for one domain
///
/// The minimum interval is the domain's robots.txt crawl-delay; callers may
/// ask for a longer spacing (their request delay) through
/// [`DomainState::time_until_ready`]. A 429 response adds a cooldown on top.
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    /// Number of requests dispatched to this domain
    pub request_count: u32,

    /// When the last request to this domain was dispatched
    pub last_request_time: Option<Instant>,

    /// Minimum spacing between requests
    pub min_interval: Duration,

    /// No requests before this instant (set by HTTP 429 Retry-After)
    pub backoff_until: Option<Instant>,
}

impl DomainState {
    /// Creates a new DomainState with the given minimum spacing
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            ..Self::default()
        }
    }

    /// Checks if a request can be dispatched to this domain
    ///
    /// # Arguments
    ///
    /// * `now` - The current time instant
    ///
    /// # Returns
    ///
    /// * `true` - If a request can be made now
    /// * `false` - If the domain is cooling down or was hit too recently
    pub fn can_request(&self, now: Instant) -> bool {
        self.time_until_next_request(now).is_none()
    }

    /// Records that a request was dispatched to this domain
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    /// Raises the minimum spacing, never lowering it
    pub fn set_min_interval(&mut self, interval: Duration) {
        self.min_interval = self.min_interval.max(interval);
    }

    /// Blocks the domain for `duration` from `now`
    ///
    /// Overlapping cooldowns keep the later deadline.
    pub fn apply_cooldown(&mut self, now: Instant, duration: Duration) {
        let until = now + duration;
        self.backoff_until = Some(match self.backoff_until {
            Some(existing) => existing.max(until),
            None => until,
        });
    }

    /// Calculates the time until the next request can be made
    ///
    /// Returns None if a request can be made now, or the duration to wait otherwise.
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        self.time_until_ready(now, Duration::ZERO)
    }

    /// Like [`DomainState::time_until_next_request`], spacing requests by at
    /// least `floor` even when the minimum interval is shorter
    pub fn time_until_ready(&self, now: Instant, floor: Duration) -> Option<Duration> {
        let mut ready_at: Option<Instant> = None;

        if let Some(last) = self.last_request_time {
            let spaced = last + self.min_interval.max(floor);
            if spaced > now {
                ready_at = Some(spaced);
            }
        }

        if let Some(until) = self.backoff_until {
            if until > now {
                ready_at = Some(ready_at.map_or(until, |r| r.max(until)));
            }
        }

        ready_at.map(|at| at - now)
    }
}
