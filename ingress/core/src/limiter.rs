use hashbrown::HashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    attempts: VecDeque<Instant>,
    blocked_until: Option<Instant>,
}

impl Entry {
    fn new() -> Entry {
        Entry {
            attempts: VecDeque::new(),
            blocked_until: None,
        }
    }

    /// Lazily expires the block and drops attempts that fell out of the window.
    fn refresh(&mut self, window: Duration, now: Instant) {
        if let Some(until) = self.blocked_until {
            if until <= now {
                self.blocked_until = None;
            }
        }

        while let Some(&oldest) = self.attempts.front() {
            if now.duration_since(oldest) > window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }

    fn idle(&self) -> bool {
        self.attempts.is_empty() && self.blocked_until.is_none()
    }
}

/// Sliding-window failure counter per source IP with a blocking window.
/// Callers pass `now` so expiry stays deterministic under test.
pub struct RateLimiter {
    entries: Mutex<HashMap<IpAddr, Entry>>,
    max_attempts: usize,
    window: Duration,
    block: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window: Duration, block: Duration) -> RateLimiter {
        RateLimiter {
            entries: Mutex::new(HashMap::new()),
            max_attempts,
            window,
            block,
        }
    }

    /// Records a failed attempt. Returns true when the source is blocked,
    /// either because this failure tripped the limit or because a block was
    /// already active (in which case the attempt is not recorded).
    pub fn record_failure(&self, ip: IpAddr, now: Instant) -> bool {
        let mut entries = self.entries.lock().expect("Rate limit table poisoned");
        let entry = entries.entry(ip).or_insert_with(Entry::new);

        entry.refresh(self.window, now);

        if entry.blocked_until.is_some() {
            return true;
        }

        entry.attempts.push_back(now);

        if entry.attempts.len() >= self.max_attempts {
            entry.blocked_until = Some(now + self.block);
            entry.attempts.clear();
            return true;
        }

        false
    }

    /// True while a block is active for the source.
    pub fn is_blocked(&self, ip: IpAddr, now: Instant) -> bool {
        let mut entries = self.entries.lock().expect("Rate limit table poisoned");

        match entries.get_mut(&ip) {
            Some(entry) => {
                entry.refresh(self.window, now);
                entry.blocked_until.is_some()
            }
            None => false,
        }
    }

    /// Number of failures the source can still make before being blocked.
    pub fn remaining(&self, ip: IpAddr, now: Instant) -> usize {
        let mut entries = self.entries.lock().expect("Rate limit table poisoned");

        match entries.get_mut(&ip) {
            Some(entry) => {
                entry.refresh(self.window, now);

                match entry.blocked_until {
                    Some(_) => 0,
                    None => self.max_attempts - entry.attempts.len(),
                }
            }
            None => self.max_attempts,
        }
    }

    /// Drops entries whose attempt window and block have both expired.
    pub fn gc(&self, now: Instant) {
        let mut entries = self.entries.lock().expect("Rate limit table poisoned");
        let window = self.window;

        entries.retain(|_, entry| {
            entry.refresh(window, now);
            !entry.idle()
        });
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// Cooldown table for flood-capable warnings, keyed on the dominant
/// identifier of the warning (source address, action code, token prefix).
pub struct Cooldown {
    entries: Mutex<HashMap<String, Instant>>,
    period: Duration,
}

impl Cooldown {
    pub fn new(period: Duration) -> Cooldown {
        Cooldown {
            entries: Mutex::new(HashMap::new()),
            period,
        }
    }

    /// Returns true when the keyed warning may be emitted, arming the
    /// cooldown as a side effect.
    pub fn permit(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().expect("Cooldown table poisoned");
        let armed = entries.get(key).copied();

        match armed {
            Some(armed) if now.duration_since(armed) < self.period => false,
            _ => {
                entries.insert(key.into(), now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(60_000);
    const BLOCK: Duration = Duration::from_millis(60_000);

    fn ip(last: u8) -> IpAddr {
        format!("192.168.1.{}", last).parse().unwrap()
    }

    fn make_limiter() -> RateLimiter {
        RateLimiter::new(10, WINDOW, BLOCK)
    }

    #[test]
    fn test_block_on_max_attempts() {
        let limiter = make_limiter();
        let now = Instant::now();

        for attempt in 0..9 {
            assert!(!limiter.record_failure(ip(1), now), "blocked early at {}", attempt);
        }

        assert!(limiter.record_failure(ip(1), now));
        assert!(limiter.is_blocked(ip(1), now));
    }

    #[test]
    fn test_block_expires() {
        let limiter = make_limiter();
        let now = Instant::now();

        for _ in 0..10 {
            limiter.record_failure(ip(1), now);
        }

        assert!(limiter.is_blocked(ip(1), now + BLOCK - Duration::from_millis(1)));
        assert!(!limiter.is_blocked(ip(1), now + BLOCK));
    }

    #[test]
    fn test_blocked_source_not_recorded() {
        let limiter = make_limiter();
        let now = Instant::now();

        for _ in 0..10 {
            limiter.record_failure(ip(1), now);
        }

        // Failures during the block neither extend it nor accumulate
        assert!(limiter.record_failure(ip(1), now + Duration::from_millis(1)));
        assert!(!limiter.is_blocked(ip(1), now + BLOCK));
        assert_eq!(limiter.remaining(ip(1), now + BLOCK), 10);
    }

    #[test]
    fn test_window_slides() {
        let limiter = make_limiter();
        let now = Instant::now();

        for _ in 0..9 {
            limiter.record_failure(ip(1), now);
        }

        // The earlier failures fall out of the window, so this one doesn't trip
        assert!(!limiter.record_failure(ip(1), now + WINDOW + Duration::from_millis(1)));
    }

    #[test]
    fn test_sources_independent() {
        let limiter = make_limiter();
        let now = Instant::now();

        for _ in 0..10 {
            limiter.record_failure(ip(1), now);
        }

        assert!(!limiter.is_blocked(ip(2), now));
        assert_eq!(limiter.remaining(ip(2), now), 10);
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = make_limiter();
        let now = Instant::now();

        assert_eq!(limiter.remaining(ip(1), now), 10);

        limiter.record_failure(ip(1), now);
        limiter.record_failure(ip(1), now);

        assert_eq!(limiter.remaining(ip(1), now), 8);
    }

    #[test]
    fn test_gc_reclaims_idle_entries() {
        let limiter = make_limiter();
        let now = Instant::now();

        limiter.record_failure(ip(1), now);

        for _ in 0..10 {
            limiter.record_failure(ip(2), now);
        }

        assert_eq!(limiter.tracked(), 2);

        limiter.gc(now + WINDOW + Duration::from_millis(1));
        assert_eq!(limiter.tracked(), 1);

        limiter.gc(now + WINDOW + BLOCK);
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_cooldown_arms_and_releases() {
        let cooldown = Cooldown::new(Duration::from_millis(300_000));
        let now = Instant::now();

        assert!(cooldown.permit("10.0.0.1:1234", now));
        assert!(!cooldown.permit("10.0.0.1:1234", now + Duration::from_millis(299_999)));
        assert!(cooldown.permit("10.0.0.1:1234", now + Duration::from_millis(300_000)));
    }

    #[test]
    fn test_cooldown_keys_independent() {
        let cooldown = Cooldown::new(Duration::from_millis(300_000));
        let now = Instant::now();

        assert!(cooldown.permit("a", now));
        assert!(cooldown.permit("b", now));
    }
}
