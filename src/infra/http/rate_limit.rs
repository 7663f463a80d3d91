use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Sliding-window limiter keyed by client and route.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<DashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Arc::new(DashMap::new()),
        }
    }

    /// Record a request and report whether it is allowed, plus how many
    /// requests remain in the current window.
    pub fn allow(&self, client: &str, route: &str) -> (bool, u32) {
        let bucket_key = format!("{client}:{route}");
        let now = Instant::now();
        let window = self.window;

        let mut entry = self.buckets.entry(bucket_key).or_default();
        entry.retain(|instant| now.duration_since(*instant) < window);

        let remaining = self.max_requests.saturating_sub(entry.len() as u32);
        if remaining == 0 {
            return (false, 0);
        }

        entry.push(now);
        (true, remaining.saturating_sub(1))
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_per_client_and_route() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);

        assert_eq!(limiter.allow("10.0.0.1", "/artifacts"), (true, 1));
        assert_eq!(limiter.allow("10.0.0.1", "/artifacts"), (true, 0));
        assert_eq!(limiter.allow("10.0.0.1", "/artifacts"), (false, 0));

        assert!(limiter.allow("10.0.0.2", "/artifacts").0);
        assert!(limiter.allow("10.0.0.1", "/tasks/{task_id}").0);
    }

    #[test]
    fn window_expiry_frees_slots() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 1);
        assert!(limiter.allow("c", "r").0);
        assert!(!limiter.allow("c", "r").0);
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.allow("c", "r").0);
    }
}
