//! Per-client admission window.
//!
//! Each client may have one accepted request per window. A rejected request
//! does not extend the window. Expired entries are pruned lazily on every
//! call rather than by a background sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request accepted and recorded
    Allowed,
    /// Client already has an accepted request inside the window
    Limited {
        /// Time until the client's window expires
        retry_after: Duration,
    },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Rate limiter keyed by client identity (usually the peer IP)
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    last_accepted: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given window. A zero window disables it.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check whether `client_id` may proceed and record the acceptance.
    pub async fn check_and_record(&self, client_id: &str) -> RateDecision {
        self.check_and_record_at(client_id, Instant::now()).await
    }

    pub(crate) async fn check_and_record_at(&self, client_id: &str, now: Instant) -> RateDecision {
        if self.window.is_zero() {
            return RateDecision::Allowed;
        }

        // Prune, check and record under one lock so concurrent requests from
        // the same client cannot both be admitted.
        let mut entries = self.last_accepted.lock().await;
        let window = self.window;
        entries.retain(|_, accepted| now.saturating_duration_since(*accepted) < window);

        if let Some(accepted) = entries.get(client_id) {
            let elapsed = now.saturating_duration_since(*accepted);
            let retry_after = window.saturating_sub(elapsed);
            debug!(client = client_id, ?retry_after, "Rate limited");
            return RateDecision::Limited { retry_after };
        }

        entries.insert(client_id.to_string(), now);
        RateDecision::Allowed
    }

    /// Number of clients with a live window entry
    pub async fn client_count(&self) -> usize {
        self.last_accepted.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn second_call_within_window_is_limited() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        assert_eq!(limiter.check_and_record("ip1").await, RateDecision::Allowed);
        assert!(matches!(
            limiter.check_and_record("ip1").await,
            RateDecision::Limited { .. }
        ));
    }

    #[tokio::test]
    async fn call_after_window_is_allowed() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_and_record_at("ip1", start).await.is_allowed());
        assert!(!limiter
            .check_and_record_at("ip1", start + Duration::from_secs(59))
            .await
            .is_allowed());
        assert!(limiter
            .check_and_record_at("ip1", start + Duration::from_secs(60))
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn rejection_does_not_extend_window() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        let start = Instant::now();
        limiter.check_and_record_at("ip1", start).await;

        match limiter
            .check_and_record_at("ip1", start + Duration::from_secs(4))
            .await
        {
            RateDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(6));
            }
            RateDecision::Allowed => panic!("should be limited"),
        }

        // Window still measured from the first accepted request
        assert!(limiter
            .check_and_record_at("ip1", start + Duration::from_secs(10))
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn clients_are_tracked_independently() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        assert!(limiter.check_and_record("ip1").await.is_allowed());
        assert!(limiter.check_and_record("ip2").await.is_allowed());
        assert!(!limiter.check_and_record("ip1").await.is_allowed());
    }

    #[tokio::test]
    async fn expired_entries_are_pruned_lazily() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        limiter.check_and_record_at("ip1", start).await;
        limiter.check_and_record_at("ip2", start).await;
        assert_eq!(limiter.client_count().await, 2);

        limiter
            .check_and_record_at("ip3", start + Duration::from_secs(5))
            .await;
        assert_eq!(limiter.client_count().await, 1);
    }

    #[tokio::test]
    async fn zero_window_disables_limiting() {
        let limiter = RateLimiter::new(Duration::ZERO);
        for _ in 0..5 {
            assert!(limiter.check_and_record("ip1").await.is_allowed());
        }
        assert_eq!(limiter.client_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_requests_admit_exactly_one() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check_and_record("shared").await.is_allowed()
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 1);
    }
}
