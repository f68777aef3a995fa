use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::repository::RepoResult;

/// Admission control keyed by an arbitrary string (e.g. `driver:trip`).
/// Injected into the services that need it so a shared backend can replace
/// the in-process one in multi-instance deployments.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// `true` when the call identified by `key` may proceed.
    async fn check(&self, key: &str) -> RepoResult<bool>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

struct Windows {
    by_key: HashMap<String, Window>,
    last_sweep: Instant,
}

/// In-process fixed-window counter. Expired windows are swept at most once
/// per window length, so memory tracks the keys seen recently.
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: RwLock<Windows>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            windows: RwLock::new(Windows { by_key: HashMap::new(), last_sweep: Instant::now() }),
        }
    }

    pub fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.windows.read().await.by_key.len()
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn check(&self, key: &str) -> RepoResult<bool> {
        let mut windows = self.windows.write().await;
        let now = Instant::now();

        if now.duration_since(windows.last_sweep) >= self.window {
            let window = self.window;
            windows.by_key.retain(|_, w| now.duration_since(w.started) < window);
            windows.last_sweep = now;
        }

        let entry = windows
            .by_key
            .entry(key.to_string())
            .or_insert(Window { started: now, count: 0 });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }

        if entry.count >= self.limit {
            return Ok(false);
        }
        entry.count += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_window() {
        let limiter = FixedWindowLimiter::per_second(2);

        assert!(limiter.check("driver:trip").await.unwrap());
        assert!(limiter.check("driver:trip").await.unwrap());
        assert!(!limiter.check("driver:trip").await.unwrap());

        // separate keys have separate windows
        assert!(limiter.check("driver:other-trip").await.unwrap());
    }

    #[tokio::test]
    async fn test_window_resets() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_millis(30));

        assert!(limiter.check("k").await.unwrap());
        assert!(!limiter.check("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(limiter.check("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_windows_are_evicted() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_millis(30));
        for trip in 0..50 {
            assert!(limiter.check(&format!("driver:{}", trip)).await.unwrap());
        }
        assert_eq!(limiter.tracked_keys().await, 50);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(limiter.check("driver:new").await.unwrap());
        assert_eq!(limiter.tracked_keys().await, 1);

        // a live window survives the sweep
        assert!(!limiter.check("driver:new").await.unwrap());
    }
}
