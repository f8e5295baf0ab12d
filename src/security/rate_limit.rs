use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sliding-window request log keyed by token/subject/IP.
///
/// Each key keeps the instants of its admitted requests inside the window;
/// a request is admitted while fewer than `max_requests` remain.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    windows: Arc<DashMap<String, VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_requests,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit a request for `key` at `now`, or return how long until the
    /// oldest request leaves the window
    pub fn check(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut log = self.windows.entry(key.to_string()).or_default();
        Self::evict(&mut log, now, self.window);

        if log.len() >= self.max_requests {
            let retry_after = log
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            return Err(retry_after.max(Duration::from_secs(1)));
        }

        log.push_back(now);
        Ok(())
    }

    fn evict(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = log.front() {
            if now.saturating_duration_since(*oldest) >= window {
                log.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drop keys whose whole log has aged out
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, log| {
            Self::evict(log, now, self.window);
            !log.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Periodically prune idle keys
    pub fn start_prune_task(&self, every: Duration) {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let pruned = limiter.prune(Instant::now());
                if pruned > 0 {
                    debug!(pruned, remaining = limiter.tracked_keys(), "Pruned rate-limit windows");
                }
            }
        });
    }
}
