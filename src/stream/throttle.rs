use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::trace;

struct ThrottleInner {
    /// Available budget in micro-bytes
    budget_micro: AtomicU64,
    /// Micro-bytes added per second
    rate_micro: u64,
    /// Budget ceiling, one second of traffic
    capacity_micro: u64,
    last_refill_ms: AtomicU64,
    base: Instant,
}

/// Lock-free byte budget pacing a response body.
///
/// A rate of zero disables pacing entirely.
#[derive(Clone)]
pub struct Throttle {
    inner: Arc<ThrottleInner>,
}

impl Throttle {
    const MICRO: u64 = 1_000_000;
    const MAX_CAS_RETRIES: usize = 10;

    /// `bytes_per_sec` of sustained throughput with a one second burst
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate_micro = bytes_per_sec.saturating_mul(Self::MICRO);
        Self {
            inner: Arc::new(ThrottleInner {
                budget_micro: AtomicU64::new(rate_micro),
                rate_micro,
                capacity_micro: rate_micro,
                last_refill_ms: AtomicU64::new(0),
                base: Instant::now(),
            }),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.inner.rate_micro == 0
    }

    /// Wait until `amount` bytes may be sent
    pub async fn consume(&self, amount: usize) {
        if self.is_unlimited() {
            return;
        }

        // A chunk larger than the burst would never fit; let it drain the
        // whole budget instead.
        let wanted = (amount as u64)
            .saturating_mul(Self::MICRO)
            .min(self.inner.capacity_micro);

        loop {
            let now_ms = self.inner.base.elapsed().as_millis() as u64;
            match self.try_consume(wanted, now_ms) {
                Ok(()) => return,
                Err(wait_ms) => {
                    trace!(amount, wait_ms, "Throttling response body");
                    sleep(Duration::from_millis(wait_ms)).await;
                }
            }
        }
    }

    /// Ok on success, otherwise the milliseconds to wait before retrying
    fn try_consume(&self, wanted: u64, now_ms: u64) -> Result<(), u64> {
        let inner = &self.inner;
        let last_ms = inner.last_refill_ms.swap(now_ms, Ordering::AcqRel);
        let refill = now_ms.saturating_sub(last_ms).saturating_mul(inner.rate_micro) / 1000;

        for _ in 0..Self::MAX_CAS_RETRIES {
            let current = inner.budget_micro.load(Ordering::Acquire);
            let topped_up = current.saturating_add(refill).min(inner.capacity_micro);

            if topped_up < wanted {
                let missing = wanted - topped_up;
                let _ = inner.budget_micro.compare_exchange(
                    current,
                    topped_up,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                return Err(((missing * 1000) / inner.rate_micro).max(1));
            }

            if inner
                .budget_micro
                .compare_exchange_weak(
                    current,
                    topped_up - wanted,
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Ok(());
            }
            std::hint::spin_loop();
        }

        Err(1)
    }

    /// Current budget in bytes, without refilling
    pub fn available(&self) -> u64 {
        self.inner.budget_micro.load(Ordering::Acquire) / Self::MICRO
    }
}
