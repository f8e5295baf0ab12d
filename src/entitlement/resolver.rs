use crate::entitlement::EntitlementStore;
use crate::entitlement::record::{Entitlement, EntitlementSource, SubscriptionRecord};
use crate::storage::StorageError;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("No subscription record for subject {0}")]
    NotFound(String),

    #[error("Entitlement store unavailable: {0}")]
    Unavailable(String),

    #[error("Entitlement lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Whether a cached record may be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Cached records younger than the staleness bound are fine
    Cached,
    /// Always read the store, e.g. right after an upgrade
    Forced,
}

struct CachedRecord {
    record: SubscriptionRecord,
    fetched_at: Instant,
}

/// Resolves a subject's subscription, tolerating a bounded staleness
#[derive(Clone)]
pub struct EntitlementResolver {
    store: Arc<dyn EntitlementStore>,
    cache: Arc<DashMap<String, CachedRecord>>,
    max_staleness: Duration,
    timeout: Duration,
}

impl EntitlementResolver {
    pub fn new(store: Arc<dyn EntitlementStore>, max_staleness: Duration, timeout: Duration) -> Self {
        Self {
            store,
            cache: Arc::new(DashMap::new()),
            max_staleness,
            timeout,
        }
    }

    /// Look up the stored subscription for `subject_id`.
    ///
    /// Anonymous subjects resolve to [`SubscriptionRecord::public`] without
    /// touching the store.
    pub async fn resolve(
        &self,
        subject_id: Option<&str>,
        freshness: Freshness,
    ) -> Result<SubscriptionRecord, EntitlementError> {
        let Some(subject_id) = subject_id else {
            return Ok(SubscriptionRecord::public());
        };

        if freshness == Freshness::Cached
            && let Some(cached) = self.cache.get(subject_id)
            && cached.fetched_at.elapsed() <= self.max_staleness
        {
            return Ok(cached.record.clone());
        }

        let lookup = self.store.subscription(subject_id);
        let record = match tokio::time::timeout(self.timeout, lookup).await {
            Err(_) => return Err(EntitlementError::Timeout(self.timeout)),
            Ok(Err(StorageError::NotFound(_))) | Ok(Ok(None)) => {
                self.cache.remove(subject_id);
                return Err(EntitlementError::NotFound(subject_id.to_string()));
            }
            Ok(Err(error)) => {
                warn!(subject_id, %error, "Entitlement store lookup failed");
                return Err(EntitlementError::Unavailable(error.to_string()));
            }
            Ok(Ok(Some(record))) => record,
        };

        debug!(subject_id, tier = %record.tier, ?freshness, "Resolved subscription");
        self.cache.insert(
            subject_id.to_string(),
            CachedRecord {
                record: record.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(record)
    }

    /// Resolve the tier governing an access decision. A subject without a
    /// stored record gets the free-tier default, never anything higher.
    pub async fn entitlement_for(
        &self,
        subject_id: Option<&str>,
        freshness: Freshness,
    ) -> Result<Entitlement, EntitlementError> {
        let (record, source) = match self.resolve(subject_id, freshness).await {
            Ok(record) if subject_id.is_none() => (record, EntitlementSource::Public),
            Ok(record) => (record, EntitlementSource::Live),
            Err(EntitlementError::NotFound(subject)) => {
                debug!(subject_id = %subject, "No subscription, using free-tier default");
                (
                    SubscriptionRecord::free_default(&subject),
                    EntitlementSource::DefaultFree,
                )
            }
            Err(error) => return Err(error),
        };

        Ok(Entitlement {
            subject_id: subject_id.map(str::to_string),
            tier: record.effective_tier(Utc::now()),
            source,
        })
    }

    pub fn invalidate(&self, subject_id: &str) {
        self.cache.remove(subject_id);
    }

    /// Drop cached records older than the staleness bound, returning how
    /// many were removed
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.cache.len();
        self.cache
            .retain(|_, cached| now.saturating_duration_since(cached.fetched_at) <= self.max_staleness);
        before.saturating_sub(self.cache.len())
    }

    pub fn cached_subjects(&self) -> usize {
        self.cache.len()
    }

    pub fn start_prune_task(&self, every: Duration) {
        let resolver = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let pruned = resolver.prune(Instant::now());
                if pruned > 0 {
                    debug!(
                        pruned,
                        remaining = resolver.cached_subjects(),
                        "Pruned stale subscription records"
                    );
                }
            }
        });
    }
}
