pub mod record;
pub mod resolver;

use crate::storage::StorageError;
use async_trait::async_trait;

pub use record::{Entitlement, EntitlementSource, SubscriptionRecord, SubscriptionStatus, Tier};
pub use resolver::{EntitlementError, EntitlementResolver, Freshness};

/// Read side of the subscription document store
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn subscription(&self, subject_id: &str)
    -> Result<Option<SubscriptionRecord>, StorageError>;
}
