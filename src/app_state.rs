use crate::Config;
use crate::audit::{AuditLogger, AuditStore, JsonlAuditStore, MemoryAuditStore};
use crate::entitlement::{EntitlementResolver, EntitlementStore};
use crate::identity::{DisabledIdentityProvider, HmacIdentityProvider, IdentityProvider};
use crate::security::{SecurityPipeline, SlidingWindowLimiter};
use crate::storage::{
    BlobStore, Catalog, FsBlobStore, MemoryBlobStore, MemorySubscriptionStore, MemoryVideoStore,
    VideoStore,
};
use crate::stream::StreamingEngine;
use crate::token::{TokenManager, TokenValidator};
use anyhow::Context as _;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Backing stores the access path consumes
#[derive(Clone)]
pub struct Stores {
    pub videos: Arc<dyn VideoStore>,
    pub subscriptions: Arc<dyn EntitlementStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Stores {
    /// Fully in-process stores, returned alongside their concrete handles
    pub fn in_memory() -> (Self, MemoryHandles) {
        let handles = MemoryHandles::default();
        let stores = Self {
            videos: Arc::new(handles.videos.clone()),
            subscriptions: Arc::new(handles.subscriptions.clone()),
            blobs: Arc::new(handles.blobs.clone()),
            audit: Arc::new(handles.audit.clone()),
        };
        (stores, handles)
    }
}

/// Concrete in-memory stores, kept for seeding and inspection
#[derive(Clone, Default)]
pub struct MemoryHandles {
    pub videos: MemoryVideoStore,
    pub subscriptions: MemorySubscriptionStore,
    pub blobs: MemoryBlobStore,
    pub audit: MemoryAuditStore,
}

#[derive(Clone)]
pub struct AppState {
    pub validator: TokenValidator,
    pub resolver: EntitlementResolver,
    pub pipeline: Arc<SecurityPipeline>,
    pub limiter: SlidingWindowLimiter,
    pub engine: StreamingEngine,
    pub audit: AuditLogger,
    pub videos: Arc<dyn VideoStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub check_timeout: Duration,
    /// Peers whose `X-Forwarded-For` is believed
    pub trusted_proxies: Arc<[IpAddr]>,
}

impl AppState {
    /// Wire the service from configuration: filesystem blobs under the
    /// workspace, catalog-seeded records and the configured audit store
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let videos_dir = config.videos_dir();
        tokio::fs::create_dir_all(&videos_dir)
            .await
            .with_context(|| format!("create {}", videos_dir.display()))?;

        let videos = MemoryVideoStore::default();
        let subscriptions = MemorySubscriptionStore::default();
        match &config.catalog {
            Some(path) => Catalog::from_file(Path::new(path))?.seed(&videos, &subscriptions),
            None => warn!("No catalog configured, starting with empty stores"),
        }

        let audit: Arc<dyn AuditStore> = match config.audit_backend.as_str() {
            "memory" => Arc::new(MemoryAuditStore::default()),
            _ => {
                let path = config.audit_path();
                info!(path = %path.display(), "Appending audit trail to file");
                Arc::new(JsonlAuditStore::open(path).await?)
            }
        };

        let stores = Stores {
            videos: Arc::new(videos),
            subscriptions: Arc::new(subscriptions),
            blobs: Arc::new(FsBlobStore::new(videos_dir)),
            audit,
        };
        Ok(Self::with_stores(config, stores))
    }

    /// Wire the service around caller-provided stores. Spawns the audit
    /// writer, so it needs a running tokio runtime.
    pub fn with_stores(config: &Config, stores: Stores) -> Self {
        if config.access_keys.is_empty() {
            warn!("No access keys configured, generated an ephemeral key");
        }
        let tokens = TokenManager::from_config(config.access_keys.clone());
        info!(kid = tokens.current_kid(), "Sealing access tokens");

        let identity: Arc<dyn IdentityProvider> = match &config.identity_secret {
            Some(secret) => Arc::new(HmacIdentityProvider::new(secret.as_bytes())),
            None => Arc::new(DisabledIdentityProvider),
        };

        let resolver = EntitlementResolver::new(
            stores.subscriptions,
            config.entitlement_staleness(),
            config.check_timeout(),
        );
        let limiter = SlidingWindowLimiter::new(config.rate_limit_requests, config.rate_limit_window());

        Self {
            validator: TokenValidator::new(tokens, resolver.clone()),
            resolver,
            pipeline: Arc::new(SecurityPipeline::standard(limiter.clone())),
            limiter,
            engine: StreamingEngine::new(stores.blobs, config.stream_rate),
            audit: AuditLogger::new(stores.audit),
            videos: stores.videos,
            identity,
            check_timeout: config.check_timeout(),
            trusted_proxies: config.trusted_proxies.clone().into(),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        self.validator.manager()
    }
}
