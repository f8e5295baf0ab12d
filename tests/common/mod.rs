#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceExt;
use video_access::audit::{AuditEntry, AuditFilter, AuditStore};
use video_access::entitlement::Tier;
use video_access::storage::{MemoryVideoStore, StorageError, VideoRecord, VideoStore};
use video_access::token::{AccessToken, EntitlementMode, Permissions};
use video_access::{AppState, Config, MemoryHandles, Stores, build_routers};

pub const TEST_KEY: [u8; 32] = [7u8; 32];
pub const IDENTITY_SECRET: &str = "integration-secret";
pub const VIDEO_BYTES: usize = 1000;

/// Video store that counts lookups
#[derive(Clone, Default)]
pub struct CountingVideoStore {
    pub inner: MemoryVideoStore,
    pub lookups: Arc<AtomicUsize>,
}

impl CountingVideoStore {
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoStore for CountingVideoStore {
    async fn video(&self, id: &str) -> Result<Option<VideoRecord>, StorageError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.video(id).await
    }

    async fn increment_access_count(&self, id: &str) -> Result<u64, StorageError> {
        self.inner.increment_access_count(id).await
    }
}

pub struct Harness {
    pub external: Router,
    pub internal: Router,
    pub state: AppState,
    pub handles: MemoryHandles,
    pub videos: CountingVideoStore,
}

pub fn config() -> Config {
    Config {
        access_keys: vec![(1, TEST_KEY)],
        identity_secret: Some(IDENTITY_SECRET.to_string()),
        audit_backend: "memory".to_string(),
        ..Config::default()
    }
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: Config) -> Harness {
    build(config, None)
}

/// Harness whose audit trail goes to `audit` instead of the in-memory store
pub fn harness_with_audit(audit: Arc<dyn AuditStore>) -> Harness {
    build(config(), Some(audit))
}

fn build(config: Config, audit: Option<Arc<dyn AuditStore>>) -> Harness {
    let (mut stores, handles) = Stores::in_memory();
    if let Some(audit) = audit {
        stores.audit = audit;
    }
    let videos = CountingVideoStore {
        inner: handles.videos.clone(),
        lookups: Arc::default(),
    };
    stores.videos = Arc::new(videos.clone());

    let state = AppState::with_stores(&config, stores);
    let (external, internal) = build_routers(state.clone());
    Harness {
        external,
        internal,
        state,
        handles,
        videos,
    }
}

pub fn video(id: &str, tier_required: Tier) -> VideoRecord {
    VideoRecord {
        id: id.to_string(),
        owner_id: "owner-1".to_string(),
        is_active: true,
        is_public: false,
        link_expires_at: None,
        storage_locator: format!("{id}.mp4"),
        access_count: 0,
        tier_required,
    }
}

/// 0, 1, 2, .. 255, 0, 1, ..
pub fn video_bytes() -> Vec<u8> {
    (0..VIDEO_BYTES).map(|i| (i % 256) as u8).collect()
}

impl Harness {
    /// Register a record together with its blob
    pub fn add_video(&self, record: VideoRecord) {
        self.handles
            .blobs
            .insert(&record.storage_locator, "video/mp4", video_bytes());
        self.handles.videos.upsert(record);
    }

    pub fn sign(&self, token: &AccessToken) -> String {
        self.state.tokens().sign_token(token).unwrap()
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> (StatusCode, HeaderMap, Bytes) {
        send(&self.external, request(uri, headers)).await
    }

    /// GET as if the connection came from `peer`
    pub async fn get_from(
        &self,
        peer: &str,
        uri: &str,
        headers: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, Bytes) {
        let mut request = request(uri, headers);
        let peer: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        send(&self.external, request).await
    }

    pub async fn internal_get(&self, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(&self.internal, request).await
    }

    pub async fn internal_post(
        &self,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(&self.internal, request).await
    }

    pub async fn wait_for_audit(&self, count: usize) -> Vec<AuditEntry> {
        self.state.audit.flush().await;
        for _ in 0..200 {
            if self.handles.audit.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.handles
            .audit
            .entries(&AuditFilter::default())
            .await
            .unwrap()
    }
}

fn request(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

pub fn json(body: &Bytes) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

pub fn now_unix() -> u64 {
    Utc::now().timestamp() as u64
}

pub fn token_for(video_id: &str, subject_id: Option<&str>, tier: Tier) -> AccessToken {
    let now = now_unix();
    AccessToken {
        subject_id: subject_id.map(str::to_string),
        video_id: video_id.to_string(),
        permissions: Permissions {
            can_stream: true,
            can_download: false,
        },
        entitlement: EntitlementMode::Snapshot(tier),
        issued_at: now,
        expires_at: now + 3600,
    }
}
