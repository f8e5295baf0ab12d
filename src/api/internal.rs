use crate::AppState;
use crate::audit::{AuditFilter, InvestigatedEntry, UnreadableLine};
use crate::entitlement::{
    EntitlementError, EntitlementSource, Freshness, SubscriptionRecord, Tier,
};
use crate::error::AccessError;
use crate::token::{AccessToken, EntitlementMode, Permissions};
use axum::Json;
use axum::extract::{Extension, Path, Query};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

const DEFAULT_TTL_SECS: u64 = 3600;
const MAX_TTL_SECS: u64 = 30 * 24 * 3600;

fn default_true() -> bool {
    true
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenRequest {
    pub video_id: String,
    pub subject_id: Option<String>,
    #[serde(default = "default_true")]
    pub can_stream: bool,
    #[serde(default)]
    pub can_download: bool,
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    /// Check the subscription on every request instead of freezing the tier
    #[serde(default)]
    pub live_entitlement: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenResponse {
    pub token: String,
    pub expires_at: u64,
    /// Frozen tier, absent for live tokens
    pub tier: Option<Tier>,
}

/// `POST /tokens`
pub async fn issue_token(
    Extension(state): Extension<AppState>,
    Json(request): Json<IssueTokenRequest>,
) -> Result<Json<IssueTokenResponse>, AccessError> {
    if request.video_id.trim().is_empty() {
        return Err(AccessError::InvalidRequest("videoId cannot be empty".into()));
    }
    if request.ttl_secs == 0 || request.ttl_secs > MAX_TTL_SECS {
        return Err(AccessError::InvalidRequest(format!(
            "ttlSecs must be between 1 and {MAX_TTL_SECS}"
        )));
    }
    let subject_id = request.subject_id.filter(|subject| !subject.is_empty());

    let entitlement = if request.live_entitlement {
        EntitlementMode::Live
    } else {
        let resolved = state
            .resolver
            .entitlement_for(subject_id.as_deref(), Freshness::Cached)
            .await?;
        EntitlementMode::Snapshot(resolved.tier)
    };

    let issued_at = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
    let token = AccessToken {
        subject_id,
        video_id: request.video_id,
        permissions: Permissions {
            can_stream: request.can_stream,
            can_download: request.can_download,
        },
        entitlement,
        issued_at,
        expires_at: issued_at + request.ttl_secs,
    };

    let signed = state
        .tokens()
        .sign_token(&token)
        .map_err(|error| AccessError::Internal(error.to_string()))?;

    info!(
        video_id = %token.video_id,
        subject_id = token.subject_id.as_deref().unwrap_or("-"),
        expires_at = token.expires_at,
        token = %crate::token::fingerprint(&signed),
        "Issued access token"
    );

    Ok(Json(IssueTokenResponse {
        token: signed,
        expires_at: token.expires_at,
        tier: match token.entitlement {
            EntitlementMode::Snapshot(tier) => Some(tier),
            EntitlementMode::Live => None,
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub count: usize,
    /// Checksum mismatches plus unreadable records
    pub tamper_suspected: usize,
    pub entries: Vec<InvestigatedEntry>,
    pub unreadable: Vec<UnreadableLine>,
}

/// `GET /audit?videoId=&subjectId=&kind=&requiresInvestigation=`
pub async fn investigate_audit(
    Extension(state): Extension<AppState>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<AuditReport>, AccessError> {
    let investigation = state.audit.investigate(&filter).await?;

    Ok(Json(AuditReport {
        count: investigation.entries.len(),
        tamper_suspected: investigation.tamper_suspected(),
        entries: investigation.entries,
        unreadable: investigation.unreadable,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct EntitlementQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementReport {
    pub subject_id: String,
    pub source: EntitlementSource,
    pub effective_tier: Tier,
    pub uploads_remaining: u32,
    pub clients_remaining: u32,
    pub record: SubscriptionRecord,
}

/// `GET /entitlements/{subject_id}?refresh=true`
pub async fn inspect_entitlement(
    Extension(state): Extension<AppState>,
    Path(subject_id): Path<String>,
    Query(query): Query<EntitlementQuery>,
) -> Result<Json<EntitlementReport>, AccessError> {
    let freshness = if query.refresh {
        Freshness::Forced
    } else {
        Freshness::Cached
    };

    let (record, source) = match state.resolver.resolve(Some(&subject_id), freshness).await {
        Ok(record) => (record, EntitlementSource::Live),
        Err(EntitlementError::NotFound(_)) => (
            SubscriptionRecord::free_default(&subject_id),
            EntitlementSource::DefaultFree,
        ),
        Err(error) => return Err(error.into()),
    };

    Ok(Json(EntitlementReport {
        effective_tier: record.effective_tier(Utc::now()),
        uploads_remaining: record.uploads_remaining(),
        clients_remaining: record.clients_remaining(),
        subject_id,
        source,
        record,
    }))
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
