use crate::AppState;
use crate::audit::{AuditContext, AuditDraft, AuditKind};
use crate::error::AccessError;
use crate::security::{AccessContext, ClientInfo};
use crate::storage::VideoRecord;
use crate::stream::StreamRequest;
use crate::token::{self, Permission};
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Extension, Query, Request};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";
pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamQuery {
    pub video_id: Option<String>,
    pub token: Option<String>,
    #[serde(default)]
    pub download: bool,
}

/// Per-request bookkeeping for the audit trail
struct Scope {
    request_id: String,
    video_id: String,
    client: ClientInfo,
    subject_id: Option<String>,
}

impl Scope {
    fn draft(&self, kind: AuditKind, context: AuditContext) -> AuditDraft {
        AuditDraft {
            kind,
            subject_id: self.subject_id.clone(),
            video_id: self.video_id.clone(),
            context: AuditContext {
                request_id: Some(self.request_id.clone()),
                ip: self.client.ip.clone(),
                user_agent: self.client.user_agent.clone(),
                session_id: self.client.session_id.clone(),
                ..context
            },
        }
    }

    /// Audit a denial and render it
    fn deny(&self, state: &AppState, error: AccessError) -> Response {
        let (violation, severity) = error.violation().unzip();
        debug!(
            request_id = %self.request_id,
            video_id = %self.video_id,
            code = error.code(),
            "Access denied"
        );
        state.audit.record(self.draft(
            error.audit_kind(),
            AuditContext {
                violation,
                severity,
                code: Some(error.code().to_string()),
                status: Some(error.status().as_u16()),
                ..Default::default()
            },
        ));
        error.into_response()
    }
}

/// Client details for limiting and auditing. `X-Forwarded-For` is only
/// believed when the socket peer is a trusted proxy.
fn client_info(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> ClientInfo {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let peer_ip = peer.map(|addr| addr.ip());
    let forwarded = peer_ip
        .filter(|ip| trusted_proxies.contains(ip))
        .and_then(|_| header_str("x-forwarded-for"))
        .and_then(|value| value.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());

    ClientInfo {
        ip: forwarded.or(peer_ip).map(|ip| ip.to_string()),
        user_agent: header_str(header::USER_AGENT.as_str()).map(str::to_string),
        session_id: header_str(SESSION_HEADER).map(str::to_string),
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// `GET /stream?videoId=..&token=..[&download=true]`
///
/// Validate, then authorize, then stream. Every outcome past the videoId
/// check is audited.
pub async fn stream_video(
    Extension(state): Extension<AppState>,
    Query(query): Query<StreamQuery>,
    request: Request,
) -> Response {
    let now = Utc::now();
    let now_unix = u64::try_from(now.timestamp()).unwrap_or_default();
    let headers = request.headers();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let Some(video_id) = query.video_id.filter(|id| !id.trim().is_empty()) else {
        warn!("Stream request without videoId");
        return AccessError::MissingVideoId.into_response();
    };

    let mut scope = Scope {
        request_id: Uuid::new_v4().to_string(),
        video_id,
        client: client_info(headers, peer, &state.trusted_proxies),
        subject_id: None,
    };

    let raw_token = query.token.filter(|token| !token.is_empty()).or_else(|| {
        headers
            .get(ACCESS_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .filter(|token| !token.is_empty())
    });
    let Some(raw_token) = raw_token else {
        return scope.deny(&state, AccessError::MissingToken);
    };
    let fingerprint = token::fingerprint(&raw_token);

    let authenticated_subject = match bearer(headers) {
        Some(credential) => match state.identity.verify(credential, now_unix).await {
            Ok(subject) => Some(subject),
            Err(error) => return scope.deny(&state, error.into()),
        },
        None => None,
    };
    scope.subject_id = authenticated_subject.clone();

    let required = if query.download {
        Permission::Download
    } else {
        Permission::Stream
    };
    let access_token = match state.validator.validate(&raw_token, required, now_unix) {
        Ok(access_token) => access_token,
        Err(error) => {
            debug!(request_id = %scope.request_id, token = %fingerprint, %error, "Token rejected");
            return scope.deny(&state, error.into());
        }
    };
    if scope.subject_id.is_none() {
        scope.subject_id = access_token.subject_id.clone();
    }

    let video = match fetch_video(&state, &scope.video_id).await {
        Ok(video) => video,
        Err(error) => return scope.deny(&state, error),
    };
    let entitlement = match state.validator.entitlement(&access_token).await {
        Ok(entitlement) => entitlement,
        Err(error) => return scope.deny(&state, error.into()),
    };

    let ctx = AccessContext {
        request_id: scope.request_id.clone(),
        token: access_token,
        token_fingerprint: fingerprint,
        video,
        entitlement,
        authenticated_subject,
        client: scope.client.clone(),
        now,
        at: Instant::now(),
    };
    if let Err(violation) = state.pipeline.evaluate(&ctx) {
        return scope.deny(&state, violation.into());
    }

    let stream_request = StreamRequest {
        range: headers
            .get(header::RANGE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        download: query.download,
    };
    let response = match state
        .engine
        .serve(&ctx.video.storage_locator, &stream_request)
        .await
    {
        Ok(response) => response,
        Err(error) => return scope.deny(&state, error.into()),
    };

    spawn_access_count(&state, &ctx.video.id);

    let status = response.status();
    info!(
        request_id = %scope.request_id,
        video_id = %scope.video_id,
        token = %ctx.token_fingerprint,
        tier = %ctx.entitlement.tier,
        %status,
        "Access granted"
    );
    state.audit.record(scope.draft(
        AuditKind::AccessGranted,
        AuditContext {
            status: Some(status.as_u16()),
            ..Default::default()
        },
    ));

    response
}

/// Load the requested record, bounded by the check timeout
async fn fetch_video(state: &AppState, video_id: &str) -> Result<VideoRecord, AccessError> {
    let lookup = state.videos.video(video_id);
    match tokio::time::timeout(state.check_timeout, lookup).await {
        Err(_) => Err(AccessError::ServiceUnavailable(format!(
            "video lookup timed out after {:?}",
            state.check_timeout
        ))),
        Ok(Err(error)) => Err(error.into()),
        Ok(Ok(None)) => Err(AccessError::NotFound(video_id.to_string())),
        Ok(Ok(Some(video))) => Ok(video),
    }
}

/// Bump the counter without holding up the response
fn spawn_access_count(state: &AppState, video_id: &str) {
    let videos = state.videos.clone();
    let video_id = video_id.to_string();
    tokio::spawn(async move {
        match videos.increment_access_count(&video_id).await {
            Ok(count) => debug!(video_id, count, "Access count updated"),
            Err(error) => warn!(video_id, %error, "Failed to update access count"),
        }
    });
}
