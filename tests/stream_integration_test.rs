mod common;

use axum::http::{StatusCode, header};
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use std::time::Duration;
use video_access::audit::AuditKind;
use video_access::entitlement::{SubscriptionRecord, SubscriptionStatus, Tier};
use video_access::identity::HmacIdentityProvider;
use video_access::security::{Severity, ViolationKind};
use video_access::storage::VideoStore;
use video_access::token::EntitlementMode;

fn stream_uri(video_id: &str, token: &str) -> String {
    format!("/stream?videoId={video_id}&token={token}")
}

#[tokio::test]
async fn test_missing_video_id_is_rejected_without_audit() {
    let harness = harness();

    let (status, _, body) = harness.get("/stream?token=abc", &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["code"], "MISSING_VIDEO_ID");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(harness.handles.audit.is_empty());
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));

    let (status, _, body) = harness.get("/stream?videoId=v1", &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json(&body)["code"], "MISSING_TOKEN");

    let entries = harness.wait_for_audit(1).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, AuditKind::AccessDenied);
    assert_eq!(entries[0].video_id, "v1");
}

#[tokio::test]
async fn test_expired_token_denied_before_storage() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));

    let mut token = token_for("v1", Some("alice"), Tier::Premium);
    token.issued_at -= 7200;
    token.expires_at = now_unix() - 10;
    let signed = harness.sign(&token);

    let (status, _, body) = harness.get(&stream_uri("v1", &signed), &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json(&body)["code"], "EXPIRED_TOKEN");
    assert_eq!(harness.videos.lookups(), 0);

    let entries = harness.wait_for_audit(1).await;
    assert_eq!(entries[0].kind, AuditKind::AccessDenied);
    assert_eq!(entries[0].context.code.as_deref(), Some("EXPIRED_TOKEN"));
}

#[tokio::test]
async fn test_garbage_token_is_malformed() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));

    let (status, _, body) = harness.get(&stream_uri("v1", "not-a-token"), &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json(&body)["code"], "MALFORMED_TOKEN");
    assert_eq!(harness.videos.lookups(), 0);
}

#[tokio::test]
async fn test_token_in_header_is_accepted() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));

    let (status, _, _) = harness
        .get("/stream?videoId=v1", &[("x-access-token", signed.as_str())])
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_video_is_not_found() {
    let harness = harness();
    let signed = harness.sign(&token_for("ghost", None, Tier::Free));

    let (status, _, body) = harness.get(&stream_uri("ghost", &signed), &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body)["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_inactive_video_is_unavailable() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    assert!(harness.handles.videos.set_active("v1", false));
    let signed = harness.sign(&token_for("v1", Some("alice"), Tier::Enterprise));

    let (status, _, body) = harness.get(&stream_uri("v1", &signed), &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let body = json(&body);
    assert_eq!(body["code"], "RESOURCE_UNAVAILABLE");
    assert_eq!(body["violation"], "expired_url");
    assert_eq!(body["severity"], "low");
}

#[tokio::test]
async fn test_expired_link_is_gone() {
    let harness = harness();
    let mut record = video("v1", Tier::Free);
    record.link_expires_at = Some(Utc::now() - ChronoDuration::minutes(5));
    harness.add_video(record);
    let signed = harness.sign(&token_for("v1", None, Tier::Free));

    let (status, _, body) = harness.get(&stream_uri("v1", &signed), &[]).await;
    assert_eq!(status, StatusCode::GONE);
    let body = json(&body);
    assert_eq!(body["code"], "RESOURCE_UNAVAILABLE");
    assert_eq!(body["violation"], "expired_url");
}

#[tokio::test]
async fn test_binding_mismatch_is_flagged_for_investigation() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    harness.add_video(video("v2", Tier::Free));
    let signed = harness.sign(&token_for("v1", Some("alice"), Tier::Free));

    let (status, _, body) = harness.get(&stream_uri("v2", &signed), &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let body = json(&body);
    assert_eq!(body["code"], "BINDING_MISMATCH");
    assert_eq!(body["severity"], "high");

    let entries = harness.wait_for_audit(1).await;
    let entry = &entries[0];
    assert_eq!(entry.kind, AuditKind::SecurityViolation);
    assert_eq!(entry.video_id, "v2");
    assert_eq!(entry.subject_id.as_deref(), Some("alice"));
    assert_eq!(entry.context.violation, Some(ViolationKind::UnauthorizedAccess));
    assert_eq!(entry.context.severity, Some(Severity::High));
    assert!(entry.requires_investigation);
}

#[tokio::test]
async fn test_insufficient_tier_is_denied() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Premium));
    let signed = harness.sign(&token_for("v1", Some("alice"), Tier::Basic));

    let (status, _, body) = harness.get(&stream_uri("v1", &signed), &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let body = json(&body);
    assert_eq!(body["code"], "ENTITLEMENT_INSUFFICIENT");
    assert_eq!(body["violation"], "invalid_subscription");
}

#[tokio::test]
async fn test_owner_bypasses_tier() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Enterprise));
    let signed = harness.sign(&token_for("v1", Some("owner-1"), Tier::Free));

    let (status, _, _) = harness.get(&stream_uri("v1", &signed), &[]).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_live_entitlement_follows_subscription() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Premium));

    let mut token = token_for("v1", Some("bob"), Tier::Free);
    token.entitlement = EntitlementMode::Live;
    let signed = harness.sign(&token);

    // No record yet: bob is on the free default
    let (status, _, _) = harness.get(&stream_uri("v1", &signed), &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    harness.handles.subscriptions.upsert(SubscriptionRecord {
        tier: Tier::Premium,
        status: SubscriptionStatus::Active,
        expiry_date: Some(Utc::now() + ChronoDuration::days(30)),
        ..SubscriptionRecord::free_default("bob")
    });
    harness.state.resolver.invalidate("bob");

    let (status, _, _) = harness.get(&stream_uri("v1", &signed), &[]).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_download_requires_permission() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));

    let uri = format!("{}&download=true", stream_uri("v1", &signed));
    let (status, _, body) = harness.get(&uri, &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json(&body)["code"], "PERMISSION_DENIED");
}

#[tokio::test]
async fn test_download_sets_attachment() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    let mut token = token_for("v1", None, Tier::Free);
    token.permissions.can_download = true;
    let signed = harness.sign(&token);

    let uri = format!("{}&download=true", stream_uri("v1", &signed));
    let (status, headers, _) = harness.get(&uri, &[]).await;
    assert_eq!(status, StatusCode::OK);
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment"));
}

#[tokio::test]
async fn test_full_response_without_range() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));

    let (status, headers, body) = harness.get(&stream_uri("v1", &signed), &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_LENGTH], "1000");
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert!(headers.get(header::CONTENT_RANGE).is_none());
    assert_eq!(body.as_ref(), video_bytes().as_slice());

    let entries = harness.wait_for_audit(1).await;
    assert_eq!(entries[0].kind, AuditKind::AccessGranted);
    assert_eq!(entries[0].context.status, Some(200));
}

#[tokio::test]
async fn test_partial_response_for_range() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));

    let (status, headers, body) = harness
        .get(&stream_uri("v1", &signed), &[("range", "bytes=0-99")])
        .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-99/1000");
    assert_eq!(headers[header::CONTENT_LENGTH], "100");
    assert_eq!(body.as_ref(), &video_bytes()[..100]);

    let (status, headers, body) = harness
        .get(&stream_uri("v1", &signed), &[("range", "bytes=-10")])
        .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 990-999/1000");
    assert_eq!(body.as_ref(), &video_bytes()[990..]);
}

#[tokio::test]
async fn test_unsatisfiable_range_falls_back_to_full() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));

    let (status, headers, body) = harness
        .get(&stream_uri("v1", &signed), &[("range", "bytes=5000-6000")])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_LENGTH], "1000");
    assert_eq!(body.len(), VIDEO_BYTES);
}

#[tokio::test]
async fn test_missing_blob_is_not_found() {
    let harness = harness();
    harness.handles.videos.upsert(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));

    let (status, _, body) = harness.get(&stream_uri("v1", &signed), &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body)["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_rate_limit_reports_retry_after() {
    let mut config = config();
    config.rate_limit_requests = 2;
    config.rate_limit_window_secs = 60;
    let harness = harness_with(config);
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));
    let uri = stream_uri("v1", &signed);

    for _ in 0..2 {
        let (status, _, _) = harness.get(&uri, &[]).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, headers, body) = harness.get(&uri, &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let body = json(&body);
    assert_eq!(body["code"], "RATE_LIMITED");
    let retry_after = body["retryAfter"].as_u64().unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(
        headers[header::RETRY_AFTER].to_str().unwrap(),
        retry_after.to_string()
    );

    let entries = harness.wait_for_audit(3).await;
    let violation = entries
        .iter()
        .find(|entry| entry.kind == AuditKind::SecurityViolation)
        .unwrap();
    assert_eq!(violation.context.violation, Some(ViolationKind::RateLimitExceeded));
    assert_eq!(violation.context.severity, Some(Severity::Medium));
    assert!(!violation.requires_investigation);
}

#[tokio::test]
async fn test_forwarded_for_rotation_is_still_limited() {
    let mut config = config();
    config.rate_limit_requests = 1;
    let harness = harness_with(config);
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));
    let uri = stream_uri("v1", &signed);

    let (status, _, _) = harness
        .get_from("192.0.2.50:4000", &uri, &[("x-forwarded-for", "198.51.100.0")])
        .await;
    assert_eq!(status, StatusCode::OK);

    for i in 1..5 {
        let forwarded = format!("198.51.100.{i}");
        let (status, _, body) = harness
            .get_from("192.0.2.50:4000", &uri, &[("x-forwarded-for", &forwarded)])
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json(&body)["code"], "RATE_LIMITED");
    }

    // Without a socket peer the header is ignored too
    let (status, _, _) = harness.get(&uri, &[("x-forwarded-for", "198.51.100.9")]).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = harness.get(&uri, &[("x-forwarded-for", "198.51.100.10")]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_rate_limit_is_per_client_behind_trusted_proxy() {
    let mut config = config();
    config.rate_limit_requests = 1;
    config.trusted_proxies = vec!["10.0.0.1".parse().unwrap()];
    let harness = harness_with(config);
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));
    let uri = stream_uri("v1", &signed);

    let proxy = "10.0.0.1:443";
    let (status, _, _) = harness.get_from(proxy, &uri, &[("x-forwarded-for", "203.0.113.1")]).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = harness.get_from(proxy, &uri, &[("x-forwarded-for", "203.0.113.1")]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = harness.get_from(proxy, &uri, &[("x-forwarded-for", "203.0.113.2")]).await;
    assert_eq!(status, StatusCode::OK);

    let entries = harness.wait_for_audit(3).await;
    assert!(
        entries
            .iter()
            .any(|entry| entry.context.ip.as_deref() == Some("203.0.113.2"))
    );
    assert!(
        entries
            .iter()
            .all(|entry| entry.context.ip.as_deref() != Some("10.0.0.1"))
    );
}

#[tokio::test]
async fn test_concurrent_access_counts() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));
    let uri = stream_uri("v1", &signed);

    let requests = (0..10).map(|_| harness.get(&uri, &[]));
    for (status, _, _) in futures::future::join_all(requests).await {
        assert_eq!(status, StatusCode::OK);
    }

    let mut count = 0;
    for _ in 0..200 {
        count = harness.handles.videos.video("v1").await.unwrap().unwrap().access_count;
        if count == 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(count, 10);
}

#[tokio::test]
async fn test_bearer_credential_attributes_subject() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", Some("alice"), Tier::Free));
    let credential = HmacIdentityProvider::new(IDENTITY_SECRET)
        .issue("alice", now_unix() + 600)
        .unwrap();
    let authorization = format!("Bearer {credential}");

    let (status, _, _) = harness
        .get(&stream_uri("v1", &signed), &[("authorization", authorization.as_str())])
        .await;
    assert_eq!(status, StatusCode::OK);

    let entries = harness.wait_for_audit(1).await;
    assert_eq!(entries[0].subject_id.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_bearer_for_another_subject_is_session_mismatch() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", Some("alice"), Tier::Free));
    let credential = HmacIdentityProvider::new(IDENTITY_SECRET)
        .issue("mallory", now_unix() + 600)
        .unwrap();
    let authorization = format!("Bearer {credential}");

    let (status, _, body) = harness
        .get(&stream_uri("v1", &signed), &[("authorization", authorization.as_str())])
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let body = json(&body);
    assert_eq!(body["code"], "SESSION_MISMATCH");
    assert_eq!(body["violation"], "session_mismatch");
}

#[tokio::test]
async fn test_invalid_bearer_is_unauthorized() {
    let harness = harness();
    harness.add_video(video("v1", Tier::Free));
    let signed = harness.sign(&token_for("v1", None, Tier::Free));
    let forged = HmacIdentityProvider::new("wrong-secret")
        .issue("alice", now_unix() + 600)
        .unwrap();
    let authorization = format!("Bearer {forged}");

    let (status, _, body) = harness
        .get(&stream_uri("v1", &signed), &[("authorization", authorization.as_str())])
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json(&body)["code"], "INVALID_CREDENTIAL");
    assert_eq!(harness.videos.lookups(), 0);
}
