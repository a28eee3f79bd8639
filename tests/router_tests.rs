//! Data router against the local backend: gateway paging and CRUD, the BaaS
//! table API, token refresh on 401 and realtime alert delivery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use pulse::config::AuthBackendKind;
use pulse::model::{NewAlert, Severity};
use pulse::router::ListParams;
use pulse::server::data::ALERTS;
use pulse::server::LocalBackend;
use pulse::storage::{keys, MemoryStore};
use pulse::{DataRouter, LoginRequest, SessionStore};

async fn signed_in(backend: &LocalBackend, kind: AuthBackendKind, email: &str, password: &str) -> Result<DataRouter> {
    let cfg = backend.config(kind);
    let client = reqwest::Client::new();
    let session = Arc::new(SessionStore::from_config(&cfg, MemoryStore::shared(), client.clone()));
    session.initialize().await;
    session.login(&LoginRequest::new(email, password)).await?;
    Ok(DataRouter::new(&cfg, session, client))
}

#[tokio::test]
async fn voter_search_second_page() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let router = signed_in(&backend, AuthBackendKind::Rest, "analyst@tvk.com", "analyst123").await?;

    let page = router.voters().list(&ListParams::new().search("kumar").page(2).page_size(5)).await?;
    assert_eq!(page.total, 8);
    assert_eq!(page.items.len(), 3);
    assert!(!page.has_next());
    assert!(page.previous.is_some());

    let err = router.voters().list(&ListParams::new().search("kumar").page(3).page_size(5)).await.unwrap_err();
    assert_eq!(err.http_status(), 404);
    Ok(())
}

#[tokio::test]
async fn voter_crud_respects_permissions() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let manager = signed_in(&backend, AuthBackendKind::Rest, "manager@tvk.com", "manager123").await?;

    let created = manager.voters().create(&json!({"name": "Test Voter", "voter_id": "TNV0009999", "ward": "Ward 1"})).await?;
    assert_eq!(created.name, "Test Voter");
    let dup = manager.voters().create(&json!({"name": "Again", "voter_id": "TNV0009999"})).await.unwrap_err();
    assert_eq!(dup.http_status(), 409);

    let updated = manager.voters().update(&created.id, &json!({"ward": "Ward 2"})).await?;
    assert_eq!(updated.ward.as_deref(), Some("Ward 2"));

    let volunteer = signed_in(&backend, AuthBackendKind::Rest, "volunteer@tvk.com", "volunteer123").await?;
    let denied = volunteer.voters().delete(&created.id).await.unwrap_err();
    assert_eq!(denied.http_status(), 403);

    manager.voters().delete(&created.id).await?;
    assert_eq!(manager.voters().get(&created.id).await.unwrap_err().http_status(), 404);

    let audit = signed_in(&backend, AuthBackendKind::Rest, "admin@tvk.com", "admin123").await?;
    let log = audit.audit().list(&ListParams::new()).await?;
    assert!(log.items.iter().any(|e| e.action == "delete"));
    Ok(())
}

#[tokio::test]
async fn bulk_import_upserts_by_voter_id() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let router = signed_in(&backend, AuthBackendKind::Rest, "manager@tvk.com", "manager123").await?;

    let csv = "name,voter_id,ward\nArun Kumar,TNV0000001,Ward 43\nNew Person,TNV0000100,Ward 7\n,TNV0000101,Ward 7\n";
    let report = router.voters().bulk_import("voters.csv", csv.as_bytes().to_vec()).await?;
    assert_eq!(report.updated, 1);
    assert_eq!(report.created, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    Ok(())
}

#[tokio::test]
async fn rejected_token_is_refreshed_once_and_retried() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let router = signed_in(&backend, AuthBackendKind::Rest, "analyst@tvk.com", "analyst123").await?;
    let before = router.session().access_token();

    backend.state().tokens.expire_access();
    let stats = router.news().sentiment_stats(7).await?;
    assert!(stats.total_articles > 0);
    assert_ne!(router.session().access_token(), before);
    assert!(router.session().is_authenticated());

    // With the refresh token gone too, the call fails and the session ends.
    backend.state().tokens.revoke_all();
    let err = router.news().sentiment_stats(7).await.unwrap_err();
    assert_eq!(err.http_status(), 401);
    assert!(!router.session().is_authenticated());
    Ok(())
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let router = signed_in(&backend, AuthBackendKind::Rest, "manager@tvk.com", "manager123").await?;
    backend.state().tokens.expire_access();

    let news = router.news();
    let calls = (0..4).map(|_| news.sentiment_stats(7));
    let exchanges_before = backend.state().tokens.exchange_count();
    let results = futures::future::join_all(calls).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(router.session().is_authenticated());
    assert_eq!(backend.state().tokens.exchange_count() - exchanges_before, 1);
    Ok(())
}

#[tokio::test]
async fn out_of_range_window_is_a_bad_request() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let router = signed_in(&backend, AuthBackendKind::Rest, "analyst@tvk.com", "analyst123").await?;

    let err = router.news().sentiment_stats(u32::MAX).await.unwrap_err();
    assert_eq!(err.http_status(), 400);
    assert_eq!(router.news().trending_topics(u32::MAX, 3).await.unwrap_err().http_status(), 400);

    // the server is still answering
    assert!(router.news().sentiment_stats(7).await?.total_articles > 0);
    Ok(())
}

#[tokio::test]
async fn trending_topics_and_news_filters() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let router = signed_in(&backend, AuthBackendKind::Rest, "user@tvk.com", "user123").await?;

    let trending = router.news().trending_topics(30, 3).await?;
    assert!(trending.trending_topics.len() <= 3);
    let water = trending.trending_topics.iter().find(|t| t.topic == "water").expect("water topic");
    assert_eq!(water.count, 2);

    let trend = router.news().sentiment_trend(30).await?;
    assert!(!trend.is_empty());
    assert!(trend.windows(2).all(|w| w[0].date < w[1].date));
    Ok(())
}

#[tokio::test]
async fn baas_tables_profile_and_notifications() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let router = signed_in(&backend, AuthBackendKind::Baas, "user@tvk.com", "user123").await?;

    let me = router.session().identity().expect("signed in");
    let profile = router.users().get_profile(&me.id).await?;
    assert_eq!(profile.email.as_deref(), Some("user@tvk.com"));

    let notes = router.notifications().list(&me.id).await?;
    assert_eq!(notes.len(), 2);
    assert!(notes[0].created_at >= notes[1].created_at);
    let unread = notes.iter().find(|n| !n.is_read).expect("an unread notification");
    router.notifications().mark_as_read(&unread.id).await?;
    assert!(router.notifications().list(&me.id).await?.iter().all(|n| n.is_read));

    // Another user's notifications never come back.
    assert!(router.notifications().list("2").await?.is_empty());

    let hot = router.issues().hot_topics().await?;
    assert_eq!(hot.len(), 2);

    let alerts = router.alerts().list(Some(Severity::Critical), Some(5)).await?;
    assert_eq!(alerts.len(), 1);
    Ok(())
}

#[tokio::test]
async fn profile_update_cannot_touch_role() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let router = signed_in(&backend, AuthBackendKind::Rest, "user@tvk.com", "user123").await?;

    let updated = router.users().update_profile(&json!({"name": "Field Worker Two"})).await?;
    assert_eq!(updated.name, "Field Worker Two");
    let err = router.users().update_profile(&json!({"role": "admin"})).await.unwrap_err();
    assert_eq!(err.http_status(), 403);
    Ok(())
}

#[tokio::test]
async fn alert_subscription_delivers_inserts_until_unsubscribed() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let router = signed_in(&backend, AuthBackendKind::Rest, "manager@tvk.com", "manager123").await?;

    let mut sub = router.alerts().subscribe().await?;
    assert_eq!(sub.topic(), "realtime:alerts");

    let created = router
        .alerts()
        .create(&NewAlert {
            title: "Rally permit pending".into(),
            message: None,
            severity: Severity::High,
            alert_type: Some("operations".into()),
            constituency: Some("Coimbatore South".into()),
        })
        .await?;
    let got = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await?.expect("alert delivered");
    assert_eq!(got.id, created.id);
    assert_eq!(got.severity, Severity::High);

    // Rows from other tables do not reach this feed.
    backend.state().data.insert("api_notification", json!({"user_id": "2", "title": "x", "message": "y"}));
    backend.state().data.insert(ALERTS, json!({"title": "Second", "severity": "low"}));
    let second = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await?.expect("second alert");
    assert_eq!(second.title, "Second");

    tokio::time::timeout(Duration::from_secs(5), sub.unsubscribe()).await?;
    Ok(())
}

#[tokio::test]
async fn anonymous_calls_are_rejected_without_refresh() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let cfg = backend.config(AuthBackendKind::Rest);
    let store = MemoryStore::shared();
    let session = Arc::new(SessionStore::from_config(&cfg, store.clone(), reqwest::Client::new()));
    session.initialize().await;
    let router = DataRouter::new(&cfg, session, reqwest::Client::new());

    let err = router.voters().list(&ListParams::new()).await.unwrap_err();
    assert_eq!(err.http_status(), 401);
    assert!(store.get(keys::ACCESS_TOKEN)?.is_none());
    Ok(())
}
