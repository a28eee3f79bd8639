//! Session lifecycle against the local backend: login, restore, refresh and
//! logout for each auth backend, checked through the persisted keys.

use std::sync::Arc;

use anyhow::Result;

use pulse::config::AuthBackendKind;
use pulse::server::LocalBackend;
use pulse::storage::{keys, MemoryStore, SharedStore};
use pulse::{LoginRequest, Role, SessionState, SessionStore};

fn session_over(backend: &LocalBackend, kind: AuthBackendKind, store: SharedStore) -> SessionStore {
    SessionStore::from_config(&backend.config(kind), store, reqwest::Client::new())
}

async fn logged_in(backend: &LocalBackend, kind: AuthBackendKind, email: &str, password: &str) -> Result<SharedStore> {
    let store = MemoryStore::shared();
    let session = session_over(backend, kind, store.clone());
    session.initialize().await;
    session.login(&LoginRequest::new(email, password)).await?;
    Ok(store)
}

#[tokio::test]
async fn restore_with_valid_tokens_is_authenticated() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let store = logged_in(&backend, AuthBackendKind::Rest, "manager@tvk.com", "manager123").await?;

    let restored = session_over(&backend, AuthBackendKind::Rest, store.clone());
    assert_eq!(restored.state(), SessionState::Uninitialized);
    let end = restored.initialize().await;
    let id = end.identity().expect("restored identity");
    assert_eq!(id.email, "manager@tvk.com");
    assert_eq!(id.role, Role::Manager);
    assert!(restored.has_permission("data:manage"));
    assert!(!restored.has_permission("users:delete"));
    assert_eq!(store.get(keys::REMEMBER_ME)?.as_deref(), Some("true"));
    Ok(())
}

#[tokio::test]
async fn expired_access_is_refreshed_during_restore() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let store = logged_in(&backend, AuthBackendKind::Rest, "analyst@tvk.com", "analyst123").await?;
    let stale = store.get(keys::ACCESS_TOKEN)?;
    backend.state().tokens.expire_access();

    let restored = session_over(&backend, AuthBackendKind::Rest, store.clone());
    assert!(restored.initialize().await.identity().is_some());
    let fresh = store.get(keys::ACCESS_TOKEN)?;
    assert!(fresh.is_some());
    assert_ne!(fresh, stale);
    Ok(())
}

#[tokio::test]
async fn restore_with_both_tokens_invalid_ends_anonymous_and_clears() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let store = logged_in(&backend, AuthBackendKind::Rest, "user@tvk.com", "user123").await?;
    backend.state().tokens.revoke_all();

    let restored = session_over(&backend, AuthBackendKind::Rest, store.clone());
    assert_eq!(restored.initialize().await, SessionState::Anonymous);
    assert!(!restored.is_authenticated());
    assert!(store.get(keys::ACCESS_TOKEN)?.is_none());
    assert!(store.get(keys::REFRESH_TOKEN)?.is_none());
    assert!(store.get(keys::USER)?.is_none());
    Ok(())
}

#[tokio::test]
async fn logout_ends_anonymous_even_when_server_fails() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let store = MemoryStore::shared();
    let session = session_over(&backend, AuthBackendKind::Rest, store.clone());
    session.initialize().await;
    session.login(&LoginRequest::new("admin@tvk.com", "admin123")).await?;
    assert!(session.has_permission("anything:at-all"));

    backend.state().fail_logout(true);
    session.logout().await;
    assert_eq!(session.state(), SessionState::Anonymous);
    assert!(!session.has_permission("data:view"));
    assert!(store.get(keys::ACCESS_TOKEN)?.is_none());
    assert!(store.get(keys::REFRESH_TOKEN)?.is_none());
    Ok(())
}

#[tokio::test]
async fn wrong_password_persists_nothing() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let store = MemoryStore::shared();
    let session = session_over(&backend, AuthBackendKind::Rest, store.clone());
    session.initialize().await;

    let err = session.login(&LoginRequest::new("admin@tvk.com", "nope")).await.unwrap_err();
    assert!(err.is_auth());
    assert_eq!(session.state(), SessionState::Anonymous);
    assert!(store.keys()?.is_empty());

    // Client-side validation never reaches the server.
    let err = session.login(&LoginRequest::new("not-an-email", "x")).await.unwrap_err();
    assert_eq!(err.code_str(), "email_invalid");
    Ok(())
}

#[tokio::test]
async fn baas_backend_round_trip() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let store = logged_in(&backend, AuthBackendKind::Baas, "user@tvk.com", "user123").await?;

    let restored = Arc::new(session_over(&backend, AuthBackendKind::Baas, store.clone()));
    let id = restored.initialize().await.identity().cloned().expect("restored identity");
    assert_eq!(id.role, Role::User);
    assert_eq!(id.ward.as_deref(), Some("Ward 42"));
    assert!(restored.is_field_worker());

    restored.logout().await;
    assert!(store.get(keys::ACCESS_TOKEN)?.is_none());
    Ok(())
}

#[tokio::test]
async fn mock_backend_needs_no_server() -> Result<()> {
    let cfg = pulse::Config { auth_backend: AuthBackendKind::Mock, ..Default::default() };
    let store = MemoryStore::shared();
    let session = SessionStore::from_config(&cfg, store.clone(), reqwest::Client::new());
    assert_eq!(session.initialize().await, SessionState::Anonymous);

    let id = session.login(&LoginRequest::new("volunteer@tvk.com", "volunteer123")).await?;
    assert_eq!(id.role, Role::Volunteer);

    let again = SessionStore::from_config(&cfg, store, reqwest::Client::new());
    assert_eq!(again.initialize().await.identity().map(|i| i.id.clone()), Some("5".to_string()));
    Ok(())
}

#[tokio::test]
async fn refresh_identity_picks_up_server_side_role_change() -> Result<()> {
    let backend = LocalBackend::start().await?;
    let store = MemoryStore::shared();
    let session = session_over(&backend, AuthBackendKind::Rest, store.clone());
    session.initialize().await;

    let err = session.refresh_identity().await.unwrap_err();
    assert_eq!(err.code_str(), "no_session");

    let before = session.login(&LoginRequest::new("user@tvk.com", "user123")).await?;
    assert_eq!(before.role, Role::User);
    assert!(!session.has_permission("data:manage"));

    backend.state().accounts.grant(&before.id, Role::Manager, &["data:manage"])?;
    let after = session.refresh_identity().await?;
    assert_eq!(after.role, Role::Manager);
    assert_eq!(session.state(), SessionState::Authenticated(after.clone()));
    assert!(session.has_permission("data:manage"));

    let snapshot: pulse::Identity = serde_json::from_str(&store.get(keys::USER)?.expect("identity snapshot"))?;
    assert_eq!(snapshot, after);
    Ok(())
}
