use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::authorizer;
use super::principal::Identity;
use super::provider::{AuthBackend, CredentialPair, LoginRequest};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::storage::{keys, SharedStore};
use crate::tprintln;

/// Lifecycle of the client session.
///
/// `Uninitialized` only exists before `initialize` runs; `Restoring` only while it
/// runs. Every other transition goes through `login`, `logout` or a failed refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Restoring,
    Authenticated(Identity),
    Anonymous,
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            SessionState::Authenticated(id) => Some(id),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Restoring => "restoring",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Anonymous => "anonymous",
        }
    }
}

/// Process-wide session, shared as `Arc<SessionStore>` by everything that needs
/// the identity, a permission check or the current access token.
///
/// The identity is private to this type; it changes only through the state
/// machine transitions below, which are serialized by `transitions`.
pub struct SessionStore {
    backend: AuthBackend,
    storage: SharedStore,
    state: watch::Sender<SessionState>,
    transitions: Mutex<()>,
}

impl SessionStore {
    pub fn new(backend: AuthBackend, storage: SharedStore) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self { backend, storage, state, transitions: Mutex::new(()) }
    }

    pub fn from_config(cfg: &Config, storage: SharedStore, client: reqwest::Client) -> Self {
        Self::new(AuthBackend::from_config(cfg, client), storage)
    }

    pub fn backend(&self) -> &AuthBackend { &self.backend }

    pub fn state(&self) -> SessionState { self.state.borrow().clone() }

    pub fn identity(&self) -> Option<Identity> { self.state.borrow().identity().cloned() }

    pub fn is_authenticated(&self) -> bool { matches!(*self.state.borrow(), SessionState::Authenticated(_)) }

    /// True until `initialize` has settled on authenticated or anonymous.
    pub fn is_initializing(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::Uninitialized | SessionState::Restoring)
    }

    /// Observe transitions (the receiver always holds the latest state).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> { self.state.subscribe() }

    pub fn has_permission(&self, permission: &str) -> bool {
        authorizer::evaluate(self.state.borrow().identity(), permission)
    }

    pub fn is_field_worker(&self) -> bool {
        authorizer::is_field_worker(self.state.borrow().identity())
    }

    /// Current access token, if one is persisted. A storage read failure counts as none.
    pub fn access_token(&self) -> Option<String> {
        match self.storage.get(keys::ACCESS_TOKEN) {
            Ok(t) => t.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(target: "pulse::session", "failed to read access token: {}", e);
                None
            }
        }
    }

    pub fn remembered(&self) -> bool {
        matches!(self.storage.get(keys::REMEMBER_ME), Ok(Some(v)) if v == "true")
    }

    /// Restore a persisted session. Always ends authenticated or anonymous.
    pub async fn initialize(&self) -> SessionState {
        let _gate = self.transitions.lock().await;
        self.set_state(SessionState::Restoring);
        let end = match self.restore().await {
            Ok(Some(identity)) => {
                info!(target: "pulse::session", "session restored user={} role={}", identity.email, identity.role);
                SessionState::Authenticated(identity)
            }
            Ok(None) => SessionState::Anonymous,
            Err(e) => {
                warn!(target: "pulse::session", "session restore failed: {}", e);
                self.clear_credentials();
                SessionState::Anonymous
            }
        };
        self.set_state(end.clone());
        end
    }

    async fn restore(&self) -> AppResult<Option<Identity>> {
        let Some(access) = self.storage.get(keys::ACCESS_TOKEN)? else {
            debug!(target: "pulse::session", "no access token persisted");
            return Ok(None);
        };
        match self.backend.resolve_identity(&access).await {
            Ok(identity) => {
                self.write_snapshot(&identity)?;
                return Ok(Some(identity));
            }
            Err(e) => warn!(target: "pulse::session", "identity resolution failed: {}", e),
        }

        // Exactly one refresh-and-retry; an orphaned token is dropped either way.
        let Some(refresh) = self.storage.get(keys::REFRESH_TOKEN)? else {
            info!(target: "pulse::session", "no refresh token, clearing session");
            self.clear_credentials();
            return Ok(None);
        };
        let retried = async {
            let creds = self.backend.refresh(&refresh).await?;
            self.write_credentials(&creds)?;
            debug!(target: "pulse::session", "token refreshed, retrying identity resolution");
            let identity = self.backend.resolve_identity(&creds.access).await?;
            self.write_snapshot(&identity)?;
            Ok::<_, AppError>(identity)
        }
        .await;
        match retried {
            Ok(identity) => Ok(Some(identity)),
            Err(e) => {
                warn!(target: "pulse::session", "refresh-and-retry failed, clearing session: {}", e);
                self.clear_credentials();
                Ok(None)
            }
        }
    }

    /// Exchange credentials, resolve the identity, then commit both.
    ///
    /// Nothing is persisted and the state is untouched unless every step succeeds.
    pub async fn login(&self, req: &LoginRequest) -> AppResult<Identity> {
        req.validate()?;
        let _gate = self.transitions.lock().await;
        info!(target: "pulse::session", "login attempt email={}", req.email.trim());

        let creds = self.backend.login(&req.email, &req.password).await.map_err(|e| {
            warn!(target: "pulse::session", "login rejected email={}: {}", req.email.trim(), e);
            e
        })?;
        let identity = self.backend.resolve_identity(&creds.access).await.map_err(|e| {
            warn!(target: "pulse::session", "profile resolution after login failed: {}", e);
            e
        })?;

        let committed = self
            .write_credentials(&creds)
            .and_then(|_| self.write_snapshot(&identity))
            .and_then(|_| self.storage.set(keys::REMEMBER_ME, if req.remember_me { "true" } else { "false" }));
        if let Err(e) = committed {
            warn!(target: "pulse::session", "could not persist session: {}", e);
            self.clear_credentials();
            self.set_state(SessionState::Anonymous);
            return Err(e);
        }

        tprintln!("session.login user={} role={}", identity.email, identity.role);
        info!(target: "pulse::session", "login ok user={} role={}", identity.email, identity.role);
        self.set_state(SessionState::Authenticated(identity.clone()));
        Ok(identity)
    }

    /// Best-effort server invalidation, then an unconditional local sign-out.
    pub async fn logout(&self) {
        let _gate = self.transitions.lock().await;
        if let Some(creds) = self.stored_credentials() {
            if let Err(e) = self.backend.logout(&creds).await {
                warn!(target: "pulse::session", "server-side logout failed (ignored): {}", e);
            }
        }
        self.clear_credentials();
        self.set_state(SessionState::Anonymous);
        info!(target: "pulse::session", "logged out");
    }

    /// Refresh after the gateway rejected `stale`.
    ///
    /// Concurrent callers queue on the transition gate; whoever runs after the
    /// token already changed gets the new token without another round trip. A
    /// failed refresh ends the session.
    pub async fn refresh_access(&self, stale: &str) -> AppResult<String> {
        let _gate = self.transitions.lock().await;
        let Some(current) = self.access_token() else {
            return Err(AppError::auth("no_session", "not signed in"));
        };
        if current != stale {
            debug!(target: "pulse::session", "token already refreshed by a concurrent caller");
            return Ok(current);
        }
        let refresh = match self.storage.get(keys::REFRESH_TOKEN) {
            Ok(Some(r)) => r,
            Ok(None) => {
                self.expire("no refresh token");
                return Err(AppError::auth("session_expired", "session expired, please sign in again"));
            }
            Err(e) => {
                self.expire("refresh token unreadable");
                return Err(e);
            }
        };
        match self.backend.refresh(&refresh).await {
            Ok(creds) => {
                self.write_credentials(&creds)?;
                info!(target: "pulse::session", "access token refreshed");
                Ok(creds.access)
            }
            Err(e) => {
                self.expire(e.message());
                Err(e)
            }
        }
    }

    /// Re-resolve the identity for the current token (role/permission changes).
    pub async fn refresh_identity(&self) -> AppResult<Identity> {
        let _gate = self.transitions.lock().await;
        let access = self.access_token().ok_or_else(|| AppError::auth("no_session", "not signed in"))?;
        let identity = self.backend.resolve_identity(&access).await?;
        self.write_snapshot(&identity)?;
        self.set_state(SessionState::Authenticated(identity.clone()));
        Ok(identity)
    }

    fn stored_credentials(&self) -> Option<CredentialPair> {
        let access = self.access_token()?;
        let refresh = self.storage.get(keys::REFRESH_TOKEN).ok().flatten();
        Some(CredentialPair { access, refresh })
    }

    fn write_credentials(&self, creds: &CredentialPair) -> AppResult<()> {
        self.storage.set(keys::ACCESS_TOKEN, &creds.access)?;
        match &creds.refresh {
            Some(r) => self.storage.set(keys::REFRESH_TOKEN, r),
            None => self.storage.remove(keys::REFRESH_TOKEN),
        }
    }

    fn write_snapshot(&self, identity: &Identity) -> AppResult<()> {
        self.storage.set(keys::USER, &serde_json::to_string(identity)?)
    }

    fn clear_credentials(&self) {
        if let Err(e) = self.storage.remove_all(keys::SESSION_KEYS) {
            warn!(target: "pulse::session", "failed to clear persisted session: {}", e);
        }
    }

    fn expire(&self, reason: &str) {
        warn!(target: "pulse::session", "session expired: {}", reason);
        self.clear_credentials();
        self.set_state(SessionState::Anonymous);
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        debug!(target: "pulse::session", "state {} -> {}", prev.label(), self.state.borrow().label());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::provider::MockBackend;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn mock_store(storage: SharedStore) -> SessionStore {
        SessionStore::new(AuthBackend::Mock(MockBackend), storage)
    }

    #[tokio::test]
    async fn starts_uninitialized_then_anonymous_without_token() {
        let s = mock_store(MemoryStore::shared());
        assert_eq!(s.state(), SessionState::Uninitialized);
        assert!(s.is_initializing());
        assert_eq!(s.initialize().await, SessionState::Anonymous);
        assert!(!s.is_initializing());
        assert!(!s.has_permission("data:view"));
    }

    #[tokio::test]
    async fn mock_login_persists_and_restores() {
        let storage = MemoryStore::shared();
        let s = mock_store(storage.clone());
        s.initialize().await;
        let id = s.login(&LoginRequest::new("user@tvk.com", "user123")).await.unwrap();
        assert!(s.is_field_worker());
        assert!(s.has_permission("data:submit"));
        assert!(!s.has_permission("data:edit"));
        assert!(s.remembered());
        assert!(storage.get(keys::USER).unwrap().is_some());

        let again = mock_store(storage.clone());
        assert_eq!(again.initialize().await, SessionState::Authenticated(id));
    }

    #[tokio::test]
    async fn wrong_password_keeps_anonymous_and_persists_nothing() {
        let storage = MemoryStore::shared();
        let s = mock_store(storage.clone());
        s.initialize().await;
        let err = s.login(&LoginRequest::new("admin@x.com", "wrongpass")).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(s.state(), SessionState::Anonymous);
        assert!(storage.keys().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_backend() {
        let s = mock_store(MemoryStore::shared());
        let err = s.login(&LoginRequest::new("not-an-email", "x")).await.unwrap_err();
        assert!(matches!(err, AppError::UserInput { .. }));
    }

    #[tokio::test]
    async fn orphaned_mock_token_is_cleared() {
        let storage: SharedStore = Arc::new(MemoryStore::new());
        storage.set(keys::ACCESS_TOKEN, "mock:404").unwrap();
        storage.set(keys::USER, "{}").unwrap();
        let s = mock_store(storage.clone());
        assert_eq!(s.initialize().await, SessionState::Anonymous);
        assert_eq!(storage.get(keys::ACCESS_TOKEN).unwrap(), None);
        assert_eq!(storage.get(keys::USER).unwrap(), None);
    }

    #[tokio::test]
    async fn logout_clears_session_keys_only() {
        let storage = MemoryStore::shared();
        storage.set("autosave:survey", "{}").unwrap();
        let s = mock_store(storage.clone());
        s.login(&LoginRequest::new("admin@tvk.com", "admin123")).await.unwrap();
        let mut rx = s.subscribe();
        s.logout().await;
        assert_eq!(*rx.borrow_and_update(), SessionState::Anonymous);
        assert_eq!(storage.keys().unwrap(), vec!["autosave:survey".to_string()]);
    }
}
