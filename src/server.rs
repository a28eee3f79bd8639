//!
//! pulse local development backend
//! -------------------------------
//! An Axum server that speaks both surfaces the client layer talks to, so the
//! whole stack can run on one machine and the integration tests have a real
//! peer:
//! - the REST gateway under `/api/` (JWT-style auth, voters, campaigns,
//!   alerts, audit log, analytics, news aggregates),
//! - the BaaS table API under `/rest/v1/`, its auth API under `/auth/v1/`,
//! - the realtime websocket under `/realtime/v1/websocket`.
//!
//! Accounts are the development accounts with argon2-hashed passwords; tokens
//! are opaque random strings held in memory. Nothing is persisted.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{AuthBackendKind, Config};
use crate::error::{AppError, AppResult};
use crate::identity::Identity;

mod accounts;
mod baas;
pub mod data;
mod gateway;
mod realtime;
mod tokens;

pub use accounts::AccountBook;
pub use data::DataStore;
pub use tokens::TokenIssuer;

/// Shared handles for every handler.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<AccountBook>,
    pub tokens: Arc<TokenIssuer>,
    pub data: Arc<DataStore>,
    pub anon_key: String,
    fail_logout: Arc<AtomicBool>,
}

impl AppState {
    /// Development accounts plus the demo tables and news.
    pub fn demo(anon_key: &str) -> AppResult<Self> {
        Ok(Self {
            accounts: Arc::new(AccountBook::seeded()?),
            tokens: Arc::new(TokenIssuer::default()),
            data: Arc::new(DataStore::demo()),
            anon_key: anon_key.to_string(),
            fail_logout: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Make both logout endpoints answer 503, to exercise best-effort logout.
    pub fn fail_logout(&self, on: bool) { self.fail_logout.store(on, Ordering::SeqCst); }

    fn logout_fails(&self) -> bool { self.fail_logout.load(Ordering::SeqCst) }

    fn identity_for(&self, access: &str) -> Option<Identity> {
        let user_id = self.tokens.validate_access(access)?;
        self.accounts.get(&user_id).filter(|i| i.is_active())
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Error response. The gateway answers `{"detail": ...}`, the table API
/// `{"message": ..., "code": ...}`, the auth API `{"error", "error_description"}`.
pub(crate) struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn status_of(e: &AppError) -> StatusCode {
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub(crate) fn detail(e: AppError) -> Self {
        Self { status: Self::status_of(&e), body: json!({"detail": e.message(), "code": e.code_str()}) }
    }

    pub(crate) fn table(e: AppError) -> Self {
        Self { status: Self::status_of(&e), body: json!({"message": e.message(), "code": e.code_str()}) }
    }

    pub(crate) fn grant(status: StatusCode, error: &str, description: &str) -> Self {
        Self { status, body: json!({"error": error, "error_description": description}) }
    }

    pub(crate) fn unavailable(message: &str) -> Self {
        Self { status: StatusCode::SERVICE_UNAVAILABLE, body: json!({"detail": message}) }
    }
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self { ApiError::detail(e) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(target: "pulse::server", "{} {}", self.status, self.body);
        }
        (self.status, Json(self.body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "pulse ok" }))
        .merge(gateway::routes())
        .merge(baas::routes())
        .route("/realtime/v1/websocket", get(realtime::ws_handler))
        .with_state(state)
}

/// Serve the demo backend on `cfg.http_port` until the process ends.
pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let state = AppState::demo(&cfg.baas_anon_key)?;
    for id in state.accounts.list() {
        info!(target: "pulse::server", "account {} ({})", id.email, id.role);
    }
    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    info!(target: "pulse::server", "Starting local backend on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// A backend on an ephemeral loopback port, stopped when dropped.
pub struct LocalBackend {
    addr: SocketAddr,
    state: AppState,
    task: JoinHandle<()>,
}

impl LocalBackend {
    pub async fn start() -> anyhow::Result<Self> {
        let state = AppState::demo(&Config::default().baas_anon_key)?;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = router(state.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(target: "pulse::server", "local backend stopped: {}", e);
            }
        });
        info!(target: "pulse::server", "local backend listening on {}", addr);
        Ok(Self { addr, state, task })
    }

    pub fn addr(&self) -> SocketAddr { self.addr }

    pub fn url(&self) -> String { format!("http://{}", self.addr) }

    pub fn state(&self) -> &AppState { &self.state }

    /// Client config pointing both surfaces at this backend.
    pub fn config(&self, auth_backend: AuthBackendKind) -> Config {
        let mut cfg = Config::local(&self.url(), auth_backend);
        cfg.baas_anon_key = self.state.anon_key.clone();
        cfg
    }
}

impl Drop for LocalBackend {
    fn drop(&mut self) { self.task.abort(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_parsing() {
        let mut h = HeaderMap::new();
        assert!(bearer(&h).is_none());
        h.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer(&h), Some("abc"));
        h.insert("authorization", "Basic abc".parse().unwrap());
        assert!(bearer(&h).is_none());
    }

    #[test]
    fn error_bodies_per_surface() {
        let e = ApiError::detail(AppError::auth("token_not_valid", "Token is invalid or expired"));
        assert_eq!(e.status, StatusCode::UNAUTHORIZED);
        assert_eq!(e.body["detail"], "Token is invalid or expired");
        let t = ApiError::table(AppError::not_found("42P01", "relation \"public.x\" does not exist"));
        assert_eq!(t.status, StatusCode::NOT_FOUND);
        assert_eq!(t.body["code"], "42P01");
    }
}
