use std::cmp::Ordering;
use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::data::{matches_filter, Caller};
use super::{bearer, ApiError, AppState};
use crate::error::AppError;
use crate::identity::Identity;

type ApiResult<T> = Result<T, ApiError>;

/// Query keys that shape the result instead of filtering rows.
const RESERVED: &[&str] = &["select", "order", "limit", "offset"];

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/user", get(user))
        .route("/auth/v1/logout", post(logout))
        .route("/rest/v1/{table}", get(select).patch(update))
}

fn check_apikey(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    match headers.get("apikey").and_then(|v| v.to_str().ok()) {
        Some(k) if k == state.anon_key => Ok(()),
        Some(_) => Err(ApiError::table(AppError::auth("invalid_api_key", "Invalid API key"))),
        None => Err(ApiError::table(AppError::auth("no_api_key", "No API key found in request"))),
    }
}

/// The anon key as bearer (or none) reads as anon; anything else must be a live token.
fn caller(state: &AppState, headers: &HeaderMap) -> ApiResult<Caller> {
    match bearer(headers) {
        None => Ok(Caller::Anon),
        Some(t) if t == state.anon_key => Ok(Caller::Anon),
        Some(t) => state
            .identity_for(t)
            .map(Caller::User)
            .ok_or_else(|| ApiError::table(AppError::auth("PGRST301", "JWT expired"))),
    }
}

/// GoTrue-shaped user: the profile fields travel in `user_metadata`.
fn baas_user(identity: &Identity) -> Value {
    json!({
        "id": identity.id,
        "aud": "authenticated",
        "role": "authenticated",
        "email": identity.email,
        "user_metadata": {
            "name": identity.name,
            "role": identity.role,
            "permissions": identity.permissions,
            "is_super_admin": identity.is_super_admin,
            "organization_id": identity.organization_id,
            "tenant_id": identity.tenant_id,
            "ward": identity.ward,
            "constituency": identity.constituency,
            "avatar_url": identity.avatar,
            "status": identity.status,
        },
    })
}

fn session_body(state: &AppState, identity: &Identity, access: String, refresh: String) -> Json<Value> {
    Json(json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": state.tokens.access_ttl.as_secs(),
        "refresh_token": refresh,
        "user": baas_user(identity),
    }))
}

async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    check_apikey(&state, &headers)?;
    let field = |k: &str| body.get(k).and_then(|v| v.as_str()).unwrap_or_default().to_string();
    match params.get("grant_type").map(String::as_str) {
        Some("password") => {
            let email = field("email");
            let Some(identity) = state.accounts.authenticate(&email, &field("password")) else {
                info!(target: "pulse::server", "baas login rejected for {}", email.trim());
                return Err(ApiError::grant(StatusCode::BAD_REQUEST, "invalid_grant", "Invalid login credentials"));
            };
            let (access, refresh) = state.tokens.issue(&identity.id);
            info!(target: "pulse::server", "baas login {} ({})", identity.email, identity.role);
            Ok(session_body(&state, &identity, access, refresh))
        }
        Some("refresh_token") => {
            let rejected = || ApiError::grant(StatusCode::BAD_REQUEST, "invalid_grant", "Invalid Refresh Token: Refresh Token Not Found");
            let (access, rotated) = state.tokens.exchange(&field("refresh_token"), true).ok_or_else(rejected)?;
            let user_id = state.tokens.validate_access(&access).ok_or_else(rejected)?;
            let identity = state.accounts.get(&user_id).ok_or_else(rejected)?;
            Ok(session_body(&state, &identity, access, rotated.unwrap_or_default()))
        }
        other => Err(ApiError::grant(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            &format!("unsupported grant_type {}", other.unwrap_or("(none)")),
        )),
    }
}

async fn user(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    check_apikey(&state, &headers)?;
    match caller(&state, &headers)? {
        Caller::User(identity) => Ok(Json(baas_user(&identity))),
        Caller::Anon => Err(ApiError::table(AppError::auth("no_session", "This endpoint requires a Bearer token"))),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    check_apikey(&state, &headers)?;
    if state.logout_fails() {
        return Err(ApiError::unavailable("Logout service unavailable"));
    }
    match caller(&state, &headers)? {
        Caller::User(identity) => {
            state.tokens.revoke_user(&identity.id);
            Ok(StatusCode::NO_CONTENT)
        }
        Caller::Anon => Err(ApiError::table(AppError::auth("no_session", "This endpoint requires a Bearer token"))),
    }
}

fn row_filters(params: &[(String, String)]) -> ApiResult<Vec<(&str, &str)>> {
    let mut out = Vec::new();
    for (k, v) in params.iter().filter(|(k, _)| !RESERVED.contains(&k.as_str())) {
        if !v.starts_with("eq.") {
            return Err(ApiError::table(AppError::user("PGRST100", format!("unsupported filter operator in {}={}", k, v))));
        }
        out.push((k.as_str(), v.as_str()));
    }
    Ok(out)
}

/// Numbers compare numerically, everything else as text; nulls sort last.
fn cmp_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.filter(|v| !v.is_null()), b.filter(|v| !v.is_null())) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Some(x), Some(y)) => super::data::cell_text(Some(x)).cmp(&super::data::cell_text(Some(y))),
    }
}

fn missing_table(table: &str) -> ApiError {
    ApiError::table(AppError::not_found("42P01", format!("relation \"public.{}\" does not exist", table)))
}

async fn select(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<Value>>> {
    check_apikey(&state, &headers)?;
    let who = caller(&state, &headers)?;
    if !state.data.has_table(&table) {
        return Err(missing_table(&table));
    }
    let filters = row_filters(&params)?;
    let mut rows: Vec<Value> = state
        .data
        .rows(&table)
        .into_iter()
        .filter(|r| who.can_see(&table, r))
        .filter(|r| filters.iter().all(|(col, expr)| matches_filter(r, col, expr)))
        .collect();

    let param = |k: &str| params.iter().find(|(pk, _)| pk == k).map(|(_, v)| v.as_str());
    if let Some(order) = param("order") {
        let mut parts = order.split('.');
        let column = parts.next().unwrap_or_default().to_string();
        let descending = parts.next() == Some("desc");
        rows.sort_by(|a, b| {
            let o = cmp_cells(a.get(&column), b.get(&column));
            if descending { o.reverse() } else { o }
        });
    }
    let offset = param("offset").and_then(|v| v.parse::<usize>().ok()).unwrap_or(0);
    let limit = param("limit").and_then(|v| v.parse::<usize>().ok()).unwrap_or(usize::MAX);
    let rows: Vec<Value> = rows.into_iter().skip(offset).take(limit).collect();
    debug!(target: "pulse::server", "rest select {} -> {} rows", table, rows.len());
    Ok(Json(rows))
}

async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(table): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    check_apikey(&state, &headers)?;
    let who = caller(&state, &headers)?;
    if !state.data.has_table(&table) {
        return Err(missing_table(&table));
    }
    let filters = row_filters(&params)?;
    if filters.is_empty() {
        return Err(ApiError::table(AppError::user("21000", "UPDATE requires a WHERE clause")));
    }
    let Value::Object(patch) = body else {
        return Err(ApiError::table(AppError::user("PGRST102", "Expected a JSON object")));
    };
    let n = state.data.update_where(&table, &patch, |r| {
        who.can_see(&table, r) && filters.iter().all(|(col, expr)| matches_filter(r, col, expr))
    });
    debug!(target: "pulse::server", "rest update {} -> {} rows", table, n);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_puts_nulls_last_and_numbers_numerically() {
        let mut rows = vec![json!({"n": 10}), json!({"n": null}), json!({"n": 9})];
        rows.sort_by(|a, b| cmp_cells(a.get("n"), b.get("n")));
        assert_eq!(rows[0]["n"], 9);
        assert_eq!(rows[1]["n"], 10);
        assert!(rows[2]["n"].is_null());
    }

    #[test]
    fn only_eq_filters_are_accepted() {
        let params = vec![
            ("select".to_string(), "*".to_string()),
            ("user_id".to_string(), "eq.4".to_string()),
            ("order".to_string(), "created_at.desc".to_string()),
        ];
        let f = row_filters(&params).ok().unwrap();
        assert_eq!(f, vec![("user_id", "eq.4")]);
        let bad = vec![("age".to_string(), "gt.30".to_string())];
        assert!(row_filters(&bad).is_err());
    }

    #[test]
    fn metadata_carries_the_profile() {
        let id = crate::identity::mock_accounts()[1].identity.clone();
        let u = baas_user(&id);
        assert_eq!(u["user_metadata"]["role"], "manager");
        assert_eq!(u["email"], "manager@tvk.com");
    }
}
