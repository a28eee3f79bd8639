use std::collections::{BTreeMap, HashMap};

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::data::{cell_text, AUDIT_LOGS, ALERTS, CAMPAIGNS, PROFILES, VOTERS};
use super::{bearer, ApiError, AppState};
use crate::error::AppError;
use crate::identity::{evaluate, Identity};
use crate::model::{NewsArticle, NewsSentimentStats, NewsSourceStats, Sentiment, Severity, TopicCount, TrendingTopics};
use crate::router::BulkImportReport;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 1000;

type Params = HashMap<String, String>;
type ApiResult<T> = Result<T, ApiError>;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login/", post(login))
        .route("/api/auth/refresh/", post(refresh))
        .route("/api/auth/logout/", post(logout))
        .route("/api/auth/profile/", get(profile).patch(update_profile))
        .route("/api/auth/users/", get(list_users))
        .route("/api/voters/", get(list_voters).post(create_voter))
        .route("/api/voters/bulk-import/", post(bulk_import))
        .route("/api/voters/{id}/", get(get_voter).patch(update_voter).delete(delete_voter))
        .route("/api/campaigns/", get(list_campaigns).post(create_campaign))
        .route("/api/campaigns/{id}/", get(get_campaign).patch(update_campaign).delete(delete_campaign))
        .route("/api/alerts/", post(create_alert))
        .route("/api/audit-logs/", get(list_audit_logs))
        .route("/api/analytics/sentiment/", get(sentiment))
        .route("/api/analytics/trends/", get(trends))
        .route("/api/reports/generate/", post(generate_report))
        .route("/api/news/", get(news_list))
        .route("/api/news/sentiment-stats/", get(news_sentiment_stats))
        .route("/api/news/source-stats/", get(news_source_stats))
        .route("/api/news/trending-topics/", get(news_trending_topics))
        .route("/api/news/{id}/", get(news_detail))
}

// --- auth helpers ---------------------------------------------------------

fn authenticated(state: &AppState, headers: &HeaderMap) -> ApiResult<Identity> {
    let Some(token) = bearer(headers) else {
        return Err(AppError::auth("not_authenticated", "Authentication credentials were not provided.").into());
    };
    state
        .identity_for(token)
        .ok_or_else(|| AppError::auth("token_not_valid", "Given token not valid for any token type").into())
}

fn permit(allowed: bool) -> ApiResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden("permission_denied", "You do not have permission to perform this action.").into())
    }
}

fn audit(state: &AppState, who: &Identity, action: &str, model: &str, target_id: &str, changes: Value) {
    state.data.insert(
        AUDIT_LOGS,
        json!({
            "user": who.email,
            "action": action,
            "target_model": model,
            "target_id": target_id,
            "changes": changes,
            "ip_address": null,
            "user_agent": "",
            "timestamp": Utc::now().to_rfc3339(),
        }),
    );
}

// --- pagination -----------------------------------------------------------

fn parse_positive(params: &Params, key: &str, default: usize) -> ApiResult<usize> {
    match params.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(s) => s
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| AppError::user("invalid_param", format!("{} must be a positive integer", key)).into()),
    }
}

fn page_link(path: &str, params: &Params, page: usize) -> String {
    let mut q: BTreeMap<&str, String> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
    q.insert("page", page.to_string());
    let qs: Vec<String> = q.iter().map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))).collect();
    format!("{}?{}", path, qs.join("&"))
}

/// `{count, next, previous, results}`; an out-of-range page is a 404.
fn paginate(path: &str, params: &Params, rows: Vec<Value>) -> ApiResult<Json<Value>> {
    let page = parse_positive(params, "page", 1)?;
    let size = parse_positive(params, "page_size", DEFAULT_PAGE_SIZE)?.min(MAX_PAGE_SIZE);
    let total = rows.len();
    let start = match (page - 1).checked_mul(size) {
        Some(start) if start < total || page == 1 => start,
        _ => return Err(AppError::not_found("invalid_page", "Invalid page.").into()),
    };
    let results: Vec<Value> = rows.into_iter().skip(start).take(size).collect();
    let next = (start.saturating_add(size) < total).then(|| page_link(path, params, page + 1));
    let previous = (page > 1).then(|| page_link(path, params, page - 1));
    Ok(Json(json!({"count": total, "next": next, "previous": previous, "results": results})))
}

fn contains_ci(row: &Value, fields: &[&str], needle: &str) -> bool {
    fields.iter().any(|f| cell_text(row.get(*f)).is_some_and(|v| v.to_lowercase().contains(needle)))
}

/// Search over `fields` plus exact matches on the allowed filter keys.
fn filter_rows(rows: Vec<Value>, params: &Params, search_fields: &[&str], filter_keys: &[&str]) -> Vec<Value> {
    let needle = params.get("search").map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
    rows.into_iter()
        .filter(|r| needle.as_deref().map_or(true, |n| contains_ci(r, search_fields, n)))
        .filter(|r| {
            filter_keys.iter().all(|k| match params.get(*k).filter(|v| !v.is_empty()) {
                Some(want) => cell_text(r.get(*k)).is_some_and(|v| v.eq_ignore_ascii_case(want)),
                None => true,
            })
        })
        .collect()
}

fn body_object(body: Value) -> ApiResult<Map<String, Value>> {
    match body {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::user("invalid_body", "Expected a JSON object.").into()),
    }
}

fn required_text(m: &Map<String, Value>, key: &str) -> ApiResult<String> {
    match m.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(AppError::user(format!("{}_required", key), format!("{}: This field is required.", key)).into()),
    }
}

// --- auth endpoints -------------------------------------------------------

#[derive(Deserialize)]
struct Credentials {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<Credentials>) -> ApiResult<Json<Value>> {
    let Some(identity) = state.accounts.authenticate(&body.email, &body.password) else {
        info!(target: "pulse::server", "gateway login rejected for {}", body.email.trim());
        return Err(AppError::auth("no_active_account", "No active account found with the given credentials").into());
    };
    let (access, refresh) = state.tokens.issue(&identity.id);
    audit(&state, &identity, "login", "user", &identity.id, json!({}));
    info!(target: "pulse::server", "gateway login {} ({})", identity.email, identity.role);
    Ok(Json(json!({"access": access, "refresh": refresh, "user": identity})))
}

#[derive(Deserialize)]
struct RefreshBody {
    #[serde(default)]
    refresh: String,
}

async fn refresh(State(state): State<AppState>, Json(body): Json<RefreshBody>) -> ApiResult<Json<Value>> {
    match state.tokens.exchange(&body.refresh, false) {
        Some((access, _)) => Ok(Json(json!({"access": access}))),
        None => Err(AppError::auth("token_not_valid", "Token is invalid or expired").into()),
    }
}

async fn logout(State(state): State<AppState>, Json(body): Json<RefreshBody>) -> ApiResult<StatusCode> {
    if state.logout_fails() {
        return Err(ApiError::unavailable("Logout service unavailable"));
    }
    if !state.tokens.revoke_refresh(&body.refresh) {
        return Err(AppError::auth("token_not_valid", "Token is invalid or expired").into());
    }
    Ok(StatusCode::RESET_CONTENT)
}

async fn profile(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Identity>> {
    Ok(Json(authenticated(&state, &headers)?))
}

async fn update_profile(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult<Json<Identity>> {
    let me = authenticated(&state, &headers)?;
    let updates = body_object(body)?;
    let updated = state.accounts.update_profile(&me.id, &updates)?;
    let mut row = Map::new();
    row.insert("name".into(), json!(updated.name));
    row.insert("constituency".into(), json!(updated.constituency));
    state.data.update_where(PROFILES, &row, |r| cell_text(r.get("user_id")).as_deref() == Some(me.id.as_str()));
    audit(&state, &me, "update", "user", &me.id, Value::Object(updates));
    Ok(Json(updated))
}

async fn list_users(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<Params>) -> ApiResult<Json<Value>> {
    let me = authenticated(&state, &headers)?;
    permit(me.role.is_admin_or_above() || me.is_super_admin)?;
    let rows = state.accounts.list().into_iter().map(|i| json!(i)).collect();
    paginate("/api/auth/users/", &params, filter_rows(rows, &params, &["name", "email"], &["role", "status"]))
}

// --- voters ---------------------------------------------------------------

async fn list_voters(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<Params>) -> ApiResult<Json<Value>> {
    authenticated(&state, &headers)?;
    let rows = filter_rows(
        state.data.rows(VOTERS),
        &params,
        &["name", "voter_id", "phone"],
        &["district", "constituency", "ward", "sentiment"],
    );
    debug!(target: "pulse::server", "voters list matched {}", rows.len());
    paginate("/api/voters/", &params, rows)
}

fn voter_id_taken(state: &AppState, voter_id: &str, except: Option<&str>) -> bool {
    state.data.rows(VOTERS).iter().any(|r| {
        cell_text(r.get("voter_id")).as_deref() == Some(voter_id) && cell_text(r.get("id")).as_deref() != except
    })
}

async fn create_voter(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult<impl IntoResponse> {
    let me = authenticated(&state, &headers)?;
    permit(evaluate(Some(&me), "data:manage") || evaluate(Some(&me), "data:submit"))?;
    let mut row = body_object(body)?;
    required_text(&row, "name")?;
    if let Some(vid) = row.get("voter_id").and_then(|v| v.as_str()) {
        if voter_id_taken(&state, vid, None) {
            return Err(AppError::conflict("duplicate_voter_id", "voter with this voter id already exists.").into());
        }
    }
    row.insert("organization_id".into(), json!(me.organization_id));
    row.remove("created_at");
    let created = state.data.insert(VOTERS, Value::Object(row));
    let id = cell_text(created.get("id")).unwrap_or_default();
    audit(&state, &me, "create", "voter", &id, created.clone());
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_voter(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    authenticated(&state, &headers)?;
    state.data.find(VOTERS, &id).map(Json).ok_or_else(not_found)
}

async fn update_voter(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let me = authenticated(&state, &headers)?;
    permit(evaluate(Some(&me), "data:manage"))?;
    let patch = body_object(body)?;
    if patch.contains_key("name") {
        required_text(&patch, "name")?;
    }
    if let Some(vid) = patch.get("voter_id").and_then(|v| v.as_str()) {
        if voter_id_taken(&state, vid, Some(&id)) {
            return Err(AppError::conflict("duplicate_voter_id", "voter with this voter id already exists.").into());
        }
    }
    let updated = state.data.update(VOTERS, &id, &patch).ok_or_else(not_found)?;
    audit(&state, &me, "update", "voter", &id, Value::Object(patch));
    Ok(Json(updated))
}

async fn delete_voter(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let me = authenticated(&state, &headers)?;
    permit(evaluate(Some(&me), "data:manage"))?;
    if !state.data.delete(VOTERS, &id) {
        return Err(not_found());
    }
    audit(&state, &me, "delete", "voter", &id, json!({}));
    Ok(StatusCode::NO_CONTENT)
}

fn not_found() -> ApiError { AppError::not_found("not_found", "Not found.").into() }

const IMPORT_COLUMNS: &[&str] = &["name", "voter_id", "phone", "gender", "district", "constituency", "ward", "booth_number", "sentiment"];

/// Upsert by `voter_id`; rows without a name are reported, not fatal.
fn import_voters(state: &AppState, me: &Identity, bytes: &[u8]) -> ApiResult<BulkImportReport> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).flexible(true).from_reader(bytes);
    let headers = rdr.headers().map_err(|e| AppError::user("invalid_csv", e.to_string()))?.clone();
    if !headers.iter().any(|h| h == "name") {
        return Err(AppError::user("invalid_csv", "CSV must have a 'name' column").into());
    }
    let mut report = BulkImportReport { created: 0, updated: 0, failed: 0, errors: Vec::new() };
    for (i, rec) in rdr.records().enumerate() {
        let line = i + 2;
        let rec = match rec {
            Ok(r) => r,
            Err(e) => {
                report.failed += 1;
                report.errors.push(format!("row {}: {}", line, e));
                continue;
            }
        };
        let mut row = Map::new();
        for (h, v) in headers.iter().zip(rec.iter()) {
            if IMPORT_COLUMNS.contains(&h) && !v.is_empty() {
                row.insert(h.to_string(), json!(v));
            } else if h == "age" && !v.is_empty() {
                row.insert("age".into(), v.parse::<u32>().map(|n| json!(n)).unwrap_or(Value::Null));
            }
        }
        if row.get("name").is_none() {
            report.failed += 1;
            report.errors.push(format!("row {}: name is required", line));
            continue;
        }
        let existing = row
            .get("voter_id")
            .and_then(|v| v.as_str())
            .and_then(|vid| state.data.rows(VOTERS).into_iter().find(|r| cell_text(r.get("voter_id")).as_deref() == Some(vid)));
        match existing.and_then(|r| cell_text(r.get("id"))) {
            Some(id) => {
                state.data.update(VOTERS, &id, &row);
                report.updated += 1;
            }
            None => {
                row.insert("organization_id".into(), json!(me.organization_id));
                state.data.insert(VOTERS, Value::Object(row));
                report.created += 1;
            }
        }
    }
    Ok(report)
}

async fn bulk_import(State(state): State<AppState>, headers: HeaderMap, mut multipart: Multipart) -> ApiResult<Json<BulkImportReport>> {
    let me = authenticated(&state, &headers)?;
    permit(evaluate(Some(&me), "data:manage"))?;
    let mut file: Option<Vec<u8>> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::user("invalid_multipart", e.to_string()))? {
        if field.name() == Some("file") {
            let bytes = field.bytes().await.map_err(|e| AppError::user("invalid_multipart", e.to_string()))?;
            file = Some(bytes.to_vec());
        }
    }
    let bytes = file.ok_or_else(|| AppError::user("file_required", "file: No file was submitted."))?;
    let report = import_voters(&state, &me, &bytes)?;
    audit(&state, &me, "bulk_import", "voter", "", json!({"created": report.created, "updated": report.updated, "failed": report.failed}));
    info!(target: "pulse::server", "bulk import: {} created, {} updated, {} failed", report.created, report.updated, report.failed);
    Ok(Json(report))
}

// --- campaigns ------------------------------------------------------------

async fn list_campaigns(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<Params>) -> ApiResult<Json<Value>> {
    authenticated(&state, &headers)?;
    let rows = filter_rows(state.data.rows(CAMPAIGNS), &params, &["name", "description"], &["status"]);
    paginate("/api/campaigns/", &params, rows)
}

async fn create_campaign(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult<impl IntoResponse> {
    let me = authenticated(&state, &headers)?;
    permit(me.role.is_manager_or_above() || me.is_super_admin)?;
    let mut row = body_object(body)?;
    required_text(&row, "name")?;
    row.entry("status").or_insert_with(|| json!("draft"));
    row.insert("organization_id".into(), json!(me.organization_id));
    let created = state.data.insert(CAMPAIGNS, Value::Object(row));
    audit(&state, &me, "create", "campaign", &cell_text(created.get("id")).unwrap_or_default(), created.clone());
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_campaign(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    authenticated(&state, &headers)?;
    state.data.find(CAMPAIGNS, &id).map(Json).ok_or_else(not_found)
}

async fn update_campaign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let me = authenticated(&state, &headers)?;
    permit(me.role.is_manager_or_above() || me.is_super_admin)?;
    let patch = body_object(body)?;
    let updated = state.data.update(CAMPAIGNS, &id, &patch).ok_or_else(not_found)?;
    audit(&state, &me, "update", "campaign", &id, Value::Object(patch));
    Ok(Json(updated))
}

async fn delete_campaign(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let me = authenticated(&state, &headers)?;
    permit(me.role.is_manager_or_above() || me.is_super_admin)?;
    if !state.data.delete(CAMPAIGNS, &id) {
        return Err(not_found());
    }
    audit(&state, &me, "delete", "campaign", &id, json!({}));
    Ok(StatusCode::NO_CONTENT)
}

// --- alerts and audit -----------------------------------------------------

async fn create_alert(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult<impl IntoResponse> {
    let me = authenticated(&state, &headers)?;
    permit(me.role.is_manager_or_above() || me.is_super_admin)?;
    let mut row = body_object(body)?;
    required_text(&row, "title")?;
    let severity: Severity = row.get("severity").and_then(|v| v.as_str()).unwrap_or("medium").parse()?;
    row.insert("severity".into(), json!(severity));
    row.insert("organization_id".into(), json!(me.organization_id));
    row.remove("created_at");
    let created = state.data.insert(ALERTS, Value::Object(row));
    audit(&state, &me, "create", "alert", &cell_text(created.get("id")).unwrap_or_default(), json!({"severity": severity}));
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_audit_logs(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<Params>) -> ApiResult<Json<Value>> {
    let me = authenticated(&state, &headers)?;
    permit(me.role.is_admin_or_above() || me.is_super_admin)?;
    let mut rows = filter_rows(state.data.rows(AUDIT_LOGS), &params, &["user", "target_id"], &["action", "target_model", "user"]);
    rows.reverse();
    paginate("/api/audit-logs/", &params, rows)
}

// --- analytics ------------------------------------------------------------

fn parse_date(params: &Params, key: &str) -> ApiResult<Option<NaiveDate>> {
    match params.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| AppError::user("invalid_date", format!("{}: expected YYYY-MM-DD", key)).into()),
    }
}

fn created_date(row: &Value) -> Option<NaiveDate> {
    let raw = row.get("created_at")?.as_str()?;
    DateTime::parse_from_rfc3339(raw).ok().map(|d| d.date_naive())
}

#[derive(Default, serde::Serialize)]
struct Tally {
    positive: u64,
    negative: u64,
    neutral: u64,
    total: u64,
}

impl Tally {
    fn add(&mut self, row: &Value) {
        self.total += 1;
        match row.get("sentiment").and_then(|v| v.as_str()) {
            Some("positive") => self.positive += 1,
            Some("negative") => self.negative += 1,
            _ => self.neutral += 1,
        }
    }
}

async fn sentiment(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<Params>) -> ApiResult<Json<Value>> {
    let me = authenticated(&state, &headers)?;
    permit(evaluate(Some(&me), "analytics:view"))?;
    let start = parse_date(&params, "start_date")?;
    let end = parse_date(&params, "end_date")?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(AppError::user("invalid_range", "start_date must not be after end_date").into());
        }
    }
    let rows = filter_rows(state.data.rows(VOTERS), &params, &[], &["district", "constituency"]);
    let mut overall = Tally::default();
    let mut by_constituency: BTreeMap<String, Tally> = BTreeMap::new();
    for row in rows.iter().filter(|r| {
        let d = created_date(r);
        start.map_or(true, |s| d.is_some_and(|d| d >= s)) && end.map_or(true, |e| d.is_some_and(|d| d <= e))
    }) {
        overall.add(row);
        let key = cell_text(row.get("constituency")).unwrap_or_else(|| "Unknown".to_string());
        by_constituency.entry(key).or_default().add(row);
    }
    Ok(Json(json!({
        "total": overall.total,
        "positive": overall.positive,
        "negative": overall.negative,
        "neutral": overall.neutral,
        "by_constituency": by_constituency,
        "filters": {"district": params.get("district"), "constituency": params.get("constituency"),
                    "start_date": start, "end_date": end},
    })))
}

async fn trends(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<Params>) -> ApiResult<Json<Value>> {
    let me = authenticated(&state, &headers)?;
    permit(evaluate(Some(&me), "analytics:view"))?;
    let period = params.get("period").map(String::as_str).unwrap_or("week");
    let fmt = match period {
        "day" => "%Y-%m-%d",
        "week" => "%G-W%V",
        "month" => "%Y-%m",
        other => return Err(AppError::user("invalid_period", format!("period must be day, week or month, not '{}'", other)).into()),
    };
    let mut buckets: BTreeMap<String, Tally> = BTreeMap::new();
    for row in filter_rows(state.data.rows(VOTERS), &params, &[], &["district"]) {
        if let Some(d) = created_date(&row) {
            buckets.entry(d.format(fmt).to_string()).or_default().add(&row);
        }
    }
    let points: Vec<Value> = buckets.into_iter().map(|(bucket, t)| json!({"bucket": bucket, "positive": t.positive, "negative": t.negative, "neutral": t.neutral, "total": t.total})).collect();
    Ok(Json(json!({"period": period, "district": params.get("district"), "points": points})))
}

async fn generate_report(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> ApiResult<impl IntoResponse> {
    let me = authenticated(&state, &headers)?;
    permit(evaluate(Some(&me), "reports:view") || evaluate(Some(&me), "analytics:view"))?;
    let body = body_object(body)?;
    let report_type = required_text(&body, "report_type")?;
    let parameters = body.get("parameters").cloned().unwrap_or_else(|| json!({}));
    audit(&state, &me, "generate_report", "report", &report_type, parameters.clone());
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": uuid::Uuid::new_v4(),
            "report_type": report_type,
            "parameters": parameters,
            "status": "queued",
            "requested_by": me.id,
            "created_at": Utc::now().to_rfc3339(),
        })),
    ))
}

// --- news -----------------------------------------------------------------

/// Start of a `days` window, rejecting spans the calendar cannot represent.
fn window_start(days: usize) -> ApiResult<DateTime<Utc>> {
    i64::try_from(days)
        .ok()
        .and_then(Duration::try_days)
        .and_then(|span| Utc::now().checked_sub_signed(span))
        .ok_or_else(|| AppError::user("invalid_param", format!("days={} is out of range", days)).into())
}

fn window(state: &AppState, days: Option<usize>) -> ApiResult<Vec<&crate::model::NewsArticleDetail>> {
    let since = days.map(window_start).transpose()?;
    Ok(state
        .data
        .news()
        .iter()
        .filter(|a| since.map_or(true, |s| a.article.published_at >= s))
        .collect())
}

fn days_param(params: &Params) -> ApiResult<Option<usize>> {
    if params.get("days").is_some_and(|d| !d.trim().is_empty()) {
        parse_positive(params, "days", 7).map(Some)
    } else {
        Ok(None)
    }
}

fn round2(x: f64) -> f64 { (x * 100.0).round() / 100.0 }

async fn news_list(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<Params>) -> ApiResult<Json<Value>> {
    authenticated(&state, &headers)?;
    let days = days_param(&params)?;
    let sentiment = params.get("sentiment").filter(|s| !s.is_empty());
    let source = params.get("source").filter(|s| !s.is_empty());
    let language = params.get("language").filter(|s| !s.is_empty());
    let relevant_only = params.get("relevant_only").is_some_and(|v| v == "true");
    let needle = params.get("search").map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
    let mut articles: Vec<&NewsArticle> = window(&state, days)?
        .into_iter()
        .map(|d| &d.article)
        .filter(|a| sentiment.map_or(true, |s| a.tvk_sentiment.as_str() == s.as_str()))
        .filter(|a| source.map_or(true, |s| a.source.eq_ignore_ascii_case(s)))
        .filter(|a| language.map_or(true, |l| a.language.as_deref() == Some(l.as_str())))
        .filter(|a| !relevant_only || a.is_relevant)
        .filter(|a| needle.as_deref().map_or(true, |n| a.title.to_lowercase().contains(n)))
        .collect();
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    let rows = articles.into_iter().map(|a| json!(a)).collect();
    paginate("/api/news/", &params, rows)
}

async fn news_detail(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    authenticated(&state, &headers)?;
    state.data.news().iter().find(|a| a.article.id == id).map(|a| Json(json!(a))).ok_or_else(not_found)
}

fn count(articles: &[&crate::model::NewsArticleDetail], s: Sentiment) -> u64 {
    articles.iter().filter(|a| a.article.tvk_sentiment == s).count() as u64
}

fn average_score(articles: &[&crate::model::NewsArticleDetail]) -> f64 {
    if articles.is_empty() {
        return 0.0;
    }
    round2(articles.iter().map(|a| a.article.tvk_sentiment_score).sum::<f64>() / articles.len() as f64)
}

fn topic_counts(articles: &[&crate::model::NewsArticleDetail]) -> (u64, Vec<TopicCount>) {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for a in articles {
        for t in &a.key_topics {
            *counts.entry(t.as_str()).or_default() += 1;
        }
    }
    let total: u64 = counts.values().sum();
    let mut topics: Vec<TopicCount> = counts
        .into_iter()
        .map(|(topic, count)| TopicCount { topic: topic.to_string(), count, percentage: Some(round2(count as f64 * 100.0 / total as f64)) })
        .collect();
    topics.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.topic.cmp(&b.topic)));
    (total, topics)
}

async fn news_sentiment_stats(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<Params>) -> ApiResult<Json<NewsSentimentStats>> {
    authenticated(&state, &headers)?;
    let articles = window(&state, Some(parse_positive(&params, "days", 7)?))?;
    let mut by_source = BTreeMap::new();
    let mut by_language = BTreeMap::new();
    for a in &articles {
        *by_source.entry(a.article.source.clone()).or_insert(0u64) += 1;
        *by_language.entry(a.article.language.clone().unwrap_or_else(|| "unknown".into())).or_insert(0u64) += 1;
    }
    let (_, mut topics) = topic_counts(&articles);
    topics.truncate(10);
    Ok(Json(NewsSentimentStats {
        total_articles: articles.len() as u64,
        positive_count: count(&articles, Sentiment::Positive),
        negative_count: count(&articles, Sentiment::Negative),
        neutral_count: count(&articles, Sentiment::Neutral),
        avg_sentiment_score: average_score(&articles),
        total_vijay_mentions: articles.iter().map(|a| a.article.vijay_mentions as u64).sum(),
        total_tvk_mentions: articles.iter().map(|a| a.article.tvk_mentions as u64).sum(),
        articles_by_source: by_source,
        articles_by_language: by_language,
        trending_topics: topics,
    }))
}

async fn news_source_stats(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<Params>) -> ApiResult<Json<Vec<NewsSourceStats>>> {
    authenticated(&state, &headers)?;
    let articles = window(&state, Some(parse_positive(&params, "days", 7)?))?;
    let mut by_source: BTreeMap<&str, Vec<&crate::model::NewsArticleDetail>> = BTreeMap::new();
    for a in &articles {
        by_source.entry(a.article.source.as_str()).or_default().push(*a);
    }
    let mut stats: Vec<NewsSourceStats> = by_source
        .into_iter()
        .map(|(source, list)| NewsSourceStats {
            source: source.to_string(),
            total_articles: list.len() as u64,
            positive_count: count(&list, Sentiment::Positive),
            negative_count: count(&list, Sentiment::Negative),
            neutral_count: count(&list, Sentiment::Neutral),
            avg_sentiment_score: average_score(&list),
        })
        .collect();
    stats.sort_by(|a, b| b.total_articles.cmp(&a.total_articles).then_with(|| a.source.cmp(&b.source)));
    Ok(Json(stats))
}

async fn news_trending_topics(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<Params>) -> ApiResult<Json<TrendingTopics>> {
    authenticated(&state, &headers)?;
    let days = parse_positive(&params, "days", 7)?;
    let limit = parse_positive(&params, "limit", 10)?;
    let articles = window(&state, Some(days))?;
    let (total, mut topics) = topic_counts(&articles);
    let unique = topics.len() as u64;
    topics.truncate(limit);
    Ok(Json(TrendingTopics {
        period_days: days as u32,
        total_articles: articles.len() as u64,
        total_topics: total,
        unique_topics: unique,
        trending_topics: topics,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params { pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() }

    #[test]
    fn pagination_envelope() {
        let rows: Vec<Value> = (1..=7).map(|i| json!({"id": i})).collect();
        let p = params(&[("page", "2"), ("page_size", "5"), ("search", "kumar")]);
        let Json(v) = paginate("/api/voters/", &p, rows.clone()).ok().unwrap();
        assert_eq!(v["count"], 7);
        assert_eq!(v["results"].as_array().unwrap().len(), 2);
        assert!(v["next"].is_null());
        assert_eq!(v["previous"], "/api/voters/?page=1&page_size=5&search=kumar");

        assert!(paginate("/api/voters/", &params(&[("page", "3"), ("page_size", "5")]), rows.clone()).is_err());
        assert!(paginate("/api/voters/", &params(&[("page", "0")]), rows).is_err());
        let Json(empty) = paginate("/api/voters/", &Params::new(), Vec::new()).ok().unwrap();
        assert_eq!(empty["count"], 0);
    }

    #[test]
    fn huge_page_is_not_found() {
        let rows: Vec<Value> = (1..=3).map(|i| json!({"id": i})).collect();
        let huge = usize::MAX.to_string();
        assert!(paginate("/api/voters/", &params(&[("page", huge.as_str()), ("page_size", "1000")]), rows.clone()).is_err());
        assert!(paginate("/api/voters/", &params(&[("page", huge.as_str()), ("page_size", "1")]), rows).is_err());
    }

    #[test]
    fn window_rejects_unrepresentable_spans() {
        assert!(window_start(7).is_ok());
        assert!(window_start(u32::MAX as usize).is_err());
        assert!(window_start(usize::MAX).is_err());
    }

    #[test]
    fn search_and_filters() {
        let rows = vec![
            json!({"name": "Arun Kumar", "district": "Chennai"}),
            json!({"name": "Priya", "district": "Chennai"}),
            json!({"name": "Vijay Kumar", "district": "Salem"}),
        ];
        let got = filter_rows(rows.clone(), &params(&[("search", " KUMAR ")]), &["name"], &["district"]);
        assert_eq!(got.len(), 2);
        let got = filter_rows(rows, &params(&[("search", "kumar"), ("district", "salem")]), &["name"], &["district"]);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["name"], "Vijay Kumar");
    }

    #[test]
    fn topic_percentages() {
        let store = super::super::DataStore::demo();
        let all: Vec<_> = store.news().iter().collect();
        let (total, topics) = topic_counts(&all);
        assert!(total > 0);
        assert_eq!(topics[0].topic, "water");
        assert_eq!(topics[0].count, 2);
    }
}
