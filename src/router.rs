//!
//! pulse data router
//! -----------------
//! One call surface per entity over two backends: the REST gateway (business
//! logic, validation, aggregation) and the BaaS table API (simple reads,
//! row updates and realtime). Callers never pick a backend; each service
//! method routes to the one that owns the operation.
//!
//! Both clients authenticate through the shared `SessionStore`: the current
//! access token is attached as a bearer when present, and a 401 triggers one
//! coalesced refresh followed by exactly one retry.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::identity::SessionStore;

mod gateway;
mod baas;
mod realtime;
mod users;
mod notifications;
mod campaigns;
mod voters;
mod analytics;
mod alerts;
mod audit;
mod news;
mod issues;

pub use gateway::GatewayClient;
pub use baas::{BaasClient, TableQuery};
pub use realtime::{ChangeFilter, Subscription};
pub use users::UserService;
pub use notifications::NotificationService;
pub use campaigns::CampaignService;
pub use voters::{BulkImportReport, VoterService};
pub use analytics::{AnalyticsService, SentimentQuery, TrendPeriod};
pub use alerts::AlertService;
pub use audit::AuditService;
pub use news::{NewsFilters, NewsService};
pub use issues::IssueService;

/// Pull the most specific server message out of an error body: `detail`
/// (gateway), then the BaaS auth fields, then generic `error`/`message`.
fn server_message(body: &Value) -> Option<String> {
    ["detail", "error_description", "error", "message", "msg"]
        .iter()
        .find_map(|k| body.get(*k).and_then(|v| v.as_str()).filter(|s| !s.is_empty()).map(str::to_string))
}

/// Turn a non-2xx response into an `AppError`, status selecting the variant.
pub(crate) async fn read_error(resp: reqwest::Response) -> AppError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<Value>(&body) {
        Ok(v) => server_message(&v).unwrap_or_else(|| format!("Request failed: {}", status.as_u16())),
        Err(_) => status.canonical_reason().map(str::to_string).unwrap_or_else(|| format!("Request failed: {}", status.as_u16())),
    };
    debug!(target: "pulse::router", "http {} -> {}", status.as_u16(), message);
    AppError::from_http(status.as_u16(), message)
}

pub(crate) async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> AppResult<T> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Send with the session's bearer; on 401 refresh once and retry once.
///
/// `build` is called once per attempt because request bodies (multipart in
/// particular) cannot be replayed.
pub(crate) async fn send_authorized<F>(session: &SessionStore, build: F) -> AppResult<reqwest::Response>
where
    F: Fn(Option<&str>) -> reqwest::RequestBuilder,
{
    let token = session.access_token();
    let resp = build(token.as_deref()).send().await?;
    if resp.status().is_success() {
        return Ok(resp);
    }
    if resp.status() != StatusCode::UNAUTHORIZED {
        return Err(read_error(resp).await);
    }
    let rejected = read_error(resp).await;
    let Some(stale) = token else { return Err(rejected); };

    debug!(target: "pulse::router", "401 with a token, refreshing once");
    let fresh = match session.refresh_access(&stale).await {
        Ok(t) => t,
        Err(e) => {
            warn!(target: "pulse::router", "refresh after 401 failed: {}", e);
            return Err(rejected);
        }
    };
    let retry = build(Some(&fresh)).send().await?;
    if retry.status().is_success() {
        Ok(retry)
    } else {
        Err(read_error(retry).await)
    }
}

/// Paging, search and field filters for gateway list endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
    pub filters: Vec<(String, String)>,
}

impl ListParams {
    pub fn new() -> Self { Self::default() }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    /// Query pairs; empty values are not sent.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut q = Vec::new();
        if let Some(p) = self.page.filter(|p| *p > 0) {
            q.push(("page".to_string(), p.to_string()));
        }
        if let Some(s) = self.page_size.filter(|s| *s > 0) {
            q.push(("page_size".to_string(), s.to_string()));
        }
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            q.push(("search".to_string(), term.to_string()));
        }
        for (k, v) in &self.filters {
            if !k.is_empty() && !v.is_empty() {
                q.push((k.clone(), v.clone()));
            }
        }
        q
    }
}

/// The gateway's paginated envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(rename = "count")]
    pub total: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(rename = "results")]
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool { self.next.is_some() }
}

/// Entry point bundling both clients; services borrow from it.
#[derive(Clone)]
pub struct DataRouter {
    gateway: GatewayClient,
    baas: BaasClient,
    session: Arc<SessionStore>,
}

impl DataRouter {
    pub fn new(cfg: &Config, session: Arc<SessionStore>, client: reqwest::Client) -> Self {
        Self {
            gateway: GatewayClient::new(cfg.api_base(), client.clone(), session.clone()),
            baas: BaasClient::new(cfg.baas_base(), &cfg.baas_anon_key, client, session.clone()),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionStore> { &self.session }
    pub fn gateway(&self) -> &GatewayClient { &self.gateway }
    pub fn baas(&self) -> &BaasClient { &self.baas }

    pub fn users(&self) -> UserService<'_> { UserService::new(&self.gateway, &self.baas) }
    pub fn notifications(&self) -> NotificationService<'_> { NotificationService::new(&self.baas) }
    pub fn campaigns(&self) -> CampaignService<'_> { CampaignService::new(&self.gateway) }
    pub fn voters(&self) -> VoterService<'_> { VoterService::new(&self.gateway) }
    pub fn analytics(&self) -> AnalyticsService<'_> { AnalyticsService::new(&self.gateway) }
    pub fn alerts(&self) -> AlertService<'_> { AlertService::new(&self.gateway, &self.baas) }
    pub fn audit(&self) -> AuditService<'_> { AuditService::new(&self.gateway) }
    pub fn news(&self) -> NewsService<'_> { NewsService::new(&self.gateway) }
    pub fn issues(&self) -> IssueService<'_> { IssueService::new(&self.baas) }
}
