use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::realtime::{self, ChangeFilter, Subscription};
use super::{read_json, send_authorized};
use crate::error::{AppError, AppResult};
use crate::identity::SessionStore;

/// Table and realtime client for the managed backend.
///
/// Requests carry the project `apikey`; the bearer is the user's access token
/// when signed in, otherwise the anon key (row policies then apply as anon).
#[derive(Clone)]
pub struct BaasClient {
    base: String,
    anon_key: String,
    client: reqwest::Client,
    session: Arc<SessionStore>,
}

impl BaasClient {
    pub fn new(base: &str, anon_key: &str, client: reqwest::Client, session: Arc<SessionStore>) -> Self {
        Self { base: base.trim_end_matches('/').to_string(), anon_key: anon_key.to_string(), client, session }
    }

    pub fn table(&self, name: &str) -> TableQuery<'_> {
        TableQuery { baas: self, table: name.to_string(), filters: Vec::new(), order: None, limit: None }
    }

    /// `ws(s)://host/realtime/v1/websocket?apikey=...&vsn=1.0.0`
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base.clone()
        };
        format!("{}/realtime/v1/websocket?apikey={}&vsn=1.0.0", ws_base, urlencoding::encode(&self.anon_key))
    }

    /// Live INSERT feed for `filter`, decoded as `T`.
    pub async fn subscribe<T: DeserializeOwned + Send + 'static>(&self, filter: ChangeFilter) -> AppResult<Subscription<T>> {
        let token = self.session.access_token().unwrap_or_else(|| self.anon_key.clone());
        realtime::subscribe(self.realtime_url(), filter, token).await
    }
}

/// A PostgREST-style query: equality filters, one order column and a limit.
pub struct TableQuery<'a> {
    baas: &'a BaasClient,
    table: String,
    filters: Vec<(String, String)>,
    order: Option<String>,
    limit: Option<u32>,
}

impl<'a> TableQuery<'a> {
    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters.push((column.to_string(), format!("eq.{}", value.to_string())));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(format!("{}.{}", column, if ascending { "asc" } else { "desc" }));
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    fn url(&self) -> String { format!("{}/rest/v1/{}", self.baas.base, self.table) }

    fn query(&self, select: bool) -> Vec<(String, String)> {
        let mut q = Vec::new();
        if select {
            q.push(("select".to_string(), "*".to_string()));
        }
        q.extend(self.filters.iter().cloned());
        if let Some(o) = &self.order {
            q.push(("order".to_string(), o.clone()));
        }
        if let Some(l) = self.limit {
            q.push(("limit".to_string(), l.to_string()));
        }
        q
    }

    pub async fn select<T: DeserializeOwned>(self) -> AppResult<Vec<T>> {
        let url = self.url();
        let query = self.query(true);
        debug!(target: "pulse::router", "BAAS select {} {:?}", self.table, query);
        let b = self.baas;
        let resp = send_authorized(&b.session, |tok| {
            b.client.get(&url).query(&query).header("apikey", &b.anon_key).bearer_auth(tok.unwrap_or(b.anon_key.as_str()))
        })
        .await?;
        read_json(resp).await
    }

    /// Exactly one row, or `NotFound`.
    pub async fn single<T: DeserializeOwned>(self) -> AppResult<T> {
        let table = self.table.clone();
        let mut rows: Vec<T> = self.select().await?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            0 => Err(AppError::not_found("row_not_found", format!("no matching row in {}", table))),
            n => Err(AppError::remote("multiple_rows", format!("expected one row in {}, got {}", table, n))),
        }
    }

    /// PATCH every row matching the filters. Refuses to run unfiltered.
    pub async fn update<B: Serialize + ?Sized>(self, body: &B) -> AppResult<()> {
        if self.filters.is_empty() {
            return Err(AppError::user("unfiltered_update", "refusing to update a whole table"));
        }
        let url = self.url();
        let query = self.query(false);
        debug!(target: "pulse::router", "BAAS update {} {:?}", self.table, query);
        let b = self.baas;
        send_authorized(&b.session, |tok| {
            b.client
                .patch(&url)
                .query(&query)
                .header("apikey", &b.anon_key)
                .header("Prefer", "return=minimal")
                .bearer_auth(tok.unwrap_or(b.anon_key.as_str()))
                .json(body)
        })
        .await?;
        Ok(())
    }
}
