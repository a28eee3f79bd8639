use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{read_json, send_authorized};
use crate::error::AppResult;
use crate::identity::SessionStore;

/// JSON client for the REST gateway (`<api_url>/api/...`).
#[derive(Clone)]
pub struct GatewayClient {
    base: String,
    client: reqwest::Client,
    session: Arc<SessionStore>,
}

impl GatewayClient {
    pub fn new(base: &str, client: reqwest::Client, session: Arc<SessionStore>) -> Self {
        Self { base: base.trim_end_matches('/').to_string(), client, session }
    }

    pub fn base(&self) -> &str { &self.base }

    fn url(&self, path: &str) -> String { format!("{}{}", self.base, path) }

    fn bearer(rb: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
        match token {
            Some(t) => rb.bearer_auth(t),
            None => rb,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(String, String)]) -> AppResult<T> {
        let url = self.url(path);
        debug!(target: "pulse::router", "GET {} {:?}", url, query);
        let resp = send_authorized(&self.session, |tok| Self::bearer(self.client.get(&url).query(query), tok)).await?;
        read_json(resp).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> AppResult<T> {
        let url = self.url(path);
        debug!(target: "pulse::router", "POST {}", url);
        let resp = send_authorized(&self.session, |tok| Self::bearer(self.client.post(&url).json(body), tok)).await?;
        read_json(resp).await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> AppResult<T> {
        let url = self.url(path);
        debug!(target: "pulse::router", "PATCH {}", url);
        let resp = send_authorized(&self.session, |tok| Self::bearer(self.client.patch(&url).json(body), tok)).await?;
        read_json(resp).await
    }

    /// Hard delete of one record; the gateway answers 204.
    pub async fn delete(&self, path: &str) -> AppResult<()> {
        let url = self.url(path);
        debug!(target: "pulse::router", "DELETE {}", url);
        send_authorized(&self.session, |tok| Self::bearer(self.client.delete(&url), tok)).await?;
        Ok(())
    }

    /// Multipart upload of a single `file` field.
    pub async fn upload<T: DeserializeOwned>(&self, path: &str, file_name: &str, bytes: Vec<u8>) -> AppResult<T> {
        let url = self.url(path);
        debug!(target: "pulse::router", "POST {} (multipart, {} bytes)", url, bytes.len());
        let resp = send_authorized(&self.session, |tok| {
            let part = Part::bytes(bytes.clone()).file_name(file_name.to_string());
            Self::bearer(self.client.post(&url).multipart(Form::new().part("file", part)), tok)
        })
        .await?;
        read_json(resp).await
    }
}
