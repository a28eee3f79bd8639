use super::{BaasClient, ChangeFilter, GatewayClient, Subscription};
use crate::error::{AppError, AppResult};
use crate::model::{Alert, NewAlert, Severity};

const TABLE: &str = "api_alert";

pub struct AlertService<'a> {
    gateway: &'a GatewayClient,
    baas: &'a BaasClient,
}

impl<'a> AlertService<'a> {
    pub(super) fn new(gateway: &'a GatewayClient, baas: &'a BaasClient) -> Self { Self { gateway, baas } }

    /// Newest first, optionally one severity and a row cap.
    pub async fn list(&self, severity: Option<Severity>, limit: Option<u32>) -> AppResult<Vec<Alert>> {
        let mut q = self.baas.table(TABLE).order("created_at", false);
        if let Some(s) = severity {
            q = q.eq("severity", s.as_str());
        }
        if let Some(n) = limit {
            q = q.limit(n);
        }
        q.select().await
    }

    pub async fn create(&self, alert: &NewAlert) -> AppResult<Alert> {
        if alert.title.trim().is_empty() {
            return Err(AppError::user("title_required", "alert title is required"));
        }
        self.gateway.post("/api/alerts/", alert).await
    }

    pub async fn subscribe(&self) -> AppResult<Subscription<Alert>> {
        self.baas.subscribe(ChangeFilter::inserts("alerts", TABLE)).await
    }
}
