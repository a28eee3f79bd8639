use super::{GatewayClient, ListParams, Page};
use crate::error::AppResult;
use crate::model::AuditLogEntry;

pub struct AuditService<'a> {
    gateway: &'a GatewayClient,
}

impl<'a> AuditService<'a> {
    pub(super) fn new(gateway: &'a GatewayClient) -> Self { Self { gateway } }

    /// Admin-only on the gateway; filters: user, action, start_date, end_date.
    pub async fn list(&self, params: &ListParams) -> AppResult<Page<AuditLogEntry>> {
        self.gateway.get("/api/audit-logs/", &params.to_query()).await
    }
}
