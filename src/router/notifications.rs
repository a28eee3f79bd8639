use super::{BaasClient, ChangeFilter, Subscription};
use crate::error::AppResult;
use crate::model::Notification;

const TABLE: &str = "api_notification";
const PAGE: u32 = 50;

pub struct NotificationService<'a> {
    baas: &'a BaasClient,
}

impl<'a> NotificationService<'a> {
    pub(super) fn new(baas: &'a BaasClient) -> Self { Self { baas } }

    /// Newest first, at most 50.
    pub async fn list(&self, user_id: &str) -> AppResult<Vec<Notification>> {
        self.baas.table(TABLE).eq("user_id", user_id).order("created_at", false).limit(PAGE).select().await
    }

    pub async fn mark_as_read(&self, notification_id: &str) -> AppResult<()> {
        let body = serde_json::json!({"is_read": true, "read_at": chrono::Utc::now().to_rfc3339()});
        self.baas.table(TABLE).eq("id", notification_id).update(&body).await
    }

    pub async fn subscribe(&self, user_id: &str) -> AppResult<Subscription<Notification>> {
        let filter = ChangeFilter::inserts(&format!("notifications-{}", user_id), TABLE).column_eq("user_id", user_id);
        self.baas.subscribe(filter).await
    }
}
