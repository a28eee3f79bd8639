use serde::Serialize;

use super::{GatewayClient, ListParams, Page};
use crate::error::AppResult;
use crate::model::Campaign;

pub struct CampaignService<'a> {
    gateway: &'a GatewayClient,
}

impl<'a> CampaignService<'a> {
    pub(super) fn new(gateway: &'a GatewayClient) -> Self { Self { gateway } }

    pub async fn list(&self, params: &ListParams) -> AppResult<Page<Campaign>> {
        self.gateway.get("/api/campaigns/", &params.to_query()).await
    }

    pub async fn get(&self, id: &str) -> AppResult<Campaign> {
        self.gateway.get(&format!("/api/campaigns/{}/", id), &[]).await
    }

    pub async fn create<B: Serialize + ?Sized>(&self, campaign: &B) -> AppResult<Campaign> {
        self.gateway.post("/api/campaigns/", campaign).await
    }

    pub async fn update<B: Serialize + ?Sized>(&self, id: &str, updates: &B) -> AppResult<Campaign> {
        self.gateway.patch(&format!("/api/campaigns/{}/", id), updates).await
    }

    /// Removes the campaign record only; dependent records are left to the server.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.gateway.delete(&format!("/api/campaigns/{}/", id)).await
    }
}
