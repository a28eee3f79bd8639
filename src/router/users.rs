use serde::Serialize;

use super::{BaasClient, GatewayClient, ListParams, Page};
use crate::error::AppResult;
use crate::identity::{Identity, Role};
use crate::model::UserProfile;

pub struct UserService<'a> {
    gateway: &'a GatewayClient,
    baas: &'a BaasClient,
}

impl<'a> UserService<'a> {
    pub(super) fn new(gateway: &'a GatewayClient, baas: &'a BaasClient) -> Self { Self { gateway, baas } }

    /// Profile row straight from the table API.
    pub async fn get_profile(&self, user_id: &str) -> AppResult<UserProfile> {
        self.baas.table("api_userprofile").eq("user_id", user_id).single().await
    }

    /// Profile changes go through the gateway so its validation applies.
    pub async fn update_profile<B: Serialize + ?Sized>(&self, updates: &B) -> AppResult<Identity> {
        self.gateway.patch("/api/auth/profile/", updates).await
    }

    /// Role-filtered user listing (`role` is sent as a filter).
    pub async fn list_users(&self, params: &ListParams, role: Option<Role>) -> AppResult<Page<Identity>> {
        let mut p = params.clone();
        if let Some(r) = role {
            p = p.filter("role", r.as_str());
        }
        self.gateway.get("/api/auth/users/", &p.to_query()).await
    }
}
