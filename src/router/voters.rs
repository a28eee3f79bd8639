use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{GatewayClient, ListParams, Page};
use crate::error::{AppError, AppResult};
use crate::model::Voter;

/// What the gateway reports after a bulk import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkImportReport {
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

pub struct VoterService<'a> {
    gateway: &'a GatewayClient,
}

impl<'a> VoterService<'a> {
    pub(super) fn new(gateway: &'a GatewayClient) -> Self { Self { gateway } }

    /// Filters understood by the gateway: district, constituency, sentiment.
    pub async fn list(&self, params: &ListParams) -> AppResult<Page<Voter>> {
        self.gateway.get("/api/voters/", &params.to_query()).await
    }

    pub async fn get(&self, id: &str) -> AppResult<Voter> {
        self.gateway.get(&format!("/api/voters/{}/", id), &[]).await
    }

    pub async fn create<B: Serialize + ?Sized>(&self, voter: &B) -> AppResult<Voter> {
        self.gateway.post("/api/voters/", voter).await
    }

    pub async fn update<B: Serialize + ?Sized>(&self, id: &str, updates: &B) -> AppResult<Voter> {
        self.gateway.patch(&format!("/api/voters/{}/", id), updates).await
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.gateway.delete(&format!("/api/voters/{}/", id)).await
    }

    pub async fn bulk_import(&self, file_name: &str, bytes: Vec<u8>) -> AppResult<BulkImportReport> {
        if bytes.is_empty() {
            return Err(AppError::user("empty_file", "import file is empty"));
        }
        self.gateway.upload("/api/voters/bulk-import/", file_name, bytes).await
    }

    pub async fn bulk_import_file(&self, path: &Path) -> AppResult<BulkImportReport> {
        let bytes = tokio::fs::read(path).await?;
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("voters.csv").to_string();
        self.bulk_import(&name, bytes).await
    }
}
