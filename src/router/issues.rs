use super::BaasClient;
use crate::error::AppResult;
use crate::model::IssueCategory;

pub struct IssueService<'a> {
    baas: &'a BaasClient,
}

impl<'a> IssueService<'a> {
    pub(super) fn new(baas: &'a BaasClient) -> Self { Self { baas } }

    /// Active categories, most urgent first.
    pub async fn categories(&self) -> AppResult<Vec<IssueCategory>> {
        let mut rows: Vec<IssueCategory> = self.baas.table("issue_categories").eq("is_active", true).select().await?;
        rows.sort_by(|a, b| a.priority_level.cmp(&b.priority_level).then_with(|| a.name.cmp(&b.name)));
        Ok(rows)
    }

    pub async fn hot_topics(&self) -> AppResult<Vec<IssueCategory>> {
        Ok(self.categories().await?.into_iter().filter(|c| c.is_hot_topic).collect())
    }
}
