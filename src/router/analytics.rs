use chrono::NaiveDate;
use serde_json::{Map, Value};

use super::GatewayClient;
use crate::error::{AppError, AppResult};

/// Region and date window for the sentiment aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentimentQuery {
    pub district: Option<String>,
    pub constituency: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl SentimentQuery {
    fn to_query(&self) -> Vec<(String, String)> {
        let mut q = Vec::new();
        if let Some(d) = self.district.as_deref().filter(|s| !s.is_empty()) {
            q.push(("district".to_string(), d.to_string()));
        }
        if let Some(c) = self.constituency.as_deref().filter(|s| !s.is_empty()) {
            q.push(("constituency".to_string(), c.to_string()));
        }
        if let Some(d) = self.start_date {
            q.push(("start_date".to_string(), d.format("%Y-%m-%d").to_string()));
        }
        if let Some(d) = self.end_date {
            q.push(("end_date".to_string(), d.format("%Y-%m-%d").to_string()));
        }
        q
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendPeriod {
    Day,
    Week,
    Month,
}

impl TrendPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendPeriod::Day => "day",
            TrendPeriod::Week => "week",
            TrendPeriod::Month => "month",
        }
    }
}

/// Server-side aggregation; response shapes are owned by the gateway and
/// passed through as JSON.
pub struct AnalyticsService<'a> {
    gateway: &'a GatewayClient,
}

impl<'a> AnalyticsService<'a> {
    pub(super) fn new(gateway: &'a GatewayClient) -> Self { Self { gateway } }

    pub async fn sentiment(&self, query: &SentimentQuery) -> AppResult<Value> {
        if let (Some(s), Some(e)) = (query.start_date, query.end_date) {
            if s > e {
                return Err(AppError::user("invalid_range", "start_date is after end_date"));
            }
        }
        self.gateway.get("/api/analytics/sentiment/", &query.to_query()).await
    }

    pub async fn trends(&self, district: Option<&str>, period: Option<TrendPeriod>) -> AppResult<Value> {
        let mut q = Vec::new();
        if let Some(d) = district.filter(|s| !s.is_empty()) {
            q.push(("district".to_string(), d.to_string()));
        }
        if let Some(p) = period {
            q.push(("period".to_string(), p.as_str().to_string()));
        }
        self.gateway.get("/api/analytics/trends/", &q).await
    }

    /// `params` must be a JSON object (or null); its keys travel next to `report_type`.
    pub async fn generate_report(&self, report_type: &str, params: Value) -> AppResult<Value> {
        if report_type.trim().is_empty() {
            return Err(AppError::user("report_type_required", "report type is required"));
        }
        let mut body = match params {
            Value::Object(m) => m,
            Value::Null => Map::new(),
            _ => return Err(AppError::user("invalid_report_params", "report parameters must be an object")),
        };
        body.insert("report_type".to_string(), Value::String(report_type.to_string()));
        self.gateway.post("/api/reports/generate/", &Value::Object(body)).await
    }
}
