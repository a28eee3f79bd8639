//! Domain records exchanged with the gateway and the BaaS tables.
//!
//! Records are lenient on input: ids may arrive as integers (gateway) or UUID
//! strings (BaaS), optional columns may be missing, and columns this crate does
//! not model are kept in `extra` so they survive a read-modify-write.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::Role;

fn id_field<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    crate::identity::id_from_string_or_number(d)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(deserialize_with = "id_field")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub voter_id: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub constituency: Option<String>,
    #[serde(default)]
    pub ward: Option<String>,
    #[serde(default)]
    pub booth_number: Option<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    #[serde(deserialize_with = "id_field")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(deserialize_with = "id_field")]
    pub id: String,
    #[serde(deserialize_with = "id_field")]
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub related_model: Option<String>,
    #[serde(default)]
    pub related_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_notification_type() -> String { "info".to_string() }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = crate::error::AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(crate::error::AppError::user("invalid_severity", format!("unknown severity '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(deserialize_with = "id_field")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub alert_type: Option<String>,
    #[serde(default)]
    pub constituency: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Payload for `POST /api/alerts/`; the gateway assigns id and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constituency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    #[serde(deserialize_with = "id_field")]
    pub id: String,
    #[serde(default)]
    pub user: Option<String>,
    pub action: String,
    #[serde(default)]
    pub target_model: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub changes: Map<String, Value>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "id_field")]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub constituency: Option<String>,
    #[serde(default)]
    pub must_change_password: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityLevel {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueCategory {
    #[serde(deserialize_with = "id_field")]
    pub id: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub name_tamil: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub priority_level: PriorityLevel,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "yes")]
    pub is_active: bool,
    #[serde(default)]
    pub is_hot_topic: bool,
}

fn yes() -> bool { true }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    #[serde(deserialize_with = "id_field")]
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    #[serde(default)]
    pub author: Option<String>,
    pub published_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub word_count: u32,
    pub tvk_sentiment: Sentiment,
    #[serde(default)]
    pub tvk_sentiment_score: f64,
    #[serde(default)]
    pub vijay_mentions: u32,
    #[serde(default)]
    pub tvk_mentions: u32,
    #[serde(default)]
    pub dmk_mentions: u32,
    #[serde(default)]
    pub is_relevant: bool,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticleDetail {
    #[serde(flatten)]
    pub article: NewsArticle,
    #[serde(default)]
    pub article_text: String,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub sentiment_reasoning: Option<String>,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub entities_mentioned: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsSentimentStats {
    pub total_articles: u64,
    pub positive_count: u64,
    pub negative_count: u64,
    pub neutral_count: u64,
    pub avg_sentiment_score: f64,
    #[serde(default)]
    pub total_vijay_mentions: u64,
    #[serde(default)]
    pub total_tvk_mentions: u64,
    #[serde(default)]
    pub articles_by_source: std::collections::BTreeMap<String, u64>,
    #[serde(default)]
    pub articles_by_language: std::collections::BTreeMap<String, u64>,
    #[serde(default)]
    pub trending_topics: Vec<TopicCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsSourceStats {
    pub source: String,
    pub total_articles: u64,
    pub positive_count: u64,
    pub negative_count: u64,
    pub neutral_count: u64,
    pub avg_sentiment_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingTopics {
    pub period_days: u32,
    pub total_articles: u64,
    #[serde(default)]
    pub total_topics: u64,
    #[serde(default)]
    pub unique_topics: u64,
    pub trending_topics: Vec<TopicCount>,
}

/// One day of the client-side sentiment trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentTrendPoint {
    pub date: chrono::NaiveDate,
    pub positive: u64,
    pub negative: u64,
    pub neutral: u64,
    pub avg_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voter_keeps_unmodelled_columns() {
        let v: Voter = serde_json::from_value(serde_json::json!({
            "id": 17, "name": "Kumar S", "constituency": "Madurai West", "caste_group": "x"
        })).unwrap();
        assert_eq!(v.id, "17");
        assert_eq!(v.extra.get("caste_group"), Some(&serde_json::json!("x")));
        let back = serde_json::to_value(&v).unwrap();
        assert_eq!(back["caste_group"], "x");
    }

    #[test]
    fn article_keeps_publisher_offset() {
        let a: NewsArticle = serde_json::from_value(serde_json::json!({
            "id": "a1", "title": "t", "url": "https://x", "source": "The Hindu",
            "published_at": "2025-11-08T23:30:00+05:30", "tvk_sentiment": "positive"
        })).unwrap();
        assert_eq!(a.published_at.date_naive().to_string(), "2025-11-08");
        assert_eq!(a.tvk_sentiment, Sentiment::Positive);
    }

    #[test]
    fn severity_parse() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("urgent".parse::<Severity>().is_err());
    }
}
