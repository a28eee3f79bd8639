use std::collections::BTreeMap;

use super::{GatewayClient, Page};
use crate::error::AppResult;
use crate::model::{
    NewsArticle, NewsArticleDetail, NewsSentimentStats, NewsSourceStats, Sentiment, SentimentTrendPoint, TrendingTopics,
};

/// Page size used when pulling every article of a window for the trend.
const TREND_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewsFilters {
    pub days: Option<u32>,
    pub sentiment: Option<Sentiment>,
    pub source: Option<String>,
    pub language: Option<String>,
    pub relevant_only: bool,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl NewsFilters {
    fn to_query(&self) -> Vec<(String, String)> {
        let mut q: Vec<(String, String)> = Vec::new();
        let mut push = |k: &str, v: String| {
            if !v.is_empty() {
                q.push((k.to_string(), v));
            }
        };
        if let Some(d) = self.days { push("days", d.to_string()); }
        if let Some(s) = self.sentiment { push("sentiment", s.as_str().to_string()); }
        if let Some(s) = &self.source { push("source", s.clone()); }
        if let Some(l) = &self.language { push("language", l.clone()); }
        if self.relevant_only { push("relevant_only", "true".to_string()); }
        if let Some(s) = &self.search { push("search", s.trim().to_string()); }
        if let Some(p) = self.page { push("page", p.to_string()); }
        if let Some(p) = self.page_size { push("page_size", p.to_string()); }
        q
    }
}

pub struct NewsService<'a> {
    gateway: &'a GatewayClient,
}

impl<'a> NewsService<'a> {
    pub(super) fn new(gateway: &'a GatewayClient) -> Self { Self { gateway } }

    pub async fn articles(&self, filters: &NewsFilters) -> AppResult<Page<NewsArticle>> {
        self.gateway.get("/api/news/", &filters.to_query()).await
    }

    pub async fn article(&self, id: &str) -> AppResult<NewsArticleDetail> {
        self.gateway.get(&format!("/api/news/{}/", id), &[]).await
    }

    pub async fn sentiment_stats(&self, days: u32) -> AppResult<NewsSentimentStats> {
        self.gateway.get("/api/news/sentiment-stats/", &[("days".to_string(), days.to_string())]).await
    }

    pub async fn source_stats(&self, days: u32) -> AppResult<Vec<NewsSourceStats>> {
        self.gateway.get("/api/news/source-stats/", &[("days".to_string(), days.to_string())]).await
    }

    pub async fn trending_topics(&self, days: u32, limit: u32) -> AppResult<TrendingTopics> {
        let q = [("days".to_string(), days.to_string()), ("limit".to_string(), limit.to_string())];
        self.gateway.get("/api/news/trending-topics/", &q).await
    }

    /// Daily sentiment counts for the window, computed from the article list.
    pub async fn sentiment_trend(&self, days: u32) -> AppResult<Vec<SentimentTrendPoint>> {
        let filters = NewsFilters { days: Some(days), page_size: Some(TREND_PAGE_SIZE), ..Default::default() };
        let page = self.articles(&filters).await?;
        Ok(sentiment_trend(&page.items))
    }
}

/// Group by publication date (in the publisher's offset), oldest day first.
/// The average score is rounded to two decimals.
pub fn sentiment_trend(articles: &[NewsArticle]) -> Vec<SentimentTrendPoint> {
    let mut days: BTreeMap<chrono::NaiveDate, Vec<&NewsArticle>> = BTreeMap::new();
    for a in articles {
        days.entry(a.published_at.date_naive()).or_default().push(a);
    }
    days.into_iter()
        .map(|(date, day)| {
            let count = |s: Sentiment| day.iter().filter(|a| a.tvk_sentiment == s).count() as u64;
            let avg = day.iter().map(|a| a.tvk_sentiment_score).sum::<f64>() / day.len() as f64;
            SentimentTrendPoint {
                date,
                positive: count(Sentiment::Positive),
                negative: count(Sentiment::Negative),
                neutral: count(Sentiment::Neutral),
                avg_score: (avg * 100.0).round() / 100.0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(id: &str, at: &str, s: Sentiment, score: f64) -> NewsArticle {
        serde_json::from_value(serde_json::json!({
            "id": id, "title": "t", "url": "https://x", "source": "Dinamalar",
            "published_at": at, "tvk_sentiment": s.as_str(), "tvk_sentiment_score": score
        }))
        .unwrap()
    }

    #[test]
    fn trend_groups_by_day_and_sorts() {
        let items = vec![
            article("1", "2025-11-09T10:00:00+05:30", Sentiment::Positive, 0.8),
            article("2", "2025-11-08T09:00:00+05:30", Sentiment::Negative, -0.5),
            article("3", "2025-11-09T18:00:00+05:30", Sentiment::Neutral, 0.111),
        ];
        let t = sentiment_trend(&items);
        assert_eq!(t.len(), 2);
        assert_eq!(t[0].date.to_string(), "2025-11-08");
        assert_eq!(t[0].negative, 1);
        assert_eq!(t[1].positive, 1);
        assert_eq!(t[1].neutral, 1);
        assert_eq!(t[1].avg_score, 0.46);
        assert!(sentiment_trend(&[]).is_empty());
    }

    #[test]
    fn filters_skip_unset() {
        let f = NewsFilters { days: Some(7), relevant_only: true, search: Some("  ".into()), ..Default::default() };
        assert_eq!(f.to_query(), vec![("days".into(), "7".into()), ("relevant_only".into(), "true".into())]);
    }
}
