use std::collections::BTreeMap;

use chrono::{Duration, FixedOffset, Offset, Utc};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

use crate::identity::Identity;
use crate::model::NewsArticleDetail;
use crate::seed::ORGANIZATION_ID;
use crate::tprintln;

pub const VOTERS: &str = "api_voter";
pub const CAMPAIGNS: &str = "api_campaign";
pub const ALERTS: &str = "api_alert";
pub const NOTIFICATIONS: &str = "api_notification";
pub const PROFILES: &str = "api_userprofile";
pub const ISSUE_CATEGORIES: &str = "issue_categories";
pub const AUDIT_LOGS: &str = "api_auditlog";

/// One inserted row, as seen by realtime subscribers.
#[derive(Debug, Clone)]
pub struct Change {
    pub table: String,
    pub record: Value,
}

/// Who is reading through the table API.
#[derive(Debug, Clone)]
pub enum Caller {
    Anon,
    User(Identity),
}

impl Caller {
    /// Row policies: categories are public, notifications belong to their
    /// user, everything else needs a signed-in caller.
    pub fn can_see(&self, table: &str, row: &Value) -> bool {
        match (self, table) {
            (_, ISSUE_CATEGORIES) => true,
            (Caller::Anon, _) => false,
            (Caller::User(id), NOTIFICATIONS) => cell_text(row.get("user_id")).as_deref() == Some(id.id.as_str()),
            (Caller::User(_), _) => true,
        }
    }
}

/// Text form of a cell as PostgREST compares it (`eq.42`, `eq.true`).
pub fn cell_text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// `op.value` filter against one column. Only `eq` is supported.
pub fn matches_filter(row: &Value, column: &str, expr: &str) -> bool {
    match expr.split_once('.') {
        Some(("eq", want)) => cell_text(row.get(column)).as_deref() == Some(want),
        _ => false,
    }
}

/// `column=eq.value` as used by realtime join configs.
pub fn matches_row_filter(row: &Value, filter: &str) -> bool {
    match filter.split_once('=') {
        Some((col, expr)) => matches_filter(row, col, expr),
        None => false,
    }
}

/// Rows keyed by table name, integer ids per table, and a change feed.
pub struct DataStore {
    tables: RwLock<BTreeMap<String, Vec<Value>>>,
    next_ids: RwLock<BTreeMap<String, u64>>,
    news: Vec<NewsArticleDetail>,
    changes: broadcast::Sender<Change>,
}

impl DataStore {
    pub fn empty() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { tables: RwLock::new(BTreeMap::new()), next_ids: RwLock::new(BTreeMap::new()), news: Vec::new(), changes }
    }

    pub fn demo() -> Self {
        let mut store = Self::empty();
        for (table, rows) in fixtures() {
            for row in rows {
                store.insert_quiet(table, row);
            }
        }
        store.news = news_fixtures();
        tprintln!("data.demo tables={} news={}", store.tables.read().len(), store.news.len());
        store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> { self.changes.subscribe() }

    pub fn news(&self) -> &[NewsArticleDetail] { &self.news }

    pub fn has_table(&self, table: &str) -> bool { self.tables.read().contains_key(table) }

    pub fn rows(&self, table: &str) -> Vec<Value> { self.tables.read().get(table).cloned().unwrap_or_default() }

    pub fn find(&self, table: &str, id: &str) -> Option<Value> {
        self.tables.read().get(table)?.iter().find(|r| cell_text(r.get("id")).as_deref() == Some(id)).cloned()
    }

    fn insert_quiet(&self, table: &str, mut row: Value) -> Value {
        let id = {
            let mut ids = self.next_ids.write();
            let next = ids.entry(table.to_string()).or_insert(1);
            let id = *next;
            *next += 1;
            id
        };
        if let Value::Object(m) = &mut row {
            m.insert("id".into(), json!(id));
            m.entry("created_at").or_insert_with(|| json!(Utc::now().to_rfc3339()));
        }
        self.tables.write().entry(table.to_string()).or_default().push(row.clone());
        row
    }

    /// Assign an id and `created_at`, store, and publish the insert.
    pub fn insert(&self, table: &str, row: Value) -> Value {
        let row = self.insert_quiet(table, row);
        // No receivers is fine.
        let _ = self.changes.send(Change { table: table.to_string(), record: row.clone() });
        row
    }

    /// Merge `patch` into the row with `id`; returns the updated row.
    pub fn update(&self, table: &str, id: &str, patch: &Map<String, Value>) -> Option<Value> {
        let mut tables = self.tables.write();
        let row = tables.get_mut(table)?.iter_mut().find(|r| cell_text(r.get("id")).as_deref() == Some(id))?;
        if let Value::Object(m) = row {
            for (k, v) in patch {
                if k != "id" {
                    m.insert(k.clone(), v.clone());
                }
            }
            m.insert("updated_at".into(), json!(Utc::now().to_rfc3339()));
        }
        Some(row.clone())
    }

    /// Merge `patch` into every row accepted by `pred`; returns how many changed.
    pub fn update_where(&self, table: &str, patch: &Map<String, Value>, pred: impl Fn(&Value) -> bool) -> usize {
        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(table) else { return 0 };
        let mut n = 0;
        for row in rows.iter_mut().filter(|r| pred(r)) {
            if let Value::Object(m) = row {
                for (k, v) in patch {
                    if k != "id" {
                        m.insert(k.clone(), v.clone());
                    }
                }
                n += 1;
            }
        }
        n
    }

    pub fn delete(&self, table: &str, id: &str) -> bool {
        let mut tables = self.tables.write();
        let Some(rows) = tables.get_mut(table) else { return false };
        let before = rows.len();
        rows.retain(|r| cell_text(r.get("id")).as_deref() != Some(id));
        rows.len() != before
    }
}

fn voter(name: &str, voter_id: &str, district: &str, constituency: &str, ward: &str, sentiment: &str, day: u32) -> Value {
    json!({
        "name": name,
        "voter_id": voter_id,
        "phone": format!("98400{}", &voter_id[voter_id.len() - 5..]),
        "district": district,
        "constituency": constituency,
        "ward": ward,
        "sentiment": sentiment,
        "organization_id": ORGANIZATION_ID,
        "created_at": format!("2025-11-{:02}T09:00:00+00:00", day),
    })
}

fn fixtures() -> Vec<(&'static str, Vec<Value>)> {
    let voters = vec![
        voter("Arun Kumar", "TNV0000001", "Chennai", "Chennai Central", "Ward 42", "positive", 1),
        voter("Priya Raman", "TNV0000002", "Chennai", "Chennai Central", "Ward 42", "neutral", 1),
        voter("Senthil Kumar", "TNV0000003", "Coimbatore", "Coimbatore South", "Ward 12", "negative", 2),
        voter("Lakshmi Devi", "TNV0000004", "Madurai", "Madurai West", "Ward 3", "positive", 2),
        voter("Kumaravel S", "TNV0000005", "Madurai", "Madurai West", "Ward 3", "positive", 3),
        voter("Meena Kumari", "TNV0000006", "Salem", "Salem North", "Ward 18", "neutral", 3),
        voter("Rajesh Kumar", "TNV0000007", "Chennai", "Chennai Central", "Ward 40", "negative", 4),
        voter("Divya Bharathi", "TNV0000008", "Coimbatore", "Coimbatore South", "Ward 11", "positive", 4),
        voter("Vijay Kumar", "TNV0000009", "Salem", "Salem North", "Ward 18", "positive", 5),
        voter("Anitha Selvam", "TNV0000010", "Chennai", "Chennai Central", "Ward 41", "neutral", 5),
        voter("Karthik Kumar", "TNV0000011", "Madurai", "Madurai West", "Ward 4", "negative", 6),
        voter("Saravanan P", "TNV0000012", "Coimbatore", "Coimbatore South", "Ward 12", "neutral", 6),
        voter("Dinesh Kumar", "TNV0000013", "Chennai", "Chennai Central", "Ward 42", "positive", 7),
        voter("Revathi M", "TNV0000014", "Salem", "Salem North", "Ward 19", "negative", 7),
    ];
    let campaigns = vec![
        json!({"name": "Chennai Central door-to-door", "description": "Ward-level canvassing", "status": "active",
               "start_date": "2025-11-01", "end_date": "2026-01-31", "budget": 250000.0, "organization_id": ORGANIZATION_ID,
               "created_at": "2025-10-28T10:00:00+00:00"}),
        json!({"name": "Youth outreach Madurai", "description": "College campus meetups", "status": "draft",
               "start_date": "2025-12-01", "end_date": null, "budget": 80000.0, "organization_id": ORGANIZATION_ID,
               "created_at": "2025-11-02T10:00:00+00:00"}),
    ];
    let alerts = vec![
        json!({"title": "Water shortage complaints rising", "message": "Ward 42 reports up 40% this week", "severity": "high",
               "alert_type": "issue_spike", "constituency": "Chennai Central", "organization_id": ORGANIZATION_ID,
               "created_at": "2025-11-06T08:30:00+00:00"}),
        json!({"title": "Negative coverage in regional daily", "message": null, "severity": "medium",
               "alert_type": "media", "constituency": null, "organization_id": ORGANIZATION_ID,
               "created_at": "2025-11-07T12:00:00+00:00"}),
        json!({"title": "Booth agent shortfall", "message": "Salem North has 12 unstaffed booths", "severity": "critical",
               "alert_type": "operations", "constituency": "Salem North", "organization_id": ORGANIZATION_ID,
               "created_at": "2025-11-08T06:15:00+00:00"}),
    ];
    let notifications = vec![
        json!({"user_id": "4", "title": "New survey assigned", "message": "Ward 42 household survey is ready", "notification_type": "task",
               "is_read": false, "read_at": null, "metadata": {}, "created_at": "2025-11-07T09:00:00+00:00"}),
        json!({"user_id": "4", "title": "Welcome", "message": "Your field account is active", "notification_type": "info",
               "is_read": true, "read_at": "2025-11-01T10:00:00+00:00", "metadata": {}, "created_at": "2025-11-01T09:00:00+00:00"}),
        json!({"user_id": "2", "title": "Weekly report ready", "message": "Coimbatore South summary", "notification_type": "report",
               "is_read": false, "read_at": null, "metadata": {"report": "weekly"}, "created_at": "2025-11-08T07:00:00+00:00"}),
    ];
    let profiles = crate::identity::mock_accounts()
        .iter()
        .map(|a| {
            let i = &a.identity;
            json!({"user_id": i.id, "name": i.name, "email": i.email, "role": i.role, "organization_id": ORGANIZATION_ID,
                   "constituency": i.constituency, "must_change_password": false, "created_at": "2025-10-01T00:00:00+00:00"})
        })
        .collect();
    let categories = vec![
        json!({"code": "WATER", "name": "Drinking water", "name_tamil": "குடிநீர்", "category": "infrastructure",
               "priority_level": "Critical", "keywords": ["water", "tanker"], "is_active": true, "is_hot_topic": true}),
        json!({"code": "ROADS", "name": "Roads", "category": "infrastructure", "priority_level": "High",
               "keywords": ["road", "pothole"], "is_active": true, "is_hot_topic": false}),
        json!({"code": "JOBS", "name": "Employment", "category": "economy", "priority_level": "High",
               "keywords": ["jobs"], "is_active": true, "is_hot_topic": true}),
        json!({"code": "HEALTH", "name": "Healthcare", "category": "social", "priority_level": "Medium",
               "keywords": ["hospital"], "is_active": true, "is_hot_topic": false}),
        json!({"code": "LEGACY", "name": "Legacy category", "category": "other", "priority_level": "Low",
               "keywords": [], "is_active": false, "is_hot_topic": false}),
    ];
    vec![
        (VOTERS, voters),
        (CAMPAIGNS, campaigns),
        (ALERTS, alerts),
        (NOTIFICATIONS, notifications),
        (PROFILES, profiles),
        (ISSUE_CATEGORIES, categories),
        (AUDIT_LOGS, Vec::new()),
    ]
}

/// Articles dated relative to now so day windows always have content.
fn news_fixtures() -> Vec<NewsArticleDetail> {
    let ist = FixedOffset::east_opt(5 * 3600 + 1800).unwrap_or_else(|| Utc.fix());
    let now = Utc::now().with_timezone(&ist);
    let rows = [
        ("Vijay rally draws record crowd in Madurai", "The Hindu", "en", "positive", 0.82, 0, 3, 2, &["rally", "madurai"][..]),
        ("TVK manifesto focuses on water security", "Dinamalar", "ta", "positive", 0.64, 1, 1, 4, &["water", "manifesto"][..]),
        ("Opposition questions TVK funding", "Times of India", "en", "negative", -0.55, 1, 0, 2, &["funding"][..]),
        ("Chennai ward meetings see mixed turnout", "The Hindu", "en", "neutral", 0.05, 2, 1, 1, &["chennai", "turnout"][..]),
        ("Farmers respond to TVK irrigation plan", "Dinamalar", "ta", "positive", 0.48, 4, 2, 3, &["water", "farmers"][..]),
        ("Alliance talks stall ahead of polls", "Times of India", "en", "negative", -0.31, 6, 0, 1, &["alliance"][..]),
        ("Youth wing launches volunteer drive", "Dinamalar", "ta", "neutral", 0.12, 9, 1, 2, &["volunteers"][..]),
        ("Archive: party founding anniversary", "The Hindu", "en", "positive", 0.7, 40, 4, 4, &["anniversary"][..]),
    ];
    rows.iter()
        .enumerate()
        .filter_map(|(i, (title, source, lang, sentiment, score, days_ago, vijay, tvk, topics))| {
            let published = now - Duration::days(*days_ago) - Duration::hours(i as i64);
            serde_json::from_value(json!({
                "id": format!("news-{}", i + 1),
                "title": title,
                "url": format!("https://news.example/{}", i + 1),
                "source": source,
                "published_at": published.to_rfc3339(),
                "language": lang,
                "word_count": 420 + 37 * i as u32,
                "tvk_sentiment": sentiment,
                "tvk_sentiment_score": score,
                "vijay_mentions": vijay,
                "tvk_mentions": tvk,
                "dmk_mentions": (i % 3) as u32,
                "is_relevant": *vijay + *tvk > 1,
                "category": "politics",
                "article_text": format!("{}.", title),
                "key_topics": topics,
                "entities_mentioned": ["TVK"],
            }))
            .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_assigns_ids_and_publishes() {
        let store = DataStore::demo();
        let mut rx = store.subscribe();
        let row = store.insert(ALERTS, json!({"title": "x", "severity": "low"}));
        assert_eq!(row["id"], 4);
        assert!(row.get("created_at").is_some());
        let change = rx.try_recv().unwrap();
        assert_eq!(change.table, ALERTS);
        assert_eq!(change.record["title"], "x");
    }

    #[test]
    fn filters_compare_text_forms() {
        let row = json!({"id": 7, "is_active": true, "user_id": "4"});
        assert!(matches_filter(&row, "id", "eq.7"));
        assert!(matches_filter(&row, "is_active", "eq.true"));
        assert!(matches_row_filter(&row, "user_id=eq.4"));
        assert!(!matches_row_filter(&row, "user_id=eq.5"));
        assert!(!matches_filter(&row, "id", "gt.3"));
    }

    #[test]
    fn row_policies() {
        let store = DataStore::demo();
        let user = store.find(NOTIFICATIONS, "1").unwrap();
        let field_worker = crate::identity::mock_accounts()[3].identity.clone();
        let manager = crate::identity::mock_accounts()[1].identity.clone();
        assert!(Caller::User(field_worker).can_see(NOTIFICATIONS, &user));
        assert!(!Caller::User(manager).can_see(NOTIFICATIONS, &user));
        assert!(!Caller::Anon.can_see(ALERTS, &json!({})));
        assert!(Caller::Anon.can_see(ISSUE_CATEGORIES, &json!({})));
    }

    #[test]
    fn demo_news_parses() {
        let store = DataStore::demo();
        assert_eq!(store.news().len(), 8);
    }

    #[test]
    fn update_and_delete() {
        let store = DataStore::demo();
        let mut patch = Map::new();
        patch.insert("name".into(), json!("Arun K"));
        assert_eq!(store.update(VOTERS, "1", &patch).unwrap()["name"], "Arun K");
        assert!(store.delete(VOTERS, "1"));
        assert!(!store.delete(VOTERS, "1"));
        assert!(store.find(VOTERS, "1").is_none());
    }
}
