//! Realtime change feed over the BaaS websocket (Phoenix channel framing).
//!
//! Frames are `{topic, event, payload, ref}` JSON objects. A subscription joins
//! one topic with a `postgres_changes` config, then receives
//! `postgres_changes` events whose `payload.data.record` is the new row.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

type Socket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const HEARTBEAT_EVERY: Duration = Duration::from_secs(25);
const JOIN_REF: &str = "1";

/// Which row changes to receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub channel: String,
    pub schema: String,
    pub table: String,
    pub event: String,
    /// PostgREST-style row filter, e.g. `user_id=eq.42`.
    pub filter: Option<String>,
}

impl ChangeFilter {
    pub fn inserts(channel: &str, table: &str) -> Self {
        Self {
            channel: channel.to_string(),
            schema: "public".to_string(),
            table: table.to_string(),
            event: "INSERT".to_string(),
            filter: None,
        }
    }

    pub fn column_eq(mut self, column: &str, value: &str) -> Self {
        self.filter = Some(format!("{}=eq.{}", column, value));
        self
    }

    pub fn topic(&self) -> String { format!("realtime:{}", self.channel) }

    fn config(&self) -> Value {
        let mut c = json!({"event": self.event, "schema": self.schema, "table": self.table});
        if let Some(f) = &self.filter {
            c["filter"] = Value::String(f.clone());
        }
        c
    }
}

/// Handle to a live feed. Dropping it aborts the connection task.
pub struct Subscription<T> {
    topic: String,
    rx: mpsc::Receiver<T>,
    leave: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    pub fn topic(&self) -> &str { &self.topic }

    /// Next inserted record; `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<T> { self.rx.recv().await }

    /// Leave the channel, close the socket and wait for the task to finish.
    pub async fn unsubscribe(mut self) {
        if let Some(tx) = self.leave.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
        info!(target: "pulse::router", "unsubscribed from {}", self.topic);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) { self.task.abort(); }
}

fn transport(e: impl std::fmt::Display) -> AppError { AppError::transport("realtime", e.to_string()) }

pub(crate) async fn subscribe<T: DeserializeOwned + Send + 'static>(
    url: String,
    filter: ChangeFilter,
    access_token: String,
) -> AppResult<Subscription<T>> {
    let (mut ws, _resp) = tokio_tungstenite::connect_async(url.as_str()).await.map_err(transport)?;
    let topic = filter.topic();
    let join = json!({
        "topic": topic,
        "event": "phx_join",
        "ref": JOIN_REF,
        "join_ref": JOIN_REF,
        "payload": {"config": {"postgres_changes": [filter.config()]}, "access_token": access_token},
    });
    ws.send(Message::Text(join.to_string())).await.map_err(transport)?;

    // Nothing is delivered before the join is acknowledged.
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(t))) => {
                let v: Value = serde_json::from_str(&t)?;
                if v["event"] != "phx_reply" || v["ref"] != JOIN_REF {
                    continue;
                }
                if v["payload"]["status"] == "ok" {
                    break;
                }
                return Err(AppError::remote("realtime_join_rejected", format!("join {} rejected: {}", topic, v["payload"]["response"])));
            }
            Some(Ok(Message::Close(_))) | None => return Err(transport("socket closed before join reply")),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(transport(e)),
        }
    }
    info!(target: "pulse::router", "subscribed to {} ({} on {})", topic, filter.event, filter.table);

    let (tx, rx) = mpsc::channel(64);
    let (leave_tx, leave_rx) = oneshot::channel();
    let task = tokio::spawn(pump::<T>(ws, topic.clone(), tx, leave_rx));
    Ok(Subscription { topic, rx, leave: Some(leave_tx), task })
}

async fn pump<T: DeserializeOwned + Send + 'static>(
    mut ws: Socket,
    topic: String,
    tx: mpsc::Sender<T>,
    mut leave: oneshot::Receiver<()>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_EVERY);
    heartbeat.tick().await;
    let mut next_ref: u64 = 1;
    loop {
        tokio::select! {
            _ = &mut leave => {
                next_ref += 1;
                let msg = json!({"topic": topic, "event": "phx_leave", "payload": {}, "ref": next_ref.to_string()});
                let _ = ws.send(Message::Text(msg.to_string())).await;
                let _ = ws.close(None).await;
                break;
            }
            _ = heartbeat.tick() => {
                next_ref += 1;
                let msg = json!({"topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": next_ref.to_string()});
                if let Err(e) = ws.send(Message::Text(msg.to_string())).await {
                    warn!(target: "pulse::router", "heartbeat on {} failed: {}", topic, e);
                    break;
                }
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(t))) => {
                    if let Some(record) = decode_change::<T>(&t, &topic) {
                        if tx.send(record).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(target: "pulse::router", "realtime socket for {} closed", topic);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(target: "pulse::router", "realtime socket for {} failed: {}", topic, e);
                    break;
                }
            }
        }
    }
}

fn decode_change<T: DeserializeOwned>(text: &str, topic: &str) -> Option<T> {
    let v: Value = serde_json::from_str(text).ok()?;
    if v.get("topic")?.as_str()? != topic || v.get("event")?.as_str()? != "postgres_changes" {
        return None;
    }
    let record = v.pointer("/payload/data/record")?.clone();
    match serde_json::from_value(record) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!(target: "pulse::router", "undecodable record on {}: {}", topic, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_config_and_topic() {
        let f = ChangeFilter::inserts("notifications-42", "api_notification").column_eq("user_id", "42");
        assert_eq!(f.topic(), "realtime:notifications-42");
        let c = f.config();
        assert_eq!(c["event"], "INSERT");
        assert_eq!(c["filter"], "user_id=eq.42");
        assert!(ChangeFilter::inserts("alerts", "api_alert").config().get("filter").is_none());
    }

    #[test]
    fn only_matching_topic_changes_decode() {
        let frame = json!({
            "topic": "realtime:alerts", "event": "postgres_changes", "ref": null,
            "payload": {"data": {"type": "INSERT", "table": "api_alert", "record": {"id": 9, "title": "x"}}}
        })
        .to_string();
        let got: Option<Value> = decode_change(&frame, "realtime:alerts");
        assert_eq!(got.unwrap()["id"], 9);
        assert!(decode_change::<Value>(&frame, "realtime:other").is_none());
        let reply = json!({"topic": "realtime:alerts", "event": "phx_reply", "payload": {}}).to_string();
        assert!(decode_change::<Value>(&reply, "realtime:alerts").is_none());
    }
}
