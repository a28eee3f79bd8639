use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::data::{matches_row_filter, Caller, Change};
use super::AppState;

/// One joined topic and the change it listens for.
struct Joined {
    id: u64,
    table: String,
    event: String,
    filter: Option<String>,
    caller: Caller,
}

impl Joined {
    fn wants(&self, change: &Change) -> bool {
        self.table == change.table
            && (self.event == "INSERT" || self.event == "*")
            && self.filter.as_deref().map_or(true, |f| matches_row_filter(&change.record, f))
            && self.caller.can_see(&change.table, &change.record)
    }
}

pub(super) async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if params.get("apikey") != Some(&state.anon_key) {
        return (StatusCode::UNAUTHORIZED, "invalid apikey").into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

fn reply(topic: &Value, reference: &Value, status: &str, response: Value) -> Value {
    json!({"topic": topic, "event": "phx_reply", "payload": {"status": status, "response": response}, "ref": reference})
}

/// Handle one client frame; returns the reply to send, if any.
fn handle_frame(state: &AppState, joined: &mut HashMap<String, Joined>, next_id: &mut u64, text: &str) -> Option<Value> {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!(target: "pulse::server", "ignoring undecodable realtime frame: {}", e);
            return None;
        }
    };
    let topic = frame.get("topic").cloned().unwrap_or(Value::Null);
    let reference = frame.get("ref").cloned().unwrap_or(Value::Null);
    let event = frame.get("event").and_then(|v| v.as_str()).unwrap_or_default();
    match event {
        "heartbeat" => Some(reply(&topic, &reference, "ok", json!({}))),
        "phx_join" => {
            let name = topic.as_str().unwrap_or_default().to_string();
            let payload = frame.get("payload").cloned().unwrap_or(Value::Null);
            let token = payload.get("access_token").and_then(|v| v.as_str()).unwrap_or(&state.anon_key);
            let caller = if token == state.anon_key {
                Caller::Anon
            } else {
                match state.identity_for(token) {
                    Some(id) => Caller::User(id),
                    None => return Some(reply(&topic, &reference, "error", json!({"reason": "Invalid token"}))),
                }
            };
            let Some(change) = payload.pointer("/config/postgres_changes/0").cloned() else {
                return Some(reply(&topic, &reference, "error", json!({"reason": "postgres_changes config is required"})));
            };
            let Some(table) = change.get("table").and_then(|v| v.as_str()).map(str::to_string) else {
                return Some(reply(&topic, &reference, "error", json!({"reason": "table is required"})));
            };
            *next_id += 1;
            let entry = Joined {
                id: *next_id,
                event: change.get("event").and_then(|v| v.as_str()).unwrap_or("*").to_string(),
                filter: change.get("filter").and_then(|v| v.as_str()).map(str::to_string),
                table,
                caller,
            };
            info!(target: "pulse::server", "realtime join {} ({} on {})", name, entry.event, entry.table);
            let mut ack = change.clone();
            ack["id"] = json!(entry.id);
            joined.insert(name, entry);
            Some(reply(&topic, &reference, "ok", json!({"postgres_changes": [ack]})))
        }
        "phx_leave" => {
            if let Some(name) = topic.as_str() {
                joined.remove(name);
                info!(target: "pulse::server", "realtime leave {}", name);
            }
            Some(reply(&topic, &reference, "ok", json!({})))
        }
        _ => None,
    }
}

fn change_frame(topic: &str, joined: &Joined, change: &Change) -> Value {
    json!({
        "topic": topic,
        "event": "postgres_changes",
        "payload": {
            "ids": [joined.id],
            "data": {
                "schema": "public",
                "table": change.table,
                "commit_timestamp": Utc::now().to_rfc3339(),
                "type": "INSERT",
                "record": change.record,
                "errors": null,
            },
        },
        "ref": null,
    })
}

async fn serve_socket(mut socket: WebSocket, state: AppState) {
    let mut changes = state.data.subscribe();
    let mut joined: HashMap<String, Joined> = HashMap::new();
    let mut next_id = 0u64;
    loop {
        let outgoing: Vec<Value> = tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => handle_frame(&state, &mut joined, &mut next_id, text.as_str()).into_iter().collect(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => Vec::new(),
                Some(Err(e)) => {
                    debug!(target: "pulse::server", "realtime socket error: {}", e);
                    break;
                }
            },
            change = changes.recv() => match change {
                Ok(c) => joined.iter().filter(|(_, j)| j.wants(&c)).map(|(topic, j)| change_frame(topic, j, &c)).collect(),
                Err(RecvError::Lagged(n)) => {
                    warn!(target: "pulse::server", "realtime subscriber lagged, {} changes dropped", n);
                    Vec::new()
                }
                Err(RecvError::Closed) => break,
            },
        };
        for frame in outgoing {
            if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
                return;
            }
        }
    }
    debug!(target: "pulse::server", "realtime socket closed with {} topics joined", joined.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState { AppState::demo("anon").unwrap() }

    #[test]
    fn join_heartbeat_and_leave() {
        let st = state();
        let mut joined = HashMap::new();
        let mut n = 0;
        let join = json!({"topic": "realtime:alerts", "event": "phx_join", "ref": "1",
                          "payload": {"config": {"postgres_changes": [{"event": "INSERT", "schema": "public", "table": "api_alert"}]},
                                      "access_token": "anon"}});
        let r = handle_frame(&st, &mut joined, &mut n, &join.to_string()).unwrap();
        assert_eq!(r["payload"]["status"], "ok");
        assert_eq!(r["ref"], "1");
        assert!(joined.contains_key("realtime:alerts"));

        let hb = json!({"topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": "7"});
        assert_eq!(handle_frame(&st, &mut joined, &mut n, &hb.to_string()).unwrap()["ref"], "7");

        let leave = json!({"topic": "realtime:alerts", "event": "phx_leave", "payload": {}, "ref": "8"});
        handle_frame(&st, &mut joined, &mut n, &leave.to_string());
        assert!(joined.is_empty());
    }

    #[test]
    fn bad_token_is_rejected() {
        let st = state();
        let mut joined = HashMap::new();
        let mut n = 0;
        let join = json!({"topic": "realtime:x", "event": "phx_join", "ref": "1",
                          "payload": {"config": {"postgres_changes": [{"table": "api_alert"}]}, "access_token": "bogus"}});
        let r = handle_frame(&st, &mut joined, &mut n, &join.to_string()).unwrap();
        assert_eq!(r["payload"]["status"], "error");
        assert!(joined.is_empty());
    }

    #[test]
    fn filtered_join_only_wants_matching_rows() {
        let worker = crate::identity::mock_accounts()[3].identity.clone();
        let j = Joined {
            id: 1,
            table: "api_notification".into(),
            event: "INSERT".into(),
            filter: Some("user_id=eq.4".into()),
            caller: Caller::User(worker),
        };
        let mine = Change { table: "api_notification".into(), record: json!({"user_id": "4"}) };
        let theirs = Change { table: "api_notification".into(), record: json!({"user_id": "2"}) };
        assert!(j.wants(&mine));
        assert!(!j.wants(&theirs));
        assert!(!j.wants(&Change { table: "api_alert".into(), record: json!({"user_id": "4"}) }));
    }
}
