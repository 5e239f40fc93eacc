use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use meristem_bus::evaluate_subject;
use meristem_domain::{now_ms, PermissionSet, StreamParams, StreamProfile};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

// ── Frames ────────────────────────────────────────────────────────────────────

/// Stream profile as sent by clients: a preset name or a custom object
/// overriding preset fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamProfileSpec {
    Named(StreamProfile),
    Custom {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        min_interval_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        batch_max_size: Option<u32>,
    },
}

impl StreamProfileSpec {
    pub fn resolve(&self, default: StreamProfile) -> StreamParams {
        match self {
            StreamProfileSpec::Named(profile) => profile.params(),
            StreamProfileSpec::Custom { min_interval_ms, batch_max_size } => {
                default.params().with_overrides(*min_interval_ms, *batch_max_size)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WsClientMessage {
    #[serde(rename = "SUBSCRIBE")]
    Subscribe {
        topic: String,
        #[serde(default)]
        stream_profile: Option<StreamProfileSpec>,
    },
    #[serde(rename = "UNSUBSCRIBE")]
    Unsubscribe { topic: String },
    #[serde(rename = "PING")]
    Ping,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum WsServerMessage {
    #[serde(rename = "ACK")]
    Ack {
        action: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stream_profile: Option<StreamParams>,
    },
    #[serde(rename = "ERROR")]
    Error { code: &'static str },
    #[serde(rename = "PUSH")]
    Push { topic: String, payload: Value, trace_id: String },
}

/// Authenticated connection identity produced from the token.
#[derive(Debug, Clone)]
pub struct WsAuthContext {
    pub subject: String,
    pub permissions: PermissionSet,
    pub trace_id: String,
    /// UI-contract restriction; when present, only these topics are
    /// admissible.
    pub allowed_topics: Option<Vec<String>>,
}

// ── Fanout ────────────────────────────────────────────────────────────────────

struct TopicSub {
    params: StreamParams,
    last_delivered_at: Option<i64>,
}

struct ConnEntry {
    auth: WsAuthContext,
    sender: mpsc::Sender<WsServerMessage>,
    topics: HashMap<String, TopicSub>,
}

/// Connection ↔ topic registry with per-subscription throttling. The
/// fanout owns these maps; no other subsystem mutates them.
#[derive(Default)]
pub struct Fanout {
    connections: RwLock<HashMap<u64, ConnEntry>>,
    next_id: AtomicU64,
}

impl Fanout {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, auth: WsAuthContext) -> (u64, mpsc::Receiver<WsServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(256);
        self.connections
            .write()
            .await
            .insert(id, ConnEntry { auth, sender, topics: HashMap::new() });
        (id, receiver)
    }

    pub async fn unregister(&self, conn_id: u64) {
        self.connections.write().await.remove(&conn_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Topic admission: syntactic shape, UI-contract restriction, then
    /// the subject permission guard. Any failure is INVALID_TOPIC.
    pub async fn subscribe(
        &self,
        conn_id: u64,
        topic: &str,
        profile: Option<&StreamProfileSpec>,
    ) -> Result<StreamParams, &'static str> {
        let mut connections = self.connections.write().await;
        let entry = connections.get_mut(&conn_id).ok_or("INVALID_TOPIC")?;

        let declared_channel = entry
            .auth
            .allowed_topics
            .as_ref()
            .map(|topics| topics.iter().any(|t| t == topic))
            .unwrap_or(false);
        if !topic_syntax_ok(topic) && !declared_channel {
            return Err("INVALID_TOPIC");
        }
        if let Some(allowed) = &entry.auth.allowed_topics {
            if !allowed.iter().any(|t| t == topic) {
                return Err("INVALID_TOPIC");
            }
        }
        if !evaluate_subject(topic, &entry.auth.permissions).allowed {
            return Err("INVALID_TOPIC");
        }

        let params = profile
            .map(|p| p.resolve(StreamProfile::Balanced))
            .unwrap_or_else(|| StreamProfile::Balanced.params());
        entry
            .topics
            .insert(topic.to_string(), TopicSub { params, last_delivered_at: None });
        Ok(params)
    }

    pub async fn unsubscribe(&self, conn_id: u64, topic: &str) {
        if let Some(entry) = self.connections.write().await.get_mut(&conn_id) {
            entry.topics.remove(topic);
        }
    }

    /// Push `payload` to every subscription of `topic`, skipping
    /// connections whose negotiated interval has not yet elapsed.
    /// Delivery per (connection, topic) follows server-receive order.
    pub async fn push(&self, topic: &str, payload: Value, trace_id: &str) -> usize {
        let now = now_ms();
        let mut delivered = 0usize;
        let mut connections = self.connections.write().await;
        for entry in connections.values_mut() {
            let Some(sub) = entry.topics.get_mut(topic) else {
                continue;
            };
            if let Some(last) = sub.last_delivered_at {
                if (now - last) < sub.params.min_interval_ms as i64 {
                    continue;
                }
            }
            let frame = WsServerMessage::Push {
                topic: topic.to_string(),
                payload: payload.clone(),
                trace_id: trace_id.to_string(),
            };
            if entry.sender.try_send(frame).is_ok() {
                sub.last_delivered_at = Some(now);
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait]
impl meristem_control::Broadcast for Fanout {
    async fn broadcast(&self, topic: &str, payload: Value, trace_id: &str) {
        self.push(topic, payload, trace_id).await;
    }
}

/// Allowed syntactic topic shapes: `node.<id>.status`, `task.<id>.status`.
/// UI-contract channels are admitted through `allowed_topics`.
fn topic_syntax_ok(topic: &str) -> bool {
    let parts: Vec<&str> = topic.split('.').collect();
    parts.len() == 3
        && (parts[0] == "node" || parts[0] == "task")
        && !parts[1].is_empty()
        && parts[2] == "status"
}

// ── HTTP upgrade handler ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: axum::http::HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // Token from the query string or the subprotocol header.
    let token = query.token.clone().or_else(|| {
        headers
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
    });

    ws.on_upgrade(move |socket| handle_socket(state, token, socket))
}

async fn handle_socket(state: AppState, token: Option<String>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Some(token) = token else {
        let _ = ws_tx
            .send(frame(&WsServerMessage::Error { code: "AUTH_REQUIRED" }))
            .await;
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    };
    let Some(claims) = state.auth.verify(&token) else {
        let _ = ws_tx
            .send(frame(&WsServerMessage::Error { code: "AUTH_INVALID" }))
            .await;
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    };

    let auth = WsAuthContext {
        subject: claims.sub.clone(),
        permissions: PermissionSet::from_iter(claims.permissions.iter().cloned()),
        trace_id: Uuid::new_v4().to_string(),
        allowed_topics: claims.allowed_topics.clone(),
    };
    let (conn_id, mut outbound) = state.fanout.register(auth).await;
    state.metrics.ws_connections.fetch_add(1, Ordering::Relaxed);

    let _ = ws_tx
        .send(frame(&WsServerMessage::Ack {
            action: "CONNECTED",
            topic: None,
            stream_profile: None,
        }))
        .await;

    loop {
        tokio::select! {
            pushed = outbound.recv() => match pushed {
                Some(message) => {
                    if ws_tx.send(frame(&message)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_client_frame(&state, conn_id, &text).await;
                    if ws_tx.send(frame(&reply)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "websocket receive error");
                    break;
                }
            },
        }
    }

    state.fanout.unregister(conn_id).await;
    state.metrics.ws_connections.fetch_sub(1, Ordering::Relaxed);
}

async fn handle_client_frame(state: &AppState, conn_id: u64, text: &str) -> WsServerMessage {
    let parsed: Result<WsClientMessage, _> = serde_json::from_str(text);
    match parsed {
        Ok(WsClientMessage::Subscribe { topic, stream_profile }) => {
            match state.fanout.subscribe(conn_id, &topic, stream_profile.as_ref()).await {
                Ok(params) => WsServerMessage::Ack {
                    action: "SUBSCRIBE",
                    topic: Some(topic),
                    stream_profile: Some(params),
                },
                Err(code) => {
                    warn!(topic = %topic, "subscription rejected");
                    WsServerMessage::Error { code }
                }
            }
        }
        Ok(WsClientMessage::Unsubscribe { topic }) => {
            state.fanout.unsubscribe(conn_id, &topic).await;
            WsServerMessage::Ack { action: "UNSUBSCRIBE", topic: Some(topic), stream_profile: None }
        }
        Ok(WsClientMessage::Ping) => {
            WsServerMessage::Ack { action: "PONG", topic: None, stream_profile: None }
        }
        Err(_) => WsServerMessage::Error { code: "INVALID_MESSAGE" },
    }
}

fn frame(message: &WsServerMessage) -> Message {
    Message::Text(serde_json::to_string(message).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn auth(permissions: &[&str], allowed: Option<Vec<&str>>) -> WsAuthContext {
        WsAuthContext {
            subject: "u1".to_string(),
            permissions: PermissionSet::from_iter(permissions.iter().copied()),
            trace_id: "tr".to_string(),
            allowed_topics: allowed
                .map(|topics| topics.into_iter().map(String::from).collect()),
        }
    }

    #[tokio::test]
    async fn subscribe_allows_matching_topic_and_permission() {
        let fanout = Fanout::new();
        let (conn, _rx) = fanout.register(auth(&["node:read"], None)).await;
        let params = fanout.subscribe(conn, "task.1.status", None).await.unwrap();
        assert_eq!(params, StreamProfile::Balanced.params());
    }

    #[tokio::test]
    async fn allowed_topics_enforces_ui_contract() {
        let fanout = Fanout::new();
        let (conn, _rx) = fanout
            .register(auth(&["node:read"], Some(vec!["task.1.status"])))
            .await;

        assert!(fanout.subscribe(conn, "task.1.status", None).await.is_ok());
        // Syntactically fine, permission held, but outside the contract.
        assert_eq!(
            fanout.subscribe(conn, "node.a.status", None).await,
            Err("INVALID_TOPIC")
        );
        // No sys:manage and outside the contract.
        assert_eq!(
            fanout.subscribe(conn, "sys.network.mode", None).await,
            Err("INVALID_TOPIC")
        );
    }

    #[tokio::test]
    async fn guard_denies_without_permission() {
        let fanout = Fanout::new();
        let (conn, _rx) = fanout.register(auth(&["mfs:write"], None)).await;
        assert_eq!(
            fanout.subscribe(conn, "node.a.status", None).await,
            Err("INVALID_TOPIC")
        );
    }

    #[tokio::test]
    async fn bad_syntax_rejected_even_with_wildcard() {
        let fanout = Fanout::new();
        let (conn, _rx) = fanout.register(auth(&["*"], None)).await;
        assert_eq!(fanout.subscribe(conn, "node.status", None).await, Err("INVALID_TOPIC"));
        assert_eq!(
            fanout.subscribe(conn, "node.a.b.status", None).await,
            Err("INVALID_TOPIC")
        );
    }

    #[tokio::test]
    async fn declared_channel_is_admissible_with_permission() {
        let fanout = Fanout::new();
        let (conn, _rx) = fanout
            .register(auth(&["plugin:access"], Some(vec!["plugin.io.m.relay.events"])))
            .await;
        assert!(fanout.subscribe(conn, "plugin.io.m.relay.events", None).await.is_ok());
    }

    #[tokio::test]
    async fn push_respects_min_interval() {
        let fanout = Fanout::new();
        let (conn, mut rx) = fanout.register(auth(&["node:read"], None)).await;
        fanout
            .subscribe(
                conn,
                "task.1.status",
                Some(&StreamProfileSpec::Custom {
                    min_interval_ms: Some(60_000),
                    batch_max_size: None,
                }),
            )
            .await
            .unwrap();

        assert_eq!(fanout.push("task.1.status", json!({"n": 1}), "tr").await, 1);
        // Second push inside the interval is skipped for this connection.
        assert_eq!(fanout.push("task.1.status", json!({"n": 2}), "tr").await, 0);

        let frame = rx.recv().await.unwrap();
        match frame {
            WsServerMessage::Push { payload, .. } => assert_eq!(payload["n"], 1),
            other => panic!("expected PUSH, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn realtime_profile_never_throttles() {
        let fanout = Fanout::new();
        let (conn, mut rx) = fanout.register(auth(&["node:read"], None)).await;
        fanout
            .subscribe(
                conn,
                "task.1.status",
                Some(&StreamProfileSpec::Named(StreamProfile::Realtime)),
            )
            .await
            .unwrap();

        for n in 0..5 {
            assert_eq!(fanout.push("task.1.status", json!({ "n": n }), "tr").await, 1);
        }
        // In-order delivery for the (connection, topic) pair.
        for n in 0..5 {
            match rx.recv().await.unwrap() {
                WsServerMessage::Push { payload, .. } => assert_eq!(payload["n"], n),
                other => panic!("expected PUSH, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let fanout = Fanout::new();
        let (conn, mut rx) = fanout.register(auth(&["node:read"], None)).await;
        fanout.subscribe(conn, "task.1.status", None).await.unwrap();
        fanout.unsubscribe(conn, "task.1.status").await;
        assert_eq!(fanout.push("task.1.status", json!({}), "tr").await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn client_frames_decode() {
        let subscribe: WsClientMessage = serde_json::from_value(json!({
            "type": "SUBSCRIBE", "topic": "task.1.status", "stream_profile": "conserve"
        }))
        .unwrap();
        match subscribe {
            WsClientMessage::Subscribe { topic, stream_profile } => {
                assert_eq!(topic, "task.1.status");
                assert_eq!(
                    stream_profile.unwrap().resolve(StreamProfile::Balanced),
                    StreamProfile::Conserve.params()
                );
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(serde_json::from_str::<WsClientMessage>(r#"{"type":"NONSENSE"}"#).is_err());
    }
}
