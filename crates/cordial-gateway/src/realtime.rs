use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use cordial_types::events::{ChangeEvent, ChangeFilter, ChangeKind};

use crate::error::GatewayError;
use crate::subscription::{LeaveGuard, Subscription};

/// The hosted feed drops sockets that stay silent for about a minute.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const SOCKET_PATH: &str = "/realtime/v1/websocket";
const PROTOCOL_VERSION: &str = "1.0.0";
const EVENTS_PER_SECOND: u32 = 10;

pub(crate) enum Command {
    Join {
        topic: String,
        filter: ChangeFilter,
        events: mpsc::UnboundedSender<ChangeEvent>,
    },
    Leave {
        topic: String,
    },
}

/// Client for the hosted change feed. One socket, one topic per subscription.
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    next_topic: AtomicU64,
}

impl RealtimeClient {
    pub async fn connect(base_url: &str, api_key: &str) -> Result<Self, GatewayError> {
        let url = socket_url(base_url, api_key)?;
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        info!(
            "Realtime socket connected to {}",
            url.host_str().unwrap_or_default()
        );

        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection_loop(stream, rx, api_key.to_string()));

        Ok(Self::with_commands(commands))
    }

    fn with_commands(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            commands,
            next_topic: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, GatewayError> {
        let n = self.next_topic.fetch_add(1, Ordering::Relaxed);
        let topic = format!("realtime:{}-{}", filter.table, n);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        self.commands
            .send(Command::Join {
                topic: topic.clone(),
                filter: filter.clone(),
                events: events_tx,
            })
            .map_err(|_| GatewayError::Closed)?;

        let leave = LeaveGuard {
            topic,
            commands: self.commands.clone(),
        };
        Ok(Subscription::remote(events_rx, filter, leave))
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Backend URL -> realtime socket URL (`https` becomes `wss`).
pub fn socket_url(base_url: &str, api_key: &str) -> Result<Url, GatewayError> {
    let mut url = Url::parse(base_url)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(GatewayError::Scheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| GatewayError::Scheme(scheme.to_string()))?;
    url.set_path(SOCKET_PATH);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VERSION)
        .append_pair("eventsPerSecond", &EVENTS_PER_SECOND.to_string());
    Ok(url)
}

/// One Phoenix channel frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

pub fn join_frame(topic: &str, filter: &ChangeFilter, access_token: &str, reference: u64) -> Frame {
    let mut change = json!({
        "event": filter.event.as_str(),
        "schema": "public",
        "table": filter.table.as_str(),
    });
    if let Some(expr) = filter.expr() {
        change["filter"] = Value::String(expr);
    }

    Frame {
        topic: topic.to_string(),
        event: "phx_join".into(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change],
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
    }
}

pub fn leave_frame(topic: &str, reference: u64) -> Frame {
    Frame {
        topic: topic.to_string(),
        event: "phx_leave".into(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat_frame(reference: u64) -> Frame {
    Frame {
        topic: "phoenix".into(),
        event: "heartbeat".into(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// What an incoming frame means to the client.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Change { topic: String, event: ChangeEvent },
    Reply { topic: String, ok: bool },
    Closed { topic: String },
    Other,
}

#[derive(Deserialize)]
struct PostgresChange {
    table: String,
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

pub fn decode_frame(text: &str) -> Result<Inbound, serde_json::Error> {
    let frame: Frame = serde_json::from_str(text)?;

    match frame.event.as_str() {
        "postgres_changes" => {
            let data = frame.payload.get("data").cloned().unwrap_or(Value::Null);
            let change: PostgresChange = serde_json::from_value(data)?;
            let table = change
                .table
                .parse()
                .map_err(<serde_json::Error as serde::de::Error>::custom)?;

            Ok(Inbound::Change {
                topic: frame.topic,
                event: ChangeEvent {
                    table,
                    kind: change.kind,
                    record: change.record.filter(is_populated),
                    old_record: change.old_record.filter(is_populated),
                },
            })
        }
        "phx_reply" => {
            let status = frame.payload.get("status").and_then(Value::as_str);
            Ok(Inbound::Reply {
                topic: frame.topic,
                ok: status == Some("ok"),
            })
        }
        "phx_error" | "phx_close" => Ok(Inbound::Closed { topic: frame.topic }),
        _ => Ok(Inbound::Other),
    }
}

// Deletes arrive with `record: {}`.
fn is_populated(value: &Value) -> bool {
    !matches!(value, Value::Null) && !value.as_object().is_some_and(|o| o.is_empty())
}

async fn run_connection_loop(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    access_token: String,
) {
    let (mut sender, mut receiver) = stream.split();
    let mut topics: HashMap<String, mpsc::UnboundedSender<ChangeEvent>> = HashMap::new();
    let mut reference: u64 = 0;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        let outgoing = tokio::select! {
            command = commands.recv() => {
                // Every client handle is gone.
                let Some(command) = command else { break };
                reference += 1;
                match command {
                    Command::Join { topic, filter, events } => {
                        debug!("Joining {} ({})", topic, filter.table);
                        let frame = join_frame(&topic, &filter, &access_token, reference);
                        topics.insert(topic, events);
                        frame
                    }
                    Command::Leave { topic } => {
                        debug!("Leaving {}", topic);
                        topics.remove(&topic);
                        leave_frame(&topic, reference)
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        route_frame(text.as_str(), &mut topics);
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!("Realtime socket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => continue,
                }
            }
            _ = heartbeat.tick() => {
                reference += 1;
                heartbeat_frame(reference)
            }
        };

        let text = match serde_json::to_string(&outgoing) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode realtime frame: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }

    // Dropping the senders ends every open subscription.
    info!("Realtime socket closed ({} topics open)", topics.len());
}

fn route_frame(text: &str, topics: &mut HashMap<String, mpsc::UnboundedSender<ChangeEvent>>) {
    match decode_frame(text) {
        Ok(Inbound::Change { topic, event }) => {
            if let Some(tx) = topics.get(&topic) {
                if tx.send(event).is_err() {
                    topics.remove(&topic);
                }
            }
        }
        Ok(Inbound::Reply { topic, ok: false }) => {
            warn!("Realtime join rejected for {}", topic);
            topics.remove(&topic);
        }
        Ok(Inbound::Closed { topic }) => {
            warn!("Realtime topic {} closed by server", topic);
            topics.remove(&topic);
        }
        Ok(_) => {}
        Err(e) => {
            let raw: String = text.chars().take(200).collect();
            warn!("Bad realtime frame: {} -- raw: {}", e, raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordial_types::events::Table;

    #[test]
    fn socket_url_swaps_scheme_and_path() {
        let url = socket_url("https://demo.example.co", "anon").unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/realtime/v1/websocket");
        assert_eq!(
            url.query(),
            Some("apikey=anon&vsn=1.0.0&eventsPerSecond=10")
        );

        let local = socket_url("http://127.0.0.1:54321", "k").unwrap();
        assert_eq!(local.scheme(), "ws");
        assert!(matches!(
            socket_url("ftp://x", "k"),
            Err(GatewayError::Scheme(_))
        ));
    }

    #[test]
    fn join_frame_carries_table_filter() {
        let filter = ChangeFilter::table(Table::Messages)
            .only(ChangeKind::Insert)
            .eq("channel_id", "c1");
        let frame = join_frame("realtime:messages-1", &filter, "token", 7);

        assert_eq!(frame.event, "phx_join");
        assert_eq!(frame.reference.as_deref(), Some("7"));
        let change = &frame.payload["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "INSERT");
        assert_eq!(change["table"], "messages");
        assert_eq!(change["filter"], "channel_id=eq.c1");
        assert_eq!(frame.payload["access_token"], "token");

        let unfiltered = join_frame("t", &ChangeFilter::table(Table::Servers), "token", 1);
        assert!(unfiltered.payload["config"]["postgres_changes"][0]
            .get("filter")
            .is_none());
    }

    #[test]
    fn decodes_postgres_changes() {
        let text = r#"{
            "topic": "realtime:messages-1",
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": "messages",
                    "type": "DELETE",
                    "record": {},
                    "old_record": { "id": "7d3f0c52-8a43-4a0e-9a43-0f3b5c1d2e4f" },
                    "commit_timestamp": "2024-05-01T12:00:00Z"
                }
            }
        }"#;

        let Inbound::Change { topic, event } = decode_frame(text).unwrap() else {
            panic!("expected a change");
        };
        assert_eq!(topic, "realtime:messages-1");
        assert_eq!(event.table, Table::Messages);
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.record.is_none());
        assert!(event.row_id().is_some());
    }

    #[test]
    fn decodes_replies_and_ignores_unknown_events() {
        let ok = r#"{"topic":"t","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#;
        let err = r#"{"topic":"t","event":"phx_reply","payload":{"status":"error"},"ref":"2"}"#;
        let presence = r#"{"topic":"t","event":"presence_state","payload":{},"ref":null}"#;

        assert_eq!(
            decode_frame(ok).unwrap(),
            Inbound::Reply { topic: "t".into(), ok: true }
        );
        assert_eq!(
            decode_frame(err).unwrap(),
            Inbound::Reply { topic: "t".into(), ok: false }
        );
        assert_eq!(decode_frame(presence).unwrap(), Inbound::Other);
        assert!(decode_frame("not json").is_err());
    }

    #[tokio::test]
    async fn dropping_a_subscription_leaves_its_topic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = RealtimeClient::with_commands(tx);

        let sub = client
            .subscribe(ChangeFilter::table(Table::Channels))
            .unwrap();
        let joined = match rx.recv().await.unwrap() {
            Command::Join { topic, .. } => topic,
            Command::Leave { .. } => panic!("expected a join"),
        };

        drop(sub);
        match rx.recv().await.unwrap() {
            Command::Leave { topic } => assert_eq!(topic, joined),
            Command::Join { .. } => panic!("expected a leave"),
        }
    }

    #[tokio::test]
    async fn routed_changes_reach_the_subscription() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = RealtimeClient::with_commands(tx);
        let mut sub = client
            .subscribe(ChangeFilter::table(Table::Servers))
            .unwrap();

        let Some(Command::Join { topic, events, .. }) = rx.recv().await else {
            panic!("expected a join");
        };
        let mut topics = HashMap::from([(topic.clone(), events)]);

        let frame = json!({
            "topic": topic,
            "event": "postgres_changes",
            "payload": { "data": {
                "table": "servers",
                "type": "INSERT",
                "record": { "id": "5b0c3a4e-1f2d-4c3b-9a8e-7d6c5b4a3f2e", "name": "Guild" }
            }}
        });
        route_frame(&frame.to_string(), &mut topics);

        let event = sub.next().await.unwrap();
        assert_eq!(event.column("name").as_deref(), Some("Guild"));
    }
}
