//! Realtime change feed over the backend's Phoenix-channel websocket.
//!
//! One websocket per subscription. A session only counts as open once the
//! server has acknowledged the join of `realtime:{channel}` (with a
//! `postgres_changes` filter on the messages table); before that no change
//! is guaranteed to be delivered. The connection task then heartbeats every
//! [`REALTIME_HEARTBEAT_SECS`] and forwards each row change into the
//! [`ChangeFeed`]. When the socket drops it reconnects with exponential
//! backoff and, once the channel is joined again, emits
//! [`ChangeEvent::Resync`] since events may have been missed in between.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use anonchat_shared::constants::{MESSAGES_TABLE, REALTIME_HEARTBEAT_SECS};
use anonchat_shared::{ChangeEvent, ChangeKind, Message, MessageKey, MessagePatch};

use crate::config::BackendConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::{ChangeFeed, FEED_BUFFER};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 60;
const JOIN_TIMEOUT_SECS: u64 = 10;
const JOIN_REF: &str = "1";

/// Phoenix channel envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeKind,
    table: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// What a decoded inbound frame means for the session.
#[derive(Debug)]
enum Inbound {
    Change(ChangeEvent),
    Joined,
    Ignored,
}

/// Reconnect delay, doubled after every failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Backoff {
    secs: u64,
}

impl Backoff {
    fn new() -> Self {
        Self {
            secs: INITIAL_BACKOFF_SECS,
        }
    }

    fn delay(&self) -> Duration {
        Duration::from_secs(self.secs)
    }

    fn failed(&mut self) {
        self.secs = (self.secs * 2).min(MAX_BACKOFF_SECS);
    }

    fn reset(&mut self) {
        self.secs = INITIAL_BACKOFF_SECS;
    }
}

/// Connect, join the change channel and spawn the connection task.
///
/// Returns only after the server acknowledged the join, so anything the
/// caller reads afterwards is covered by the feed. An unreachable backend or
/// a rejected join surfaces as an error.
pub async fn subscribe(config: &BackendConfig) -> Result<ChangeFeed> {
    let url = config.realtime_url()?;
    let topic = format!("realtime:{}", config.channel);
    let join = join_frame(&topic, &config.anon_key);

    let ws = open_session(&url, &join).await?;
    info!(%topic, "realtime channel joined");

    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let task = tokio::spawn(connection_loop(ws, url, join, tx));
    Ok(ChangeFeed::new(rx, Some(task)))
}

/// Connect and wait for the join acknowledgement.
async fn open_session(url: &Url, join: &Frame) -> Result<WsStream> {
    let (mut ws, _) = connect_async(url.as_str()).await?;
    ws.send(WsMessage::Text(serde_json::to_string(join)?))
        .await?;

    match timeout(Duration::from_secs(JOIN_TIMEOUT_SECS), await_join(&mut ws, &join.topic)).await {
        Ok(Ok(())) => Ok(ws),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(GatewayError::Realtime(format!(
            "no join reply within {JOIN_TIMEOUT_SECS}s"
        ))),
    }
}

async fn await_join(ws: &mut WsStream, topic: &str) -> Result<()> {
    while let Some(msg) = ws.next().await {
        match msg? {
            WsMessage::Text(text) => match decode_frame(&text, topic) {
                Ok(Inbound::Joined) => return Ok(()),
                Ok(_) => {}
                Err(GatewayError::Decode(e)) => {
                    warn!(error = %e, "skipping undecodable realtime frame");
                }
                Err(e) => return Err(e),
            },
            WsMessage::Ping(payload) => ws.send(WsMessage::Pong(payload)).await?,
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    Err(GatewayError::Realtime("socket closed before the channel was joined".into()))
}

async fn connection_loop(first: WsStream, url: Url, join: Frame, tx: mpsc::Sender<ChangeEvent>) {
    let mut ws = first;
    let mut backoff = Backoff::new();

    loop {
        match run_session(ws, &join.topic, &tx).await {
            Ok(()) => {
                debug!("change feed dropped by consumer, closing realtime session");
                return;
            }
            Err(e) => warn!(error = %e, "realtime session ended"),
        }

        ws = loop {
            if tx.is_closed() {
                return;
            }
            sleep(backoff.delay()).await;
            match open_session(&url, &join).await {
                Ok(stream) => break stream,
                Err(e) => {
                    warn!(error = %e, retry_in = backoff.secs, "realtime reconnect failed");
                    backoff.failed();
                }
            }
        };

        info!(topic = %join.topic, "realtime reconnected");
        backoff.reset();
        if tx.send(ChangeEvent::Resync).await.is_err() {
            return;
        }
    }
}

/// Drive one joined websocket until it fails (`Err`) or the consumer goes
/// away (`Ok`).
async fn run_session(ws: WsStream, topic: &str, tx: &mpsc::Sender<ChangeEvent>) -> Result<()> {
    let (mut write, mut read) = ws.split();

    let mut heartbeat = interval(Duration::from_secs(REALTIME_HEARTBEAT_SECS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                let frame = heartbeat_frame(next_ref);
                next_ref += 1;
                write.send(WsMessage::Text(serde_json::to_string(&frame)?)).await?;
            }
            msg = read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => match decode_frame(&text, topic) {
                    Ok(Inbound::Change(event)) => {
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(Inbound::Joined) | Ok(Inbound::Ignored) => {}
                    Err(GatewayError::Decode(e)) => {
                        warn!(error = %e, "skipping undecodable realtime frame");
                    }
                    Err(e) => return Err(e),
                },
                Some(Ok(WsMessage::Ping(payload))) => write.send(WsMessage::Pong(payload)).await?,
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(GatewayError::Realtime("socket closed by server".into()));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

fn join_frame(topic: &str, access_token: &str) -> Frame {
    Frame {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": MESSAGES_TABLE }
                ]
            },
            "access_token": access_token,
        }),
        reference: Some(JOIN_REF.to_string()),
    }
}

fn heartbeat_frame(reference: u64) -> Frame {
    Frame {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

fn decode_frame(text: &str, topic: &str) -> Result<Inbound> {
    let frame: Frame = serde_json::from_str(text)?;
    if frame.topic != topic {
        return Ok(Inbound::Ignored);
    }

    match frame.event.as_str() {
        "postgres_changes" => {
            let payload: ChangePayload = serde_json::from_value(frame.payload)?;
            decode_change(payload.data).map(|e| e.map_or(Inbound::Ignored, Inbound::Change))
        }
        "phx_reply" => {
            let status = frame.payload.get("status").and_then(Value::as_str);
            match status {
                _ if frame.reference.as_deref() != Some(JOIN_REF) => Ok(Inbound::Ignored),
                Some("ok") => Ok(Inbound::Joined),
                Some("error") => Err(GatewayError::Realtime(format!(
                    "channel rejected: {}",
                    frame.payload.get("response").cloned().unwrap_or(Value::Null)
                ))),
                _ => Ok(Inbound::Ignored),
            }
        }
        "phx_error" => Err(GatewayError::Realtime("channel error".into())),
        "phx_close" => Err(GatewayError::Realtime("channel closed".into())),
        "system" => {
            if frame.payload.get("status").and_then(Value::as_str) == Some("error") {
                warn!(payload = %frame.payload, "realtime system error");
            }
            Ok(Inbound::Ignored)
        }
        _ => Ok(Inbound::Ignored),
    }
}

fn decode_change(data: ChangeData) -> Result<Option<ChangeEvent>> {
    if data.table != MESSAGES_TABLE {
        return Ok(None);
    }
    let event = match data.kind {
        ChangeKind::Insert => {
            let record = data.record.unwrap_or(Value::Null);
            ChangeEvent::Insert(serde_json::from_value::<Message>(record)?)
        }
        ChangeKind::Update => {
            let record = data.record.unwrap_or(Value::Null);
            ChangeEvent::Update(serde_json::from_value::<MessagePatch>(record)?)
        }
        ChangeKind::Delete => {
            let old = data.old_record.unwrap_or(Value::Null);
            ChangeEvent::Delete(serde_json::from_value::<MessageKey>(old)?)
        }
    };
    Ok(Some(event))
}
