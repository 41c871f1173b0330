//! Push source: Socket.IO `sensor_update` events over a WebSocket.
//!
//! The backend runs Flask-SocketIO, so this speaks Engine.IO v4 directly on
//! a `tokio-tungstenite` connection:
//! - wait for the Engine.IO open packet (`0{...}`)
//! - join the default namespace (`40`) and wait for the ack
//! - answer server pings (`2`) with pongs (`3`)
//! - decode events (`42["sensor_update", {...}]`)
//!
//! Frames larger than [`MAX_PACKET_BYTES`] are refused by the WebSocket
//! layer, which fails the stream and hands control back to the reconnect
//! loop instead of buffering without bound.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{PushConnector, PushStream};
use crate::models::SensorReading;

// ---

pub const SENSOR_UPDATE_EVENT: &str = "sensor_update";

/// Largest WebSocket message accepted from the server.
pub const MAX_PACKET_BYTES: usize = 64 * 1024;

/// One decoded Engine.IO packet, with Socket.IO messages unpacked.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open,
    Close,
    Ping,
    Pong,
    Noop,
    /// Namespace join acknowledged.
    Connected,
    /// Server left the namespace.
    Disconnected,
    ConnectError(String),
    Event { name: String, data: Value },
    /// Acks and binary events, which this client never asks for.
    Other,
}

/// Decode one text frame.
///
/// # Errors
/// Empty, oversized or unknown packets, and events whose payload is not a
/// JSON array led by the event name.
pub fn decode_packet(text: &str) -> Result<Packet> {
    // ---
    if text.len() > MAX_PACKET_BYTES {
        bail!(
            "Packet of {} bytes exceeds the {} byte limit",
            text.len(),
            MAX_PACKET_BYTES
        );
    }
    let Some(&kind) = text.as_bytes().first() else {
        bail!("Empty Engine.IO packet");
    };
    match kind {
        b'0' => Ok(Packet::Open),
        b'1' => Ok(Packet::Close),
        b'2' => Ok(Packet::Ping),
        b'3' => Ok(Packet::Pong),
        b'4' => decode_message(&text[1..]),
        b'5' | b'6' => Ok(Packet::Noop),
        _ => bail!("Unknown Engine.IO packet '{}'", text.chars().take(16).collect::<String>()),
    }
}

/// Decode the Socket.IO layer of an Engine.IO message packet.
fn decode_message(body: &str) -> Result<Packet> {
    // ---
    let Some(&kind) = body.as_bytes().first() else {
        bail!("Empty Socket.IO message");
    };
    if !kind.is_ascii_digit() {
        bail!("Unknown Socket.IO packet type");
    }

    let mut rest = &body[1..];
    if rest.starts_with('/') {
        rest = rest.find(',').map_or("", |i| &rest[i + 1..]);
    }
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    match kind {
        b'0' => Ok(Packet::Connected),
        b'1' => Ok(Packet::Disconnected),
        b'2' => {
            let args: Vec<Value> = serde_json::from_str(rest).context("Malformed event payload")?;
            let mut args = args.into_iter();
            let name = match args.next() {
                Some(Value::String(name)) => name,
                _ => bail!("Event without a name"),
            };
            Ok(Packet::Event {
                name,
                data: args.next().unwrap_or(Value::Null),
            })
        }
        b'4' => Ok(Packet::ConnectError(rest.to_string())),
        _ => Ok(Packet::Other),
    }
}

/// Turn a `sensor_update` payload into a reading.
///
/// Live snapshots carry no timestamp; those are stamped with
/// `received_at` so the monitor's recency guard can still order them.
pub fn sensor_update(data: Value, received_at: DateTime<Utc>) -> Result<SensorReading> {
    // ---
    let Value::Object(mut fields) = data else {
        bail!("sensor_update payload is not an object");
    };
    fields.retain(|key, value| !(matches!(key.as_str(), "timestamp" | "timeData") && value.is_null()));
    if !fields.contains_key("timestamp") && !fields.contains_key("timeData") {
        fields.insert("timestamp".to_string(), Value::String(received_at.to_rfc3339()));
    }
    serde_json::from_value(Value::Object(fields)).context("Malformed sensor_update payload")
}

/// Build the Engine.IO WebSocket URL from the backend base URL.
fn socket_url(backend_url: &str, path: &str) -> Result<String> {
    // ---
    let (scheme, authority) = [("https://", "wss"), ("http://", "ws"), ("wss://", "wss"), ("ws://", "ws")]
        .iter()
        .find_map(|(prefix, scheme)| backend_url.strip_prefix(prefix).map(|rest| (*scheme, rest)))
        .ok_or_else(|| anyhow!("Unsupported backend URL '{}'", backend_url))?;
    let path = path.trim_matches('/');
    Ok(format!(
        "{scheme}://{}/{path}/?EIO=4&transport=websocket",
        authority.trim_end_matches('/')
    ))
}

fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_PACKET_BYTES);
    config.max_frame_size = Some(MAX_PACKET_BYTES);
    config
}

/// Opens Socket.IO sessions against the backend.
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    url: String,
    handshake_timeout: Duration,
}

impl SocketIoConnector {
    /// Connector for the Socket.IO endpoint at `path` on `backend_url`.
    ///
    /// `http`/`https` base URLs map to `ws`/`wss`. `handshake_timeout`
    /// bounds both the WebSocket upgrade and the namespace join.
    ///
    /// # Errors
    /// Returns an error when `backend_url` is not an http(s) or ws(s) URL.
    pub fn new(backend_url: &str, path: &str, handshake_timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: socket_url(backend_url, path)?,
            handshake_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PushConnector for SocketIoConnector {
    type Stream = SocketIoStream;

    fn connect(&self) -> impl Future<Output = Result<SocketIoStream>> + Send {
        async move {
            // ---
            let (ws, _) = tokio::time::timeout(
                self.handshake_timeout,
                tokio_tungstenite::connect_async_with_config(self.url.as_str(), Some(ws_config()), false),
            )
            .await
            .map_err(|_| anyhow!("WebSocket upgrade to {} timed out", self.url))?
            .with_context(|| format!("WebSocket connect to {}", self.url))?;

            let mut stream = SocketIoStream { ws };
            tokio::time::timeout(self.handshake_timeout, stream.join())
                .await
                .map_err(|_| anyhow!("Socket.IO namespace join timed out"))??;
            debug!("Joined Socket.IO namespace at {}", self.url);
            Ok(stream)
        }
    }
}

/// A joined Socket.IO session.
pub struct SocketIoStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl SocketIoStream {
    // ---
    async fn join(&mut self) -> Result<()> {
        loop {
            let Some(text) = self.next_text().await? else {
                bail!("Socket.IO closed during handshake");
            };
            match decode_packet(&text)? {
                Packet::Open => self.send("40").await?,
                Packet::Ping => self.send("3").await?,
                Packet::Connected => return Ok(()),
                Packet::ConnectError(reason) => bail!("Socket.IO join refused: {}", reason),
                Packet::Close => bail!("Socket.IO closed during handshake"),
                _ => {}
            }
        }
    }

    /// Next text frame; `None` once the socket is closed.
    async fn next_text(&mut self) -> Result<Option<String>> {
        while let Some(message) = self.ws.next().await {
            match message.context("WebSocket read failed")? {
                Message::Text(text) => return Ok(Some(text.to_string())),
                Message::Close(_) => return Ok(None),
                // WebSocket-level pings are answered by tungstenite.
                _ => continue,
            }
        }
        Ok(None)
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .context("WebSocket write failed")
    }
}

impl PushStream for SocketIoStream {
    fn next_update(&mut self) -> impl Future<Output = Result<Option<SensorReading>>> + Send {
        async move {
            loop {
                // ---
                let Some(text) = self.next_text().await? else {
                    return Ok(None);
                };
                let packet = match decode_packet(&text) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Skipping Socket.IO packet: {:#}", e);
                        continue;
                    }
                };
                match packet {
                    Packet::Ping => self.send("3").await?,
                    Packet::Event { name, data } if name == SENSOR_UPDATE_EVENT => {
                        match sensor_update(data, Utc::now()) {
                            Ok(reading) => return Ok(Some(reading)),
                            Err(e) => warn!("Skipping sensor_update: {:#}", e),
                        }
                    }
                    Packet::Event { name, .. } => debug!("Ignoring Socket.IO event '{}'", name),
                    Packet::Close | Packet::Disconnected => return Ok(None),
                    Packet::ConnectError(reason) => bail!("Socket.IO error: {}", reason),
                    _ => {}
                }
            }
        }
    }
}
