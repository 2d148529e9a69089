//! Hub wire protocol.
//!
//! The coordinator speaks the SignalR JSON hub protocol over a WebSocket:
//! - every message is a JSON object terminated by the record separator `0x1E`;
//! - one WebSocket text frame may carry several messages;
//! - the session opens with a handshake request answered by `{}` (or an error).
//!
//! Only the message kinds the load generator needs are modelled; anything
//! else decodes to [`HubMessage::Other`].

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminates every hub protocol message.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub method receiving batched bot positions.
pub const SYNC_METHOD: &str = "SyncBotPosition";

/// Hub protocol name and version sent in the handshake.
pub const PROTOCOL_NAME: &str = "json";
pub const PROTOCOL_VERSION: u32 = 1;

const TYPE_INVOCATION: u8 = 1;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

/// Position report of one bot, as the coordinator expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BotRecord {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Estimated bytes this record adds to a batch: its JSON text plus a separator.
pub fn record_size(record: &BotRecord) -> anyhow::Result<usize> {
    let text = serde_json::to_string(record).context("serialize bot record")?;
    Ok(text.len() + 1)
}

#[derive(Debug, Serialize, Deserialize)]
struct HandshakeRequest {
    protocol: String,
    version: u32,
}

#[derive(Debug, Default, Deserialize)]
struct HandshakeResponse {
    #[serde(default)]
    error: Option<String>,
}

/// Decoded hub protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Remote call. Without an invocation id no completion is expected.
    Invocation {
        target: String,
        arguments: Vec<Value>,
        invocation_id: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Any other message type (completions, stream items, ...).
    Other(u64),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvocationWire {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    target: String,
    #[serde(default)]
    arguments: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseWire {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

fn terminate(mut json: String) -> String {
    json.push(RECORD_SEPARATOR);
    json
}

/// Handshake request frame.
pub fn encode_handshake() -> anyhow::Result<String> {
    let req = HandshakeRequest {
        protocol: PROTOCOL_NAME.to_string(),
        version: PROTOCOL_VERSION,
    };
    Ok(terminate(
        serde_json::to_string(&req).context("serialize handshake")?,
    ))
}

/// Handshake response frame (server side; used by test hubs).
pub fn encode_handshake_response(error: Option<&str>) -> anyhow::Result<String> {
    let json = match error {
        Some(e) => serde_json::json!({ "error": e }),
        None => serde_json::json!({}),
    };
    Ok(terminate(
        serde_json::to_string(&json).context("serialize handshake response")?,
    ))
}

/// Parses a handshake request (server side; used by test hubs).
pub fn decode_handshake(frame: &str) -> anyhow::Result<(String, u32)> {
    let body = frame.trim_end_matches(RECORD_SEPARATOR);
    let req: HandshakeRequest = serde_json::from_str(body).context("deserialize handshake")?;
    Ok((req.protocol, req.version))
}

/// Checks the handshake response and returns whatever followed it in the frame.
pub fn decode_handshake_response(frame: &str) -> anyhow::Result<&str> {
    let Some((head, rest)) = frame.split_once(RECORD_SEPARATOR) else {
        bail!("handshake response is not terminated");
    };
    let resp: HandshakeResponse =
        serde_json::from_str(head).context("deserialize handshake response")?;
    if let Some(err) = resp.error {
        bail!("hub rejected handshake: {err}");
    }
    Ok(rest)
}

/// Fire-and-forget invocation frame.
pub fn encode_invocation(target: &str, arguments: Vec<Value>) -> anyhow::Result<String> {
    let wire = InvocationWire {
        kind: TYPE_INVOCATION,
        invocation_id: None,
        target: target.to_string(),
        arguments,
    };
    Ok(terminate(
        serde_json::to_string(&wire).context("serialize invocation")?,
    ))
}

pub fn encode_ping() -> String {
    terminate(format!("{{\"type\":{TYPE_PING}}}"))
}

pub fn encode_close(error: Option<&str>, allow_reconnect: bool) -> anyhow::Result<String> {
    let wire = CloseWire {
        kind: TYPE_CLOSE,
        error: error.map(str::to_string),
        allow_reconnect,
    };
    Ok(terminate(
        serde_json::to_string(&wire).context("serialize close")?,
    ))
}

fn decode_one(json: &str) -> anyhow::Result<HubMessage> {
    let value: Value = serde_json::from_str(json).context("deserialize hub message")?;
    let kind = value
        .get("type")
        .and_then(Value::as_u64)
        .context("hub message without numeric type")?;

    let msg = match kind {
        k if k == u64::from(TYPE_INVOCATION) => {
            let wire: InvocationWire =
                serde_json::from_value(value).context("deserialize invocation")?;
            HubMessage::Invocation {
                target: wire.target,
                arguments: wire.arguments,
                invocation_id: wire.invocation_id,
            }
        }
        k if k == u64::from(TYPE_PING) => HubMessage::Ping,
        k if k == u64::from(TYPE_CLOSE) => {
            let wire: CloseWire = serde_json::from_value(value).context("deserialize close")?;
            HubMessage::Close {
                error: wire.error,
                allow_reconnect: wire.allow_reconnect,
            }
        }
        other => HubMessage::Other(other),
    };
    Ok(msg)
}

/// Splits a text frame into messages and decodes each.
pub fn decode_frame(frame: &str) -> anyhow::Result<Vec<HubMessage>> {
    frame
        .split(RECORD_SEPARATOR)
        .filter(|part| !part.trim().is_empty())
        .map(decode_one)
        .collect()
}
