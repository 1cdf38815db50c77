//! JSON envelope codec.
//!
//! Wire format: `{ "type": "<tag>", "payload": <value> }`, sent as a text
//! message. Binary messages carrying the same UTF-8 JSON are accepted on the
//! way in.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::protocol::Frame;

/// A raw message as it crosses the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Wire envelope wrapping every frame.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Encode a frame into a text message.
pub fn encode(frame: &Frame) -> Result<WireMessage, serde_json::Error> {
    let payload = match frame {
        Frame::ShellInput(data) | Frame::ShellOutput(data) => serde_json::to_value(data)?,
        Frame::ShellResize(size) => serde_json::to_value(size)?,
        Frame::ChatMessage(msg) => serde_json::to_value(msg)?,
        Frame::ChatResponse(resp) => serde_json::to_value(resp)?,
        Frame::AgentLog(line) | Frame::Log(line) => serde_json::to_value(line)?,
        Frame::AgentStatusUpdate(status) => serde_json::to_value(status)?,
        Frame::Telemetry(value) => value.clone(),
        Frame::Unknown { payload, .. } => payload.clone(),
    };

    let envelope = Envelope {
        frame_type: frame.frame_type().to_string(),
        payload,
    };
    Ok(WireMessage::Text(serde_json::to_string(&envelope)?))
}

/// Decode a raw message into a frame.
///
/// Unknown tags are not an error: they come back as [`Frame::Unknown`].
pub fn decode(msg: &WireMessage) -> Result<Frame, DecodeError> {
    let text = match msg {
        WireMessage::Text(text) => text.as_str(),
        WireMessage::Binary(bytes) => {
            std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?
        }
    };

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let serde_json::Value::Object(mut map) = value else {
        return Err(DecodeError::MissingType);
    };
    let frame_type = match map.remove("type") {
        Some(serde_json::Value::String(tag)) => tag,
        _ => return Err(DecodeError::MissingType),
    };
    let payload = map
        .remove("payload")
        .unwrap_or(serde_json::Value::Null);

    let frame = match frame_type.as_str() {
        "shell_input" => Frame::ShellInput(payload_as(&frame_type, payload)?),
        "shell_output" => Frame::ShellOutput(payload_as(&frame_type, payload)?),
        "shell_resize" => Frame::ShellResize(payload_as(&frame_type, payload)?),
        "chat_message" => Frame::ChatMessage(payload_as(&frame_type, payload)?),
        "chat_response" => Frame::ChatResponse(payload_as(&frame_type, payload)?),
        "agent_log" => Frame::AgentLog(payload_as(&frame_type, payload)?),
        "agent_status_update" => Frame::AgentStatusUpdate(payload_as(&frame_type, payload)?),
        "telemetry" => Frame::Telemetry(payload),
        "log" => Frame::Log(payload_as(&frame_type, payload)?),
        _ => Frame::Unknown {
            frame_type,
            payload,
        },
    };
    Ok(frame)
}

fn payload_as<T: DeserializeOwned>(
    frame_type: &str,
    payload: serde_json::Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|e| DecodeError::InvalidPayload {
        frame_type: frame_type.to_string(),
        reason: e.to_string(),
    })
}
