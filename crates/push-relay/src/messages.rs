//! Push-channel protocol messages.

use crate::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message types consumed by the connection itself and never dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reserved {
    Ping,
    Pong,
    Subscribed,
}

impl Reserved {
    fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "ping" => Some(Reserved::Ping),
            "pong" => Some(Reserved::Pong),
            "subscribed" => Some(Reserved::Subscribed),
            _ => None,
        }
    }
}

/// A message received from the control plane.
///
/// Domain messages carry the channel name as `type` and describe which
/// entity changed, not its new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl InboundMessage {
    /// Parse from JSON text. Only a JSON object is a message; the derived
    /// deserializer would also accept a positional array.
    pub fn from_json(text: &str) -> RelayResult<Self> {
        match serde_json::from_str::<Value>(text)? {
            value @ Value::Object(_) => Ok(serde_json::from_value(value)?),
            other => Err(RelayError::Malformed(format!(
                "expected an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// The reserved kind of this message, if any.
    pub fn reserved(&self) -> Option<Reserved> {
        Reserved::from_type(&self.kind)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A message sent to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Declare interest in channels for the current connection.
    Subscribe { channels: Vec<String> },
    /// Heartbeat.
    Ping,
    /// Reply to a server ping.
    Pong,
}

impl OutboundMessage {
    /// Serialize to JSON text.
    pub fn to_json(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
