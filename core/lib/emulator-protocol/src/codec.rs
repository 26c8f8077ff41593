use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{CommandFrame, CommandId, EventFrame};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

fn encode<T: Serialize>(frame: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decodes a frame whose message sits under `key`.
///
/// Variants without data are sent with no `payload`, but senders may also give an empty
/// `payload: {}` for them, which serde's adjacent tagging only accepts as absent.
fn decode<T: DeserializeOwned>(text: &str, key: &str) -> Result<T, CodecError> {
    let mut value: Value = serde_json::from_str(text)?;
    if let Some(message) = value.get_mut(key).and_then(Value::as_object_mut) {
        let empty = match message.get("payload") {
            Some(Value::Object(payload)) => payload.is_empty(),
            Some(Value::Null) => true,
            _ => false,
        };
        if empty {
            message.remove("payload");
        }
    }
    Ok(serde_json::from_value(value)?)
}

impl CommandFrame {
    pub fn to_json(&self) -> Result<String, CodecError> {
        encode(self)
    }

    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        decode(text, "command")
    }

    /// Pulls the correlation id out of a frame which failed to decode, so that an error can
    /// still be sent as its reply.
    pub fn recover_id(text: &str) -> Option<CommandId> {
        let value: Value = serde_json::from_str(text).ok()?;
        value.get("id")?.as_u64().map(CommandId)
    }
}

impl EventFrame {
    pub fn to_json(&self) -> Result<String, CodecError> {
        encode(self)
    }

    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        decode(text, "event")
    }
}
