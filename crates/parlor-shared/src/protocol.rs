//! Readers for the loosely-typed JSON the chat backend emits.
//!
//! The backend is not schema-stable: the same concept shows up under several
//! field names and in several shapes. Every reader here accepts a fixed list of
//! aliases and a fixed set of shapes, and returns `None` for anything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    CHAT_ID_FIELDS, CREATED_AT_FIELDS, NESTED_ID_FIELDS, PARTICIPANT_FIELDS, RECIPIENT_FIELDS,
    SENDER_FIELDS, TEXT_FIELDS,
};
use crate::error::TransportError;
use crate::types::{ChatId, UserId};

/// Accepted shapes of an id reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdShape {
    /// `"abc123"`
    Plain(String),
    /// `42`
    Numeric(String),
    /// `{ "_id": .. }`, `{ "id": .. }` or `{ "userId": .. }`
    Nested { key: &'static str, id: String },
}

impl IdShape {
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => NESTED_ID_FIELDS.iter().find_map(|key| {
                let id = map.get(*key).and_then(scalar_id)?;
                Some(Self::Nested { key: *key, id })
            }),
            other => match scalar_id(other)? {
                id if other.is_string() => Some(Self::Plain(id)),
                id => Some(Self::Numeric(id)),
            },
        }
    }

    #[cfg(test)]
    pub fn id(&self) -> &str {
        match self {
            Self::Plain(id) | Self::Numeric(id) | Self::Nested { id, .. } => id,
        }
    }

    pub fn into_id(self) -> String {
        match self {
            Self::Plain(id) | Self::Numeric(id) | Self::Nested { id, .. } => id,
        }
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// First alias present with a non-null value.
pub fn field<'a>(raw: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    let map = raw.as_object()?;
    aliases
        .iter()
        .find_map(|key| map.get(*key).filter(|v| !v.is_null()))
}

/// First alias holding an accepted id shape.
pub fn id_field(raw: &Value, aliases: &[&str]) -> Option<IdShape> {
    let map = raw.as_object()?;
    aliases
        .iter()
        .find_map(|key| map.get(*key).and_then(IdShape::parse))
}

pub fn bool_field(raw: &Value, aliases: &[&str]) -> Option<bool> {
    let map = raw.as_object()?;
    aliases
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_bool))
}

/// Message body from the first alias holding non-blank text.
pub fn message_text(raw: &Value) -> Option<&str> {
    let map = raw.as_object()?;
    TEXT_FIELDS.iter().find_map(|key| {
        map.get(*key)
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
    })
}

pub fn sender_ref(raw: &Value) -> Option<IdShape> {
    id_field(raw, SENDER_FIELDS)
}

pub fn recipient_ref(raw: &Value) -> Option<IdShape> {
    id_field(raw, RECIPIENT_FIELDS)
}

pub fn chat_ref(raw: &Value) -> Option<ChatId> {
    id_field(raw, CHAT_ID_FIELDS).map(|shape| ChatId::new(shape.into_id()))
}

/// RFC 3339 string or epoch milliseconds.
pub fn timestamp_field(raw: &Value, aliases: &[&str]) -> Option<DateTime<Utc>> {
    let map = raw.as_object()?;
    aliases.iter().find_map(|key| match map.get(*key)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    })
}

pub fn created_at(raw: &Value) -> Option<DateTime<Utc>> {
    timestamp_field(raw, CREATED_AT_FIELDS)
}

pub fn participants(raw: &Value) -> Vec<UserId> {
    field(raw, PARTICIPANT_FIELDS)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(IdShape::parse)
                .map(|shape| UserId::new(shape.into_id()))
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// REST envelopes
// ---------------------------------------------------------------------------

/// A conversation as returned by resolve/fetch calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub chat_id: Option<ChatId>,
    pub participants: Vec<UserId>,
    /// Raw message payloads, not yet normalized.
    pub messages: Vec<Value>,
}

impl ConversationSnapshot {
    /// Parse a resolve/fetch response body.
    ///
    /// Accepts the conversation at the top level, under `data`, or under
    /// `chat`; a bare array is treated as the message list.
    pub fn from_body(body: &Value) -> Result<Self, TransportError> {
        let chat = unwrap_envelope(body, &["data", "chat", "conversation"]);

        if let Value::Array(items) = chat {
            return Ok(Self {
                chat_id: None,
                participants: Vec::new(),
                messages: items.clone(),
            });
        }

        if !chat.is_object() {
            return Err(TransportError::Decode(format!(
                "expected conversation object, got {}",
                value_kind(chat)
            )));
        }

        let chat_id = chat_ref(chat)
            .or_else(|| id_field(chat, &["_id", "id"]).map(|s| ChatId::new(s.into_id())));

        let messages = match chat.get("messages") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(TransportError::Decode(format!(
                    "expected messages array, got {}",
                    value_kind(other)
                )))
            }
        };

        Ok(Self {
            chat_id,
            participants: participants(chat),
            messages,
        })
    }
}

/// Unwrap the message record from a send response (`data` / `message` wrappers).
pub fn unwrap_message(body: &Value) -> &Value {
    let inner = unwrap_envelope(body, &["data"]);
    match inner.get("message") {
        Some(nested @ Value::Object(_)) => nested,
        _ => inner,
    }
}

/// Account id from a `users/me` style response.
pub fn user_ref(body: &Value) -> Option<UserId> {
    let user = unwrap_envelope(body, &["data", "user"]);
    id_field(user, &["_id", "id", "userId"]).map(|shape| UserId::new(shape.into_id()))
}

fn unwrap_envelope<'a>(body: &'a Value, keys: &[&str]) -> &'a Value {
    let mut current = body;
    for key in keys {
        if let Some(inner @ (Value::Object(_) | Value::Array(_))) = current.get(*key) {
            current = inner;
        }
    }
    current
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Live channel frames
// ---------------------------------------------------------------------------

/// Frames the client writes to the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Join {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
    Leave {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
    },
    Message {
        #[serde(rename = "chatId")]
        chat_id: ChatId,
        text: String,
    },
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A message event pushed by the live channel, with the routing hints it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    pub chat_id: Option<ChatId>,
    pub sender: Option<UserId>,
    pub recipient: Option<UserId>,
    pub participants: Vec<UserId>,
    /// The message payload itself.
    pub payload: Value,
}

impl LiveEvent {
    /// Interpret an inbound frame. Frames may wrap the message under
    /// `message` or `data`, or be the message object itself.
    pub fn from_frame(frame: &Value) -> Option<Self> {
        if !frame.is_object() {
            return None;
        }

        let payload = match (frame.get("message"), frame.get("data")) {
            (Some(inner @ Value::Object(_)), _) => inner,
            (_, Some(inner @ Value::Object(_))) => inner,
            _ => frame,
        };

        let mut members = participants(frame);
        if members.is_empty() {
            members = participants(payload);
        }

        Some(Self {
            chat_id: chat_ref(frame).or_else(|| chat_ref(payload)),
            sender: sender_ref(payload).map(|s| UserId::new(s.into_id())),
            recipient: recipient_ref(payload)
                .or_else(|| recipient_ref(frame))
                .map(|s| UserId::new(s.into_id())),
            participants: members,
            payload: payload.clone(),
        })
    }
}
