//! Converts raw server payloads into canonical [`Message`] records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use parlor_shared::constants::{EDITED_FIELDS, MESSAGE_ID_FIELDS};
use parlor_shared::protocol;
use parlor_shared::types::{MessageId, UserId};

use crate::identity::LocalIdentity;
use crate::models::{DeliveryStatus, Message, Side};

/// Inputs the normalizer needs besides the payload.
#[derive(Debug, Clone)]
pub struct NormalizeContext<'a> {
    pub local: &'a LocalIdentity,
    pub counterpart_id: &'a UserId,
    /// Fallback `created_at` for payloads that carry no timestamp.
    pub received_at: DateTime<Utc>,
}

/// Decide which side a sender id belongs to.
///
/// `Local` only when both ids are known and equal after trimming.
pub fn classify(original_sender_id: Option<&UserId>, local: &LocalIdentity) -> Side {
    match (original_sender_id, local.user_id()) {
        (Some(sender), Some(me)) if sender.as_str().trim() == me.as_str().trim() => Side::Local,
        _ => Side::Remote,
    }
}

/// Map a payload to a [`Message`], or `None` when it has no usable text.
pub fn normalize(raw: &Value, ctx: &NormalizeContext<'_>) -> Option<Message> {
    normalize_counted(raw, ctx, &mut HashMap::new())
}

/// Normalize a batch, dropping malformed entries individually.
///
/// Id-less payloads that repeat within the batch get distinct fallback ids,
/// numbered by occurrence.
pub fn normalize_all(raw: &[Value], ctx: &NormalizeContext<'_>) -> Vec<Message> {
    let mut seen = HashMap::new();
    raw.iter()
        .filter_map(|r| normalize_counted(r, ctx, &mut seen))
        .collect()
}

fn normalize_counted(
    raw: &Value,
    ctx: &NormalizeContext<'_>,
    seen: &mut HashMap<String, usize>,
) -> Option<Message> {
    let text = match protocol::message_text(raw) {
        Some(t) => t.to_string(),
        None => {
            debug!(payload = %raw, "Dropping message without text");
            return None;
        }
    };

    let original_sender_id = protocol::sender_ref(raw).map(|s| UserId::new(s.into_id()));
    let timestamp = protocol::created_at(raw);

    let id = match protocol::id_field(raw, MESSAGE_ID_FIELDS) {
        Some(shape) => MessageId::new(shape.into_id()),
        None => {
            let base = fallback_id(timestamp, original_sender_id.as_ref(), &text);
            let occurrence = seen.entry(base.clone()).or_insert(0);
            let id = match *occurrence {
                0 => base,
                n => format!("{base}-{n}"),
            };
            *occurrence += 1;
            MessageId::new(id)
        }
    };

    Some(Message {
        id,
        side: classify(original_sender_id.as_ref(), ctx.local),
        original_sender_id,
        text,
        created_at: timestamp.unwrap_or(ctx.received_at),
        status: DeliveryStatus::Sent,
        edited: protocol::bool_field(raw, EDITED_FIELDS).unwrap_or(false),
    })
}

/// Re-run classification once the local identity is known.
///
/// Locally originated entries that are still in flight or failed keep their
/// side. Returns the number of messages whose side changed.
pub fn reclassify(messages: &mut [Message], local: &LocalIdentity) -> usize {
    let mut changed = 0;
    for message in messages.iter_mut() {
        if message.is_placeholder() || message.original_sender_id.is_none() {
            continue;
        }
        let side = classify(message.original_sender_id.as_ref(), local);
        if side != message.side {
            message.side = side;
            changed += 1;
        }
    }
    changed
}

/// Deterministic id for payloads without one, so that the same payload polled
/// twice maps to the same message. The receive time never takes part: it
/// changes on every poll.
fn fallback_id(timestamp: Option<DateTime<Utc>>, sender: Option<&UserId>, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(sender.map(UserId::as_str).unwrap_or_default().as_bytes());
    hasher.update(&[0]);
    hasher.update(text.as_bytes());
    let digest = hex::encode(hasher.finalize().as_bytes());
    match timestamp {
        Some(at) => format!("ts-{}-{}", at.timestamp_millis(), &digest[..12]),
        None => format!("anon-{}", &digest[..12]),
    }
}
