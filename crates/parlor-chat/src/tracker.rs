//! Optimistic sends: placeholder creation, confirmation and failure.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parlor_shared::types::MessageId;

use crate::error::{ChatError, Result};
use crate::identity::LocalIdentity;
use crate::merger;
use crate::models::{Conversation, DeliveryStatus, Message, Side};

/// Create the provisional message for `text` and append it immediately.
///
/// Rejected without touching the conversation when the text is blank, the
/// chat is not resolved yet, the local user is unknown, or the same text is
/// already in flight.
pub fn submit(
    conversation: &mut Conversation,
    text: &str,
    identity: &LocalIdentity,
    now: DateTime<Utc>,
) -> Result<Message> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    if conversation.chat_id.is_none() {
        return Err(ChatError::ConversationUnresolved);
    }
    let user_id = identity.user_id().ok_or(ChatError::IdentityPending)?;
    if conversation.sending_with_text(trimmed).is_some() {
        return Err(ChatError::SendInFlight);
    }

    let placeholder = Message {
        id: MessageId::new(format!("{}{}", MessageId::LOCAL_PREFIX, Uuid::new_v4())),
        text: trimmed.to_string(),
        side: Side::Local,
        original_sender_id: Some(user_id.clone()),
        created_at: now,
        status: DeliveryStatus::Sending,
        edited: false,
    };

    debug!(message_id = %placeholder.id, "Optimistic placeholder created");
    conversation.messages.push(placeholder.clone());
    conversation.sort();
    Ok(placeholder)
}

/// Swap a placeholder for the server's copy of the message.
///
/// Handles every arrival order: if the server copy is already listed (a
/// socket echo or poll got there first) the placeholder is dropped; if the
/// placeholder is already gone the server copy is merged like any other.
pub fn confirm(conversation: &mut Conversation, placeholder_id: &MessageId, confirmed: Message) {
    let confirmed = Message {
        side: Side::Local,
        status: DeliveryStatus::Sent,
        ..confirmed
    };

    match conversation.position(placeholder_id) {
        Some(idx) if conversation.contains(&confirmed.id) => {
            conversation.messages.remove(idx);
            debug!(placeholder = %placeholder_id, message_id = %confirmed.id, "Server copy already present");
        }
        Some(idx) => {
            info!(placeholder = %placeholder_id, message_id = %confirmed.id, "Message confirmed");
            let mut confirmed = confirmed;
            if confirmed.original_sender_id.is_none() {
                confirmed.original_sender_id = conversation.messages[idx].original_sender_id.clone();
            }
            conversation.messages[idx] = confirmed;
            conversation.sort();
        }
        None => {
            debug!(placeholder = %placeholder_id, "Placeholder already reconciled");
            merger::merge(conversation, [confirmed]);
        }
    }
}

/// Mark a placeholder as failed and hand back its text for the compose field.
///
/// Returns `None` when the placeholder no longer exists or was already
/// settled by another producer.
pub fn fail(conversation: &mut Conversation, placeholder_id: &MessageId) -> Option<String> {
    let idx = conversation.position(placeholder_id)?;
    let message = &mut conversation.messages[idx];
    if message.status != DeliveryStatus::Sending {
        return None;
    }
    message.status = DeliveryStatus::Failed;
    warn!(message_id = %placeholder_id, "Message failed to send");
    Some(message.text.clone())
}
