//! Canonical in-memory records for an open conversation.
//!
//! Nothing here is persisted: a [`Conversation`] lives exactly as long as the
//! screen that opened it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parlor_shared::constants::FAILED_SEND_MARKER;
use parlor_shared::types::{ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Which side of the conversation a message is rendered on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    /// Written by the local user.
    #[serde(rename = "self")]
    Local,
    /// Written by the counterpart.
    #[serde(rename = "other")]
    Remote,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Optimistic placeholder, not yet confirmed by the server.
    Sending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique within the conversation.
    pub id: MessageId,
    /// Never empty or whitespace-only.
    pub text: String,
    pub side: Side,
    /// Raw sender id as the transport reported it, kept so the message can be
    /// re-classified once the local identity is known.
    pub original_sender_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub edited: bool,
}

impl Message {
    /// Whether this entry was created locally and has no server id yet.
    pub fn is_placeholder(&self) -> bool {
        matches!(self.status, DeliveryStatus::Sending | DeliveryStatus::Failed)
            && self.id.is_local()
    }

    pub fn is_sending(&self) -> bool {
        self.status == DeliveryStatus::Sending
    }

    /// Text as it should be rendered; failed sends carry a marker.
    pub fn display_text(&self) -> String {
        match self.status {
            DeliveryStatus::Failed => format!("{}{}", self.text, FAILED_SEND_MARKER),
            _ => self.text.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A chat between the local user and one counterpart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// `None` until the backend has resolved or created the chat.
    pub chat_id: Option<ChatId>,
    pub counterpart_id: UserId,
    /// Participants reported by the backend, used for live event routing.
    pub participants: Vec<UserId>,
    /// Ordered by `created_at`, ties in arrival order.
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(counterpart_id: UserId, chat_id: Option<ChatId>) -> Self {
        Self {
            chat_id,
            counterpart_id,
            participants: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    /// Index of the in-flight placeholder carrying `text` (trimmed comparison).
    pub fn sending_with_text(&self, text: &str) -> Option<usize> {
        let text = text.trim();
        self.messages
            .iter()
            .position(|m| m.is_sending() && m.text.trim() == text)
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_sending()).count()
    }

    /// Stable sort by `created_at`; equal timestamps keep their current order.
    pub fn sort(&mut self) {
        self.messages.sort_by_key(|m| m.created_at);
    }
}
