//! Contracts of the external collaborators the chat core consumes.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::protocol::ConversationSnapshot;
use crate::types::{ChatId, UserId};

/// How a conversation is looked up on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    Chat(ChatId),
    Counterpart(UserId),
}

/// Request/response access to the chat backend.
///
/// Implementations refuse every call with [`TransportError::NotAuthenticated`]
/// when no bearer token is available.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Find the conversation with `counterpart`, creating it if needed.
    async fn resolve_or_create(
        &self,
        counterpart: &UserId,
    ) -> Result<ConversationSnapshot, TransportError>;

    /// Persist a message. Returns the stored record as the server reports it.
    async fn send_message(&self, chat_id: &ChatId, text: &str) -> Result<Value, TransportError>;

    async fn fetch_conversation(
        &self,
        target: &FetchTarget,
    ) -> Result<ConversationSnapshot, TransportError>;

    /// Account id of the signed-in user.
    async fn current_user(&self) -> Result<UserId, TransportError>;
}

/// Push-based delivery of message events.
#[async_trait]
pub trait LiveChannel: Send + Sync {
    /// Join the room for `chat_id`. Raw inbound frames for it are delivered on
    /// the returned receiver until [`LiveChannel::unsubscribe`] is called.
    async fn subscribe(&self, chat_id: &ChatId) -> Result<mpsc::Receiver<Value>, TransportError>;

    async fn unsubscribe(&self, chat_id: &ChatId);

    fn is_connected(&self) -> bool;

    /// Best-effort send. `true` means the channel accepted the frame, not that
    /// the backend stored it.
    async fn send(&self, chat_id: &ChatId, text: &str) -> bool;
}

/// Supplies the bearer token for transport calls.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn bearer_token(&self) -> Option<String> {
        self()
    }
}
