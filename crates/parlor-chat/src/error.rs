use thiserror::Error;

use parlor_shared::error::TransportError;

/// Failures surfaced by the chat core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// No session token; the caller should send the user to login.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Submit before the backend has resolved the conversation.
    #[error("Conversation is not ready yet, please wait")]
    ConversationUnresolved,

    /// Submit before the local user id is known.
    #[error("Your account is still loading, please wait")]
    IdentityPending,

    #[error("Message is empty")]
    EmptyMessage,

    /// The same text is already in flight.
    #[error("An identical message is already being sent")]
    SendInFlight,

    #[error("Transport failure: {0}")]
    TransportFailure(TransportError),

    /// A live event could not be attributed to the open conversation.
    #[error("Live event does not belong to this conversation")]
    AmbiguousRouting,

    /// A payload without usable text.
    #[error("Malformed message payload")]
    MalformedMessage,

    #[error("Operation not allowed in state {0}")]
    InvalidState(&'static str),

    #[error("Conversation closed")]
    Closed,
}

impl From<TransportError> for ChatError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotAuthenticated => Self::NotAuthenticated,
            other => Self::TransportFailure(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
