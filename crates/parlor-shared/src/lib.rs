//! # parlor-shared
//!
//! Types shared by every parlor crate: ids, constants, transport errors, the
//! readers for the backend's loosely-typed payloads, and the collaborator
//! traits the chat core is written against.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod types;

pub use error::TransportError;
pub use protocol::{ClientFrame, ConversationSnapshot, IdShape, LiveEvent};
pub use transport::{ChatApi, FetchTarget, LiveChannel, TokenSource};
pub use types::{ChatId, MessageId, UserId};
