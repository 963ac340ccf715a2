//! # parlor-chat
//!
//! Message reconciliation for one buyer/agent conversation.
//!
//! Payloads from the REST API and the live channel are normalized into
//! canonical [`Message`] records, optimistic sends are tracked as
//! placeholders, and every producer is merged into a single ordered list
//! through [`merger::merge`]. [`ChatSession`] is the synchronous state
//! machine; [`SessionDriver`] runs it against real transports.

pub mod config;
pub mod driver;
pub mod identity;
pub mod merger;
pub mod models;
pub mod normalizer;
pub mod session;
pub mod tracker;

mod error;

pub use config::SessionConfig;
pub use driver::{SessionCommand, SessionDriver, SessionHandle, SessionNotice};
pub use error::{ChatError, Result};
pub use identity::{IdentityHandle, LocalIdentity};
pub use merger::MergeReport;
pub use models::*;
pub use session::{ChatSession, Epoch, SessionState, SessionView};
