//! The local user's identity as seen by the chat core.
//!
//! The id may arrive after the conversation has opened. It is modelled as an
//! explicit `Pending` state so that classification done in the meantime can be
//! revisited once it resolves.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use parlor_shared::types::UserId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalIdentity {
    #[default]
    Pending,
    Resolved(UserId),
}

impl LocalIdentity {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Pending => None,
            Self::Resolved(id) => Some(id),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

impl From<Option<UserId>> for LocalIdentity {
    fn from(id: Option<UserId>) -> Self {
        id.map_or(Self::Pending, Self::Resolved)
    }
}

/// Process-wide publisher of the local identity.
///
/// Sessions hold the receiving side and re-classify their messages when it
/// moves from `Pending` to `Resolved`.
#[derive(Debug, Clone)]
pub struct IdentityHandle {
    tx: watch::Sender<LocalIdentity>,
}

impl IdentityHandle {
    pub fn new(initial: LocalIdentity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn pending() -> Self {
        Self::new(LocalIdentity::Pending)
    }

    pub fn resolve(&self, user_id: UserId) {
        self.tx.send_replace(LocalIdentity::Resolved(user_id));
    }

    pub fn current(&self) -> LocalIdentity {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LocalIdentity> {
        self.tx.subscribe()
    }
}
