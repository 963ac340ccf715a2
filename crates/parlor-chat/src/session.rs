//! Per-conversation state machine.
//!
//! ```text
//! Unresolved -> Resolving -> Active -> Closed
//!                   ^          |
//!                   +--refresh-+
//! ```
//!
//! [`ChatSession`] owns the message list; the normalizer, tracker and merger
//! are only ever applied through it, one call at a time. Every asynchronous
//! result is tagged with the [`Epoch`] it was started under and is discarded
//! if the session has been closed or reopened since.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use parlor_shared::error::TransportError;
use parlor_shared::protocol::{ConversationSnapshot, LiveEvent};
use parlor_shared::transport::FetchTarget;
use parlor_shared::types::{ChatId, MessageId, UserId};

use crate::error::{ChatError, Result};
use crate::identity::LocalIdentity;
use crate::merger::{self, MergeReport};
use crate::models::{Conversation, Message};
use crate::normalizer::{self, NormalizeContext};
use crate::tracker;

/// Generation counter of an open conversation.
pub type Epoch = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Unresolved,
    Resolving,
    Active,
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Resolving => "resolving",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// A backend lookup the caller must perform, tagged with its epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveRequest {
    ResolveOrCreate { epoch: Epoch, counterpart: UserId },
    Fetch { epoch: Epoch, target: FetchTarget },
}

impl ResolveRequest {
    pub fn epoch(&self) -> Epoch {
        match self {
            Self::ResolveOrCreate { epoch, .. } | Self::Fetch { epoch, .. } => *epoch,
        }
    }
}

/// What the rendering layer sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    pub chat_id: Option<ChatId>,
    pub counterpart_id: UserId,
    pub identity_resolved: bool,
    pub live_connected: bool,
    pub messages: Vec<Message>,
}

#[derive(Debug)]
pub struct ChatSession {
    state: SessionState,
    conversation: Conversation,
    identity: LocalIdentity,
    epoch: Epoch,
    /// Set once the first resolution succeeded; refresh failures are then
    /// non-blocking.
    resolved_once: bool,
}

impl ChatSession {
    /// A freshly opened screen. `chat_id` is known when navigation passed it.
    pub fn new(counterpart_id: UserId, chat_id: Option<ChatId>, identity: LocalIdentity) -> Self {
        Self {
            state: SessionState::Unresolved,
            conversation: Conversation::new(counterpart_id, chat_id),
            identity,
            epoch: 0,
            resolved_once: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    pub fn chat_id(&self) -> Option<&ChatId> {
        self.conversation.chat_id.as_ref()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Whether a result started under `epoch` may still be applied.
    pub fn is_current(&self, epoch: Epoch) -> bool {
        epoch == self.epoch && self.state != SessionState::Closed
    }

    pub fn view(&self, live_connected: bool) -> SessionView {
        SessionView {
            state: self.state,
            chat_id: self.conversation.chat_id.clone(),
            counterpart_id: self.conversation.counterpart_id.clone(),
            identity_resolved: self.identity.is_resolved(),
            live_connected,
            messages: self.conversation.messages.clone(),
        }
    }

    fn context(&self, now: DateTime<Utc>) -> NormalizeContext<'_> {
        NormalizeContext {
            local: &self.identity,
            counterpart_id: &self.conversation.counterpart_id,
            received_at: now,
        }
    }

    // -- Resolution ---------------------------------------------------------

    /// `Unresolved -> Resolving`. Loads by chat id when one was passed in,
    /// otherwise resolves-or-creates by counterpart.
    pub fn begin_resolve(&mut self) -> Result<ResolveRequest> {
        match self.state {
            SessionState::Unresolved => {}
            SessionState::Closed => return Err(ChatError::Closed),
            other => return Err(ChatError::InvalidState(other.name())),
        }

        self.epoch += 1;
        self.state = SessionState::Resolving;
        debug!(epoch = self.epoch, "Resolving conversation");

        Ok(match &self.conversation.chat_id {
            Some(chat_id) => ResolveRequest::Fetch {
                epoch: self.epoch,
                target: FetchTarget::Chat(chat_id.clone()),
            },
            None => ResolveRequest::ResolveOrCreate {
                epoch: self.epoch,
                counterpart: self.conversation.counterpart_id.clone(),
            },
        })
    }

    /// `Active -> Resolving` on explicit refresh.
    pub fn begin_refresh(&mut self) -> Result<ResolveRequest> {
        match self.state {
            SessionState::Active => {}
            SessionState::Closed => return Err(ChatError::Closed),
            other => return Err(ChatError::InvalidState(other.name())),
        }
        let chat_id = self
            .conversation
            .chat_id
            .clone()
            .ok_or(ChatError::ConversationUnresolved)?;

        self.state = SessionState::Resolving;
        Ok(ResolveRequest::Fetch {
            epoch: self.epoch,
            target: FetchTarget::Chat(chat_id),
        })
    }

    /// `Resolving -> Active`: adopt the chat id and seed/merge the messages.
    ///
    /// Returns `Ok(None)` when the result is stale.
    pub fn on_resolved(
        &mut self,
        epoch: Epoch,
        snapshot: ConversationSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<MergeReport>> {
        if !self.is_current(epoch) || self.state != SessionState::Resolving {
            debug!(epoch, current = self.epoch, "Discarding stale resolution");
            return Ok(None);
        }

        if let Some(chat_id) = snapshot.chat_id {
            if let Some(existing) = &self.conversation.chat_id {
                if existing != &chat_id {
                    warn!(expected = %existing, got = %chat_id, "Backend returned a different chat id");
                }
            }
            self.conversation.chat_id = Some(chat_id);
        }

        if self.conversation.chat_id.is_none() {
            warn!("Resolution returned no chat id");
            return Err(self.fail_resolution(ChatError::ConversationUnresolved));
        }

        if !snapshot.participants.is_empty() {
            self.conversation.participants = snapshot.participants;
        }

        let incoming = normalizer::normalize_all(&snapshot.messages, &self.context(now));
        let report = merger::merge(&mut self.conversation, incoming);

        self.state = SessionState::Active;
        self.resolved_once = true;
        info!(
            chat_id = ?self.conversation.chat_id.as_ref().map(ChatId::as_str),
            messages = self.conversation.messages.len(),
            "Conversation active"
        );
        Ok(Some(report))
    }

    /// A failed first resolution returns the blocking error and goes back to
    /// `Unresolved` so the caller can retry. A failed refresh keeps the
    /// session `Active`.
    pub fn on_resolve_failed(&mut self, epoch: Epoch, error: TransportError) -> Option<ChatError> {
        if !self.is_current(epoch) || self.state != SessionState::Resolving {
            return None;
        }
        warn!(error = %error, "Conversation resolution failed");
        Some(self.fail_resolution(error.into()))
    }

    fn fail_resolution(&mut self, error: ChatError) -> ChatError {
        self.state = if self.resolved_once {
            SessionState::Active
        } else {
            SessionState::Unresolved
        };
        error
    }

    // -- Sending ------------------------------------------------------------

    /// Create and list the optimistic placeholder for `text`.
    pub fn submit(&mut self, text: &str, now: DateTime<Utc>) -> Result<Message> {
        match self.state {
            SessionState::Closed => return Err(ChatError::Closed),
            SessionState::Unresolved => return Err(ChatError::ConversationUnresolved),
            SessionState::Resolving if !self.resolved_once => {
                return Err(ChatError::ConversationUnresolved)
            }
            _ => {}
        }
        tracker::submit(&mut self.conversation, text, &self.identity, now)
    }

    /// Apply the REST response for a send. Returns `false` when stale or
    /// when the response carried no usable message.
    pub fn on_send_confirmed(
        &mut self,
        epoch: Epoch,
        placeholder_id: &MessageId,
        raw: &Value,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_current(epoch) {
            return false;
        }
        match normalizer::normalize(raw, &self.context(now)) {
            Some(confirmed) => {
                tracker::confirm(&mut self.conversation, placeholder_id, confirmed);
                true
            }
            None => {
                // Stored but unreadable; the next poll reconciles it by text.
                warn!(placeholder = %placeholder_id, "Send response carried no message");
                false
            }
        }
    }

    /// Mark a send as failed. Returns the text to restore in the compose field.
    pub fn on_send_failed(&mut self, epoch: Epoch, placeholder_id: &MessageId) -> Option<String> {
        if !self.is_current(epoch) {
            return None;
        }
        tracker::fail(&mut self.conversation, placeholder_id)
    }

    // -- Receiving ----------------------------------------------------------

    /// Route, normalize and merge one live channel frame.
    pub fn on_live_event(&mut self, frame: &Value, now: DateTime<Utc>) -> Result<MergeReport> {
        match self.state {
            SessionState::Active | SessionState::Resolving if self.resolved_once => {}
            SessionState::Closed => return Err(ChatError::Closed),
            other => return Err(ChatError::InvalidState(other.name())),
        }

        let event = LiveEvent::from_frame(frame).ok_or(ChatError::MalformedMessage)?;
        merger::route(&event, &self.conversation)?;

        let message =
            normalizer::normalize(&event.payload, &self.context(now)).ok_or(ChatError::MalformedMessage)?;
        Ok(merger::merge(&mut self.conversation, [message]))
    }

    /// Merge a poll result. Returns `None` when stale.
    pub fn on_snapshot(
        &mut self,
        epoch: Epoch,
        snapshot: &ConversationSnapshot,
        now: DateTime<Utc>,
    ) -> Option<MergeReport> {
        if !self.is_current(epoch) || !self.resolved_once {
            return None;
        }
        if let (Some(got), Some(open)) = (&snapshot.chat_id, &self.conversation.chat_id) {
            if got != open {
                warn!(expected = %open, got = %got, "Ignoring snapshot for another chat");
                return None;
            }
        }
        let incoming = normalizer::normalize_all(&snapshot.messages, &self.context(now));
        Some(merger::merge(&mut self.conversation, incoming))
    }

    /// Poll failures are logged only; the next tick retries.
    pub fn on_poll_failed(&self, epoch: Epoch, error: &TransportError) {
        if self.is_current(epoch) {
            warn!(error = %error, "Poll failed, retrying on next tick");
        }
    }

    // -- Identity -----------------------------------------------------------

    /// Adopt a new identity value. The pending -> resolved transition runs
    /// the reclassification pass; returns how many messages changed side.
    pub fn set_local_user(&mut self, identity: LocalIdentity) -> usize {
        let was_pending = !self.identity.is_resolved();
        self.identity = identity;
        if was_pending && self.identity.is_resolved() {
            let changed = normalizer::reclassify(&mut self.conversation.messages, &self.identity);
            info!(changed, "Local identity resolved, messages re-classified");
            changed
        } else {
            0
        }
    }

    // -- Lifecycle ----------------------------------------------------------

    /// `* -> Closed`. Returns the chat id whose live room should be left.
    pub fn close(&mut self) -> Option<ChatId> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.state = SessionState::Closed;
        self.epoch += 1;
        info!(epoch = self.epoch, "Conversation closed");
        self.conversation.chat_id.clone()
    }

    /// Start over from `Unresolved` with an empty list. Only the chat id and
    /// counterpart carry over.
    pub fn reopen(&mut self) {
        let counterpart = self.conversation.counterpart_id.clone();
        let chat_id = self.conversation.chat_id.clone();
        self.conversation = Conversation::new(counterpart, chat_id);
        self.state = SessionState::Unresolved;
        self.resolved_once = false;
        self.epoch += 1;
    }
}
