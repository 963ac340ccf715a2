//! Merges live events, poll snapshots and late confirmations into the open
//! conversation.
//!
//! Every producer goes through [`merge`], so there is exactly one
//! de-duplication rule:
//!
//! 1. an incoming message whose id is already listed is skipped;
//! 2. otherwise, if an in-flight placeholder carries the same (trimmed) text
//!    and the incoming message is not attributed to someone else, it takes the
//!    placeholder's slot;
//! 3. otherwise it is appended.
//!
//! Placeholders are never removed or downgraded here. After each merge the
//! list is stably sorted by `created_at`, which makes the operation
//! idempotent and independent of socket/poll arrival order.

use tracing::{debug, trace};

use parlor_shared::protocol::LiveEvent;
use parlor_shared::types::MessageId;

use crate::error::{ChatError, Result};
use crate::models::{Conversation, Message, Side};

/// What a merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub appended: usize,
    /// Placeholder ids that were replaced by a server message.
    pub replaced: Vec<MessageId>,
    pub duplicates: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.appended > 0 || !self.replaced.is_empty()
    }
}

/// Decide whether a live event belongs to `conversation`.
///
/// An explicit chat id must match the open chat. Without one, the counterpart
/// has to appear as sender, recipient or participant; anything else is
/// dropped rather than guessed.
pub fn route(event: &LiveEvent, conversation: &Conversation) -> Result<()> {
    if let Some(chat_id) = &event.chat_id {
        return match &conversation.chat_id {
            Some(open) if open == chat_id => Ok(()),
            _ => Err(ChatError::AmbiguousRouting),
        };
    }

    let counterpart = &conversation.counterpart_id;
    let matched = event.sender.as_ref() == Some(counterpart)
        || event.recipient.as_ref() == Some(counterpart)
        || event.participants.contains(counterpart);

    if matched {
        Ok(())
    } else {
        Err(ChatError::AmbiguousRouting)
    }
}

/// Merge normalized messages into the conversation.
pub fn merge<I>(conversation: &mut Conversation, incoming: I) -> MergeReport
where
    I: IntoIterator<Item = Message>,
{
    let mut report = MergeReport::default();

    for message in incoming {
        if conversation.contains(&message.id) {
            report.duplicates += 1;
            continue;
        }

        if may_confirm_placeholder(&message) {
            if let Some(idx) = conversation.sending_with_text(&message.text) {
                let placeholder = std::mem::replace(
                    &mut conversation.messages[idx],
                    Message {
                        side: Side::Local,
                        ..message
                    },
                );
                debug!(
                    placeholder = %placeholder.id,
                    message_id = %conversation.messages[idx].id,
                    "Placeholder confirmed by server message"
                );
                report.replaced.push(placeholder.id);
                continue;
            }
        }

        trace!(message_id = %message.id, "Appending message");
        conversation.messages.push(message);
        report.appended += 1;
    }

    if report.changed() {
        conversation.sort();
    }

    report
}

/// Only messages that are ours, or carry no sender at all, can stand in for
/// an optimistic placeholder. A counterpart writing the same words must not
/// swallow our pending bubble.
fn may_confirm_placeholder(message: &Message) -> bool {
    message.side == Side::Local || message.original_sender_id.is_none()
}
