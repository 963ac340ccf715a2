//! Terminal rendering of session views and notices.

use std::collections::HashMap;

use chrono::Local;

use parlor_chat::{DeliveryStatus, Message, SessionNotice, SessionView, Side};
use parlor_shared::types::MessageId;

/// Remembers what has been printed so each view update only emits the delta.
#[derive(Debug, Default)]
pub struct Transcript {
    shown: HashMap<MessageId, (String, DeliveryStatus)>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines to print for `view` since the previous call.
    pub fn update(&mut self, view: &SessionView) -> Vec<String> {
        // Placeholders that vanished were replaced by their server copy.
        let confirmed: Vec<String> = self
            .shown
            .iter()
            .filter(|(id, _)| id.is_local() && !view.messages.iter().any(|m| &m.id == *id))
            .map(|(_, (text, _))| text.clone())
            .collect();
        self.shown.retain(|id, _| view.messages.iter().any(|m| &m.id == id));

        let mut lines = Vec::new();
        for message in &view.messages {
            match self.shown.get(&message.id) {
                None if message.side == Side::Local && confirmed.contains(&message.text) => {
                    lines.push(format!("  delivered: {}", message.text));
                }
                None => lines.push(format_message(message)),
                Some((_, status)) if *status != message.status => {
                    if message.status == DeliveryStatus::Failed {
                        lines.push(format!("  ! {}", message.display_text()));
                    }
                }
                Some(_) => continue,
            }
            self.shown
                .insert(message.id.clone(), (message.text.clone(), message.status));
        }
        lines
    }
}

pub fn format_message(message: &Message) -> String {
    let time = message.created_at.with_timezone(&Local).format("%H:%M");
    let who = match message.side {
        Side::Local => "you",
        Side::Remote => "them",
    };
    let mut line = format!("[{time}] {who}: {}", message.display_text());
    if message.status == DeliveryStatus::Sending {
        line.push_str(" (sending)");
    }
    if message.edited {
        line.push_str(" (edited)");
    }
    line
}

pub fn format_notice(notice: &SessionNotice) -> String {
    match notice {
        SessionNotice::SendFailed { draft, error, .. } => {
            format!("! {error}. Draft restored: {draft}")
        }
        SessionNotice::Rejected { error, .. } => format!("! {error}"),
        SessionNotice::RefreshFailed(error) => format!("! Refresh failed: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use parlor_chat::{ChatError, SessionState};
    use parlor_shared::types::{ChatId, UserId};

    fn message(id: &str, text: &str, side: Side, status: DeliveryStatus) -> Message {
        Message {
            id: MessageId::new(id),
            text: text.into(),
            side,
            original_sender_id: None,
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            status,
            edited: false,
        }
    }

    fn view(messages: Vec<Message>) -> SessionView {
        SessionView {
            state: SessionState::Active,
            chat_id: Some(ChatId::new("c1")),
            counterpart_id: UserId::new("u2"),
            identity_resolved: true,
            live_connected: false,
            messages,
        }
    }

    #[test]
    fn test_prints_only_new_messages() {
        let mut t = Transcript::new();
        let a = message("a", "hello", Side::Remote, DeliveryStatus::Sent);
        let lines = t.update(&view(vec![a.clone()]));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("them: hello"));

        let b = message("b", "hi", Side::Local, DeliveryStatus::Sent);
        let lines = t.update(&view(vec![a.clone(), b]));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("you: hi"));

        assert!(t.update(&view(vec![a])).is_empty());
    }

    #[test]
    fn test_placeholder_lifecycle() {
        let mut t = Transcript::new();
        let p = message("local-1", "offer", Side::Local, DeliveryStatus::Sending);
        assert!(t.update(&view(vec![p])).pop().unwrap().ends_with("offer (sending)"));

        let confirmed = message("srv-1", "offer", Side::Local, DeliveryStatus::Sent);
        assert_eq!(t.update(&view(vec![confirmed])), vec!["  delivered: offer"]);

        let p = message("local-2", "again", Side::Local, DeliveryStatus::Sending);
        t.update(&view(vec![p.clone()]));
        let failed = Message { status: DeliveryStatus::Failed, ..p };
        assert_eq!(t.update(&view(vec![failed])), vec!["  ! again (failed to send)"]);
    }

    #[test]
    fn test_format_notice() {
        let notice = SessionNotice::SendFailed {
            message_id: MessageId::new("local-1"),
            draft: "hi".into(),
            error: ChatError::TransportFailure(parlor_shared::TransportError::Timeout),
        };
        assert_eq!(format_notice(&notice), "! Transport failure: Request timed out. Draft restored: hi");
    }
}
