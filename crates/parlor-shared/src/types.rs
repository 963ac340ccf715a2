use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Build an id from any string, trimming surrounding whitespace.
            pub fn new(id: impl Into<String>) -> Self {
                let id = id.into();
                let trimmed = id.trim();
                if trimmed.len() == id.len() {
                    Self(id)
                } else {
                    Self(trimmed.to_string())
                }
            }

            /// Like [`Self::new`] but rejects ids that are empty after trimming.
            pub fn parse(id: impl Into<String>) -> Option<Self> {
                let id = Self::new(id);
                if id.0.is_empty() {
                    None
                } else {
                    Some(id)
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }
    };
}

string_id!(
    /// Backend account identifier of a chat participant.
    UserId
);

string_id!(
    /// Backend identifier of a conversation.
    ChatId
);

string_id!(
    /// Message identifier, either server-assigned or locally generated.
    MessageId
);

impl MessageId {
    pub const LOCAL_PREFIX: &'static str = "local-";

    /// Whether this id was minted on this device for an optimistic send.
    pub fn is_local(&self) -> bool {
        self.0.starts_with(Self::LOCAL_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_trimmed() {
        assert_eq!(UserId::new("  u1 \n").as_str(), "u1");
        assert_eq!(ChatId::from(" c9 "), ChatId::new("c9"));
    }

    #[test]
    fn test_parse_rejects_blank() {
        assert!(UserId::parse("   ").is_none());
        assert_eq!(UserId::parse(" a ").unwrap().as_str(), "a");
    }

    #[test]
    fn test_local_message_ids() {
        assert!(MessageId::new("local-1234").is_local());
        assert!(!MessageId::new("65f0c1").is_local());
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&ChatId::new("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }
}
