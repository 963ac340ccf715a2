/// Application name
pub const APP_NAME: &str = "Parlor";

/// Default REST base URL (local development backend)
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000/api";

/// Default live channel URL
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:5000/ws";

/// Poll interval for conversation snapshots in milliseconds.
/// Polling runs even while the live channel is up.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_500;

/// Lower bound accepted for the poll interval
pub const MIN_POLL_INTERVAL_MS: u64 = 250;

/// Bounded timeout for resolve/send/fetch calls in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 12;

/// Live channel reconnect backoff bounds in milliseconds
pub const RECONNECT_BASE_MS: u64 = 500;
pub const RECONNECT_MAX_MS: u64 = 30_000;
pub const RECONNECT_JITTER_MS: u64 = 250;

/// Capacity of the per-subscription live event queue
pub const LIVE_EVENT_BUFFER: usize = 256;

/// Suffix appended to the displayed text of a message that failed to send
pub const FAILED_SEND_MARKER: &str = " (failed to send)";

/// Field aliases accepted in loosely-typed server payloads, in priority order.
pub const TEXT_FIELDS: &[&str] = &["text", "body", "message"];
pub const SENDER_FIELDS: &[&str] = &[
    "sender",
    "senderId",
    "sender_id",
    "from",
    "fromUserId",
    "userId",
    "user",
    "author",
];
pub const RECIPIENT_FIELDS: &[&str] = &["recipient", "recipientId", "receiver", "receiverId", "to"];
pub const MESSAGE_ID_FIELDS: &[&str] = &["_id", "id", "messageId"];
pub const CHAT_ID_FIELDS: &[&str] = &["chatId", "chat_id", "conversationId", "roomId"];
pub const CREATED_AT_FIELDS: &[&str] = &["createdAt", "created_at", "timestamp", "sentAt"];
pub const EDITED_FIELDS: &[&str] = &["edited", "isEdited"];
pub const PARTICIPANT_FIELDS: &[&str] = &["participants", "members"];

/// Keys accepted inside an object-shaped sender reference
pub const NESTED_ID_FIELDS: &[&str] = &["_id", "id", "userId"];
