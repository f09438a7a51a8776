pub use huddle_protocol::{ChatMessage, PinnedMessage, Reaction};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Current wall clock in Unix milliseconds.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// A principal's standing in a room, owned by the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MembershipRecord {
    pub room_id: String,
    pub name: String,
    pub user_id: Option<i64>,
    pub is_admin: bool,
    pub is_owner: bool,
    pub is_muted: bool,
    pub is_banned: bool,
}

impl MembershipRecord {
    pub fn member(room_id: &str, name: &str, user_id: Option<i64>) -> Self {
        Self {
            room_id: room_id.into(),
            name: name.into(),
            user_id,
            is_admin: false,
            is_owner: false,
            is_muted: false,
            is_banned: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub group_id: String,
    pub name: String,
    pub user_id: Option<i64>,
    pub message: Option<String>,
    pub is_encrypted: bool,
    pub encrypted_content: Option<String>,
    pub key_version: Option<i64>,
    pub parent_message_id: Option<String>,
    pub forwarded_from: Option<String>,
}

/// Fields an edit may change. `edited_at` is stamped by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub message: Option<String>,
    pub encrypted_content: Option<String>,
    pub key_version: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReaction {
    pub message_id: String,
    pub user_name: String,
    pub user_id: Option<i64>,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReadReceipt {
    pub message_id: String,
    pub user_name: String,
    pub user_id: Option<i64>,
    pub read_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPin {
    pub message_id: String,
    pub group_id: String,
    pub pinned_by: String,
}
