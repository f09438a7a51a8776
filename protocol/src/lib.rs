use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Errors raised while decoding or encoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Frame(#[source] serde_json::Error),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("invalid payload for `{event}`: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Top level frame exchanged over the socket in both directions.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Identifier that clients may send either as a JSON number or a string.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum IdValue {
    Int(i64),
    Text(String),
}

impl IdValue {
    /// Numeric view of the id, if it is (or parses as) an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            IdValue::Int(n) => Some(*n),
            IdValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Int(n) => write!(f, "{n}"),
            IdValue::Text(s) => f.write_str(s),
        }
    }
}

/// First frame a client sends on a new socket.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Handshake {
    #[serde(default)]
    pub auth: Auth,
}

impl Handshake {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Frame)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Auth {
    pub room: Option<String>,
    pub user: Option<UserClaim>,
}

/// Pre-verified identity claim carried by the handshake.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct UserClaim {
    pub id: Option<IdValue>,
    pub user_id: Option<IdValue>,
    pub name: Option<String>,
}

/// A chat message as persisted and as broadcast.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub group_id: String,
    pub name: String,
    pub user_id: Option<i64>,
    /// Cleared when the message is soft-deleted.
    pub message: Option<String>,
    #[serde(default)]
    pub is_encrypted: bool,
    pub encrypted_content: Option<String>,
    pub key_version: Option<i64>,
    pub parent_message_id: Option<String>,
    pub forwarded_from: Option<String>,
    pub created_at: i64,
    pub edited_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub id: i64,
    pub message_id: String,
    pub user_name: String,
    pub user_id: Option<i64>,
    pub emoji: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PinnedMessage {
    pub id: i64,
    pub message_id: String,
    pub group_id: String,
    pub pinned_by: String,
    pub pinned_at: i64,
}

/// One connected principal as shown in a room roster.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SendMessage {
    #[serde(default, alias = "message")]
    pub body: Option<String>,
    pub user_id: Option<IdValue>,
    #[serde(default)]
    pub is_encrypted: bool,
    pub encrypted_content: Option<String>,
    pub key_version: Option<i64>,
    pub parent_message_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EditMessage {
    pub id: String,
    pub message: String,
    pub user_id: Option<IdValue>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeleteMessage {
    pub id: String,
    pub user_id: Option<IdValue>,
}

/// Payload of both `addReaction` and `removeReaction`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ReactionRequest {
    pub message_id: String,
    pub emoji: String,
    pub user_name: Option<String>,
    pub user_id: Option<IdValue>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsRead {
    pub message_ids: Vec<String>,
    pub user_id: Option<IdValue>,
    pub user_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PinMessage {
    pub message_id: String,
    pub user_id: Option<IdValue>,
    pub user_name: Option<String>,
    pub group_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnpinMessage {
    pub message_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardMessage {
    pub original_message_id: String,
    pub target_group_id: String,
    pub user_id: Option<IdValue>,
    pub user_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MentionUser {
    pub mentioned_user_ids: Vec<IdValue>,
    pub message_id: String,
    pub sender_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KickUser {
    pub user_id: Option<IdValue>,
    pub user_name: Option<String>,
    pub reason: Option<String>,
}

/// Payload of `typing` and `stopTyping`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TypingNotice {
    pub id: Option<IdValue>,
    pub name: Option<String>,
}

/// Events a client may send once its connection is bound to a room.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(SendMessage),
    EditMessage(EditMessage),
    DeleteMessage(DeleteMessage),
    AddReaction(ReactionRequest),
    RemoveReaction(ReactionRequest),
    MarkAsRead(MarkAsRead),
    PinMessage(PinMessage),
    UnpinMessage(UnpinMessage),
    ForwardMessage(ForwardMessage),
    MentionUser(MentionUser),
    KickUser(KickUser),
    Typing(TypingNotice),
    StopTyping(TypingNotice),
    GetUsers,
    GetOnlineUsers,
}

impl Inbound {
    /// Decode a text frame into a typed inbound event.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: Frame = serde_json::from_str(text).map_err(ProtocolError::Frame)?;
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: Frame) -> Result<Self, ProtocolError> {
        let Frame { event, data } = frame;
        let inbound = match event.as_str() {
            "message" => Inbound::Message(payload(&event, data)?),
            "editMessage" => Inbound::EditMessage(payload(&event, data)?),
            "deleteMessage" => Inbound::DeleteMessage(payload(&event, data)?),
            "addReaction" => Inbound::AddReaction(payload(&event, data)?),
            "removeReaction" => Inbound::RemoveReaction(payload(&event, data)?),
            "markAsRead" => Inbound::MarkAsRead(payload(&event, data)?),
            "pinMessage" => Inbound::PinMessage(payload(&event, data)?),
            "unpinMessage" => Inbound::UnpinMessage(payload(&event, data)?),
            "forwardMessage" => Inbound::ForwardMessage(payload(&event, data)?),
            "mentionUser" => Inbound::MentionUser(payload(&event, data)?),
            "kickUser" => Inbound::KickUser(payload(&event, data)?),
            "typing" => Inbound::Typing(optional_payload(&event, data)?),
            "stopTyping" => Inbound::StopTyping(optional_payload(&event, data)?),
            "getUsers" => Inbound::GetUsers,
            "getOnlineUsers" => Inbound::GetOnlineUsers,
            other => return Err(ProtocolError::UnknownEvent(other.to_string())),
        };
        Ok(inbound)
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Inbound::Message(_) => "message",
            Inbound::EditMessage(_) => "editMessage",
            Inbound::DeleteMessage(_) => "deleteMessage",
            Inbound::AddReaction(_) => "addReaction",
            Inbound::RemoveReaction(_) => "removeReaction",
            Inbound::MarkAsRead(_) => "markAsRead",
            Inbound::PinMessage(_) => "pinMessage",
            Inbound::UnpinMessage(_) => "unpinMessage",
            Inbound::ForwardMessage(_) => "forwardMessage",
            Inbound::MentionUser(_) => "mentionUser",
            Inbound::KickUser(_) => "kickUser",
            Inbound::Typing(_) => "typing",
            Inbound::StopTyping(_) => "stopTyping",
            Inbound::GetUsers => "getUsers",
            Inbound::GetOnlineUsers => "getOnlineUsers",
        }
    }
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::Payload {
        event: event.to_string(),
        source,
    })
}

fn optional_payload<T: DeserializeOwned + Default>(
    event: &str,
    data: Value,
) -> Result<T, ProtocolError> {
    if data.is_null() {
        Ok(T::default())
    } else {
        payload(event, data)
    }
}

// ---------------------------------------------------------------------------
// Outbound events
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ReactionRef {
    pub message_id: String,
    pub emoji: String,
    pub user_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadNotice {
    pub message_ids: Vec<String>,
    pub user_id: Option<i64>,
    pub user_name: String,
    pub read_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnpinNotice {
    pub message_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardAck {
    pub original_message_id: String,
    pub target_group_id: String,
    pub message: ChatMessage,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MentionNotice {
    pub message_id: String,
    pub group_id: String,
    pub sender_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KickNotice {
    pub reason: String,
    pub group_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRemoved {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserOnline {
    pub user_id: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub user_id: String,
}

/// `typing` carries one name when someone starts typing and the remaining
/// names when someone stops, unless the server is configured to always send
/// the list.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum TypingPayload {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
}

/// Events the server sends to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Outbound {
    Message(ChatMessage),
    MessageEdited(ChatMessage),
    MessageDeleted(MessageRef),
    ReactionAdded(Reaction),
    ReactionRemoved(ReactionRef),
    MessagesRead(ReadNotice),
    MessagePinned(PinnedMessage),
    MessageUnpinned(UnpinNotice),
    MessageForwarded(ForwardAck),
    Mentioned(MentionNotice),
    Kicked(KickNotice),
    UserRemoved(UserRemoved),
    ActiveUsers(Vec<RosterEntry>),
    OnlineUsers(Vec<RosterEntry>),
    UserOnline(UserOnline),
    UserLeft(UserRef),
    UserOffline(UserRef),
    Typing(TypingPayload),
    Error(ErrorNotice),
    #[serde(rename = "connect_error")]
    ConnectError(ErrorNotice),
}

impl Outbound {
    pub fn error(message: impl Into<String>) -> Self {
        Outbound::Error(ErrorNotice {
            message: message.into(),
        })
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Outbound::Message(_) => "message",
            Outbound::MessageEdited(_) => "messageEdited",
            Outbound::MessageDeleted(_) => "messageDeleted",
            Outbound::ReactionAdded(_) => "reactionAdded",
            Outbound::ReactionRemoved(_) => "reactionRemoved",
            Outbound::MessagesRead(_) => "messagesRead",
            Outbound::MessagePinned(_) => "messagePinned",
            Outbound::MessageUnpinned(_) => "messageUnpinned",
            Outbound::MessageForwarded(_) => "messageForwarded",
            Outbound::Mentioned(_) => "mentioned",
            Outbound::Kicked(_) => "kicked",
            Outbound::UserRemoved(_) => "userRemoved",
            Outbound::ActiveUsers(_) => "activeUsers",
            Outbound::OnlineUsers(_) => "onlineUsers",
            Outbound::UserOnline(_) => "userOnline",
            Outbound::UserLeft(_) => "userLeft",
            Outbound::UserOffline(_) => "userOffline",
            Outbound::Typing(_) => "typing",
            Outbound::Error(_) => "error",
            Outbound::ConnectError(_) => "connect_error",
        }
    }

    /// Serialize into the `{event, data}` text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_accepts_numeric_and_string_ids() {
        let hs = Handshake::parse(
            r#"{"auth":{"room":"R1","user":{"id":"abc","user_id":7,"name":"Alice"}}}"#,
        )
        .unwrap();
        let user = hs.auth.user.unwrap();
        assert_eq!(hs.auth.room.as_deref(), Some("R1"));
        assert_eq!(user.user_id.unwrap().as_i64(), Some(7));
        assert_eq!(user.id.unwrap().as_i64(), None);

        let hs = Handshake::parse(r#"{"auth":{"user":{"user_id":"42"}}}"#).unwrap();
        assert!(hs.auth.room.is_none());
        assert_eq!(hs.auth.user.unwrap().user_id.unwrap().as_i64(), Some(42));
    }

    #[test]
    fn inbound_events_decode_by_name() {
        let ev = Inbound::parse(
            r#"{"event":"forwardMessage","data":{"originalMessageId":"m1","targetGroupId":"R2","userId":"7","userName":"Alice"}}"#,
        )
        .unwrap();
        match ev {
            Inbound::ForwardMessage(f) => {
                assert_eq!(f.original_message_id, "m1");
                assert_eq!(f.target_group_id, "R2");
                assert_eq!(f.user_id.and_then(|id| id.as_i64()), Some(7));
            }
            other => panic!("unexpected {other:?}"),
        }

        let ev = Inbound::parse(r#"{"event":"message","data":{"message":"hi"}}"#).unwrap();
        assert_eq!(
            ev,
            Inbound::Message(SendMessage {
                body: Some("hi".into()),
                user_id: None,
                is_encrypted: false,
                encrypted_content: None,
                key_version: None,
                parent_message_id: None,
            })
        );

        assert_eq!(Inbound::parse(r#"{"event":"getUsers"}"#).unwrap(), Inbound::GetUsers);
        assert_eq!(
            Inbound::parse(r#"{"event":"stopTyping","data":null}"#).unwrap(),
            Inbound::StopTyping(TypingNotice::default())
        );
    }

    #[test]
    fn unknown_and_malformed_events_are_distinguished() {
        assert!(matches!(
            Inbound::parse(r#"{"event":"shout","data":{}}"#),
            Err(ProtocolError::UnknownEvent(name)) if name == "shout"
        ));
        assert!(matches!(
            Inbound::parse(r#"{"event":"editMessage","data":{"id":"m1"}}"#),
            Err(ProtocolError::Payload { event, .. }) if event == "editMessage"
        ));
        assert!(matches!(Inbound::parse("not json"), Err(ProtocolError::Frame(_))));
    }

    #[test]
    fn outbound_frames_use_event_and_data() {
        let frame: Value = serde_json::from_str(
            &Outbound::MessageUnpinned(UnpinNotice {
                message_id: "m1".into(),
            })
            .encode()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(frame, json!({"event":"messageUnpinned","data":{"messageId":"m1"}}));

        let frame: Value = serde_json::from_str(
            &Outbound::ConnectError(ErrorNotice {
                message: "no room".into(),
            })
            .encode()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(frame["event"], "connect_error");
    }

    #[test]
    fn typing_payload_shapes() {
        let one = Outbound::Typing(TypingPayload::One("Alice".into()));
        let many = Outbound::Typing(TypingPayload::Many(vec!["Bob".into()]));
        let one: Value = serde_json::from_str(&one.encode().unwrap()).unwrap();
        let many: Value = serde_json::from_str(&many.encode().unwrap()).unwrap();
        assert_eq!(one["data"], json!("Alice"));
        assert_eq!(many["data"], json!(["Bob"]));
    }
}
