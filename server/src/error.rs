use thiserror::Error;

/// Why a handshake was refused. The socket is closed after `connect_error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Room ID required")]
    MissingRoom,
    #[error("User required")]
    MissingIdentity,
    #[error("Malformed handshake")]
    Malformed,
}

/// Outcome of a failed membership check.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    #[error("You are not a member of this group")]
    NotMember,
    #[error("You are muted in this group")]
    Muted,
    #[error("You are banned from this group")]
    Banned,
    #[error("Unable to verify group membership")]
    LookupError,
}

/// Failures of a single inbound event. Each one becomes an `error` event to
/// the acting connection; none of them ends the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Denied(#[from] DenyReason),
    #[error("Message not found")]
    MessageNotFound,
    #[error("You can only {0} your own messages")]
    NotAuthor(&'static str),
    #[error("Message cannot be empty")]
    EmptyMessage,
    #[error("Failed to {action}")]
    Persistence {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl SessionError {
    pub fn persistence(action: &'static str, source: anyhow::Error) -> Self {
        SessionError::Persistence { action, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_the_wire() {
        assert_eq!(
            SessionError::from(DenyReason::Banned).to_string(),
            "You are banned from this group"
        );
        assert_eq!(
            SessionError::NotAuthor("edit").to_string(),
            "You can only edit your own messages"
        );
        let err = SessionError::persistence("send message", anyhow::anyhow!("disk full"));
        assert_eq!(err.to_string(), "Failed to send message");
    }
}
