use huddle_protocol::{IdValue, RosterEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Chat group id as used on the wire.
pub type RoomId = String;

/// Unique id of one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First five characters, used to name guests.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..5].to_string()
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Key used for presence, the online index and targeted delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    Registered(i64),
    Guest(ConnectionId),
}

impl Identity {
    /// Identity named by a client-supplied user id: integers are registered
    /// users, connection ids are guests.
    pub fn from_wire(id: &IdValue) -> Option<Self> {
        if let Some(user_id) = id.as_i64() {
            return Some(Identity::Registered(user_id));
        }
        match id {
            IdValue::Text(s) => s.parse().ok().map(Identity::Guest),
            IdValue::Int(_) => None,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Identity::Registered(id) => Some(*id),
            Identity::Guest(_) => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Registered(id) => write!(f, "{id}"),
            Identity::Guest(conn) => write!(f, "{conn}"),
        }
    }
}

/// The identity bound to one live connection. Immutable for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub connection_id: ConnectionId,
    pub stable_user_id: Option<i64>,
    pub display_name: String,
}

impl Principal {
    pub fn new(
        connection_id: ConnectionId,
        stable_user_id: Option<i64>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            connection_id,
            stable_user_id,
            display_name: display_name.into(),
        }
    }

    pub fn guest_name(connection_id: &ConnectionId) -> String {
        format!("Guest-{}", connection_id.short())
    }

    pub fn identity(&self) -> Identity {
        match self.stable_user_id {
            Some(id) => Identity::Registered(id),
            None => Identity::Guest(self.connection_id),
        }
    }

    pub fn roster_entry(&self) -> RosterEntry {
        RosterEntry {
            id: self.identity().to_string(),
            name: self.display_name.clone(),
            user_id: self.stable_user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_identity_ignores_connection() {
        let a = Principal::new(ConnectionId::new(), Some(7), "Alice");
        let b = Principal::new(ConnectionId::new(), Some(7), "Alice (phone)");
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity().to_string(), "7");
    }

    #[test]
    fn guests_are_keyed_by_connection() {
        let a = Principal::new(ConnectionId::new(), None, "Guest");
        let b = Principal::new(ConnectionId::new(), None, "Guest");
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.identity().user_id(), None);
    }

    #[test]
    fn guest_name_uses_short_connection_id() {
        let conn = ConnectionId::new();
        let name = Principal::guest_name(&conn);
        assert!(name.starts_with("Guest-"));
        assert_eq!(name.len(), "Guest-".len() + 5);
    }

    #[test]
    fn wire_ids_resolve_to_identities() {
        let guest = Principal::new(ConnectionId::new(), None, "Guest");
        let wire = IdValue::Text(guest.identity().to_string());
        assert_eq!(Identity::from_wire(&wire), Some(guest.identity()));
        assert_eq!(
            Identity::from_wire(&IdValue::Text("12".into())),
            Some(Identity::Registered(12))
        );
        assert_eq!(Identity::from_wire(&IdValue::Int(3)), Some(Identity::Registered(3)));
        assert_eq!(Identity::from_wire(&IdValue::Text("bob".into())), None);
    }
}
