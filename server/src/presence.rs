//! In-memory presence: per-room rosters and typing state, plus the
//! process-wide online index used for targeted delivery.
//!
//! Rooms are sharded behind their own lock. The room map lock is only held
//! to find, create or prune a room, never while a room is being mutated.
//! Lock order is map, then room, then online index.

use crate::identity::{ConnectionId, Identity, Principal, RoomId};
use crate::typing::TypingTracker;
use huddle_protocol::RosterEntry;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Result of [`PresenceRegistry::join`].
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub roster: Vec<RosterEntry>,
    /// Connection whose entry was taken over by this join, if any.
    pub replaced: Option<ConnectionId>,
    /// First live connection of this identity in the process.
    pub came_online: bool,
}

/// Result of [`PresenceRegistry::leave`].
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveOutcome {
    /// Updated roster when the leaver owned its entry and the entry is gone.
    /// `None` means the departure is silent for the room.
    pub roster: Option<Vec<RosterEntry>>,
    /// Remaining typists when the leaver's typing entry was cleared.
    pub typing: Option<Vec<String>>,
    /// Last live connection of this identity in the process.
    pub went_offline: bool,
}

/// A live connection as seen by the online index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineEntry {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub room: RoomId,
}

/// Operations the session needs from presence. The in-process
/// [`LocalPresence`] is the only implementation today.
pub trait PresenceRegistry: Send + Sync {
    fn join(&self, room: &str, principal: &Principal) -> JoinOutcome;
    fn leave(&self, room: &str, principal: &Principal) -> LeaveOutcome;
    fn roster(&self, room: &str) -> Vec<RosterEntry>;
    /// Returns the names now typing in the room.
    fn typing_start(&self, room: &str, identity: Identity, name: &str) -> Vec<String>;
    fn typing_stop(&self, room: &str, identity: Identity) -> Vec<String>;
    /// Drop typing entries older than `ttl`; returns the rooms that changed.
    fn expire_typing(&self, ttl: Duration) -> Vec<(RoomId, Vec<String>)>;
    fn connections_of(&self, identity: Identity) -> Vec<OnlineEntry>;
    /// One entry per online identity.
    fn online(&self) -> Vec<RosterEntry>;
}

#[derive(Default)]
struct RoomState {
    roster: Vec<Principal>,
    typing: TypingTracker,
    /// Set once the room has been pruned from the map.
    retired: bool,
}

impl RoomState {
    fn entries(&self) -> Vec<RosterEntry> {
        self.roster.iter().map(Principal::roster_entry).collect()
    }

    fn is_idle(&self) -> bool {
        self.roster.is_empty() && self.typing.is_empty()
    }
}

#[derive(Default)]
pub struct LocalPresence {
    rooms: RwLock<HashMap<RoomId, Arc<Mutex<RoomState>>>>,
    online: Mutex<HashMap<Identity, Vec<OnlineEntry>>>,
}

impl LocalPresence {
    pub fn new() -> Self {
        Self::default()
    }

    fn room(&self, room: &str) -> Option<Arc<Mutex<RoomState>>> {
        self.rooms.read().get(room).cloned()
    }

    fn get_or_create(&self, room: &str) -> Arc<Mutex<RoomState>> {
        if let Some(state) = self.room(room) {
            return state;
        }
        self.rooms
            .write()
            .entry(room.to_string())
            .or_default()
            .clone()
    }

    /// Run `f` against a live room state, creating the room if needed.
    fn with_room<T>(&self, room: &str, mut f: impl FnMut(&mut RoomState) -> T) -> T {
        loop {
            let state = self.get_or_create(room);
            let mut guard = state.lock();
            if !guard.retired {
                return f(&mut *guard);
            }
        }
    }

    fn prune_if_idle(&self, room: &str) {
        let mut rooms = self.rooms.write();
        let idle = match rooms.get(room) {
            Some(state) => {
                let mut guard = state.lock();
                if guard.is_idle() {
                    guard.retired = true;
                }
                guard.retired
            }
            None => false,
        };
        if idle {
            rooms.remove(room);
        }
    }

    /// Remove one connection from the online index. Returns true when it
    /// was the identity's last.
    fn drop_online(&self, identity: Identity, connection_id: ConnectionId) -> bool {
        let mut online = self.online.lock();
        let Some(conns) = online.get_mut(&identity) else {
            return false;
        };
        conns.retain(|e| e.connection_id != connection_id);
        if conns.is_empty() {
            online.remove(&identity);
            true
        } else {
            false
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }
}

impl PresenceRegistry for LocalPresence {
    fn join(&self, room: &str, principal: &Principal) -> JoinOutcome {
        let identity = principal.identity();
        let came_online = {
            let mut online = self.online.lock();
            let conns = online.entry(identity).or_default();
            conns.retain(|e| e.connection_id != principal.connection_id);
            conns.push(OnlineEntry {
                connection_id: principal.connection_id,
                display_name: principal.display_name.clone(),
                room: room.to_string(),
            });
            conns.len() == 1
        };
        self.with_room(room, |state| {
            let replaced = match state.roster.iter_mut().find(|p| p.identity() == identity) {
                Some(existing) => {
                    let old = existing.connection_id;
                    *existing = principal.clone();
                    Some(old).filter(|old| *old != principal.connection_id)
                }
                None => {
                    state.roster.push(principal.clone());
                    None
                }
            };
            JoinOutcome {
                roster: state.entries(),
                replaced,
                came_online,
            }
        })
    }

    fn leave(&self, room: &str, principal: &Principal) -> LeaveOutcome {
        let identity = principal.identity();
        let mut outcome = LeaveOutcome {
            roster: None,
            typing: None,
            went_offline: false,
        };
        let Some(state) = self.room(room) else {
            outcome.went_offline = self.drop_online(identity, principal.connection_id);
            return outcome;
        };
        // the roster entry goes before the online entry so that a roster
        // never names an identity the online index has already dropped
        let idle = {
            let mut guard = state.lock();
            let pos = guard.roster.iter().position(|p| {
                p.identity() == identity && p.connection_id == principal.connection_id
            });
            if let Some(pos) = pos {
                // another live connection of the same identity in this room
                // inherits the entry instead of the identity leaving
                let heir = self.online.lock().get(&identity).and_then(|conns| {
                    conns
                        .iter()
                        .rev()
                        .find(|e| e.room == room && e.connection_id != principal.connection_id)
                        .cloned()
                });
                match heir {
                    Some(heir) => {
                        guard.roster[pos] = Principal::new(
                            heir.connection_id,
                            principal.stable_user_id,
                            heir.display_name,
                        );
                    }
                    None => {
                        guard.roster.remove(pos);
                        outcome.roster = Some(guard.entries());
                        if guard.typing.stop(identity) {
                            outcome.typing = Some(guard.typing.names());
                        }
                    }
                }
            }
            outcome.went_offline = self.drop_online(identity, principal.connection_id);
            guard.is_idle()
        };
        if idle {
            self.prune_if_idle(room);
        }
        outcome
    }

    fn roster(&self, room: &str) -> Vec<RosterEntry> {
        self.room(room)
            .map(|state| state.lock().entries())
            .unwrap_or_default()
    }

    fn typing_start(&self, room: &str, identity: Identity, name: &str) -> Vec<String> {
        self.with_room(room, |state| {
            state.typing.start(identity, name);
            state.typing.names()
        })
    }

    fn typing_stop(&self, room: &str, identity: Identity) -> Vec<String> {
        let Some(state) = self.room(room) else {
            return Vec::new();
        };
        let (names, idle) = {
            let mut guard = state.lock();
            guard.typing.stop(identity);
            (guard.typing.names(), guard.is_idle())
        };
        if idle {
            self.prune_if_idle(room);
        }
        names
    }

    fn expire_typing(&self, ttl: Duration) -> Vec<(RoomId, Vec<String>)> {
        let rooms: Vec<(RoomId, Arc<Mutex<RoomState>>)> = self
            .rooms
            .read()
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        let mut changed = Vec::new();
        for (id, state) in rooms {
            let (expired, names, idle) = {
                let mut guard = state.lock();
                if guard.retired {
                    continue;
                }
                let expired = guard.typing.expire(ttl);
                (expired, guard.typing.names(), guard.is_idle())
            };
            if idle {
                self.prune_if_idle(&id);
            }
            if expired {
                changed.push((id, names));
            }
        }
        changed
    }

    fn connections_of(&self, identity: Identity) -> Vec<OnlineEntry> {
        self.online
            .lock()
            .get(&identity)
            .cloned()
            .unwrap_or_default()
    }

    fn online(&self) -> Vec<RosterEntry> {
        self.online
            .lock()
            .iter()
            .filter_map(|(identity, conns)| {
                let latest = conns.last()?;
                Some(RosterEntry {
                    id: identity.to_string(),
                    name: latest.display_name.clone(),
                    user_id: identity.user_id(),
                })
            })
            .collect()
    }
}
