//! Room-scoped delivery of outbound events.

use crate::identity::{ConnectionId, RoomId};
use anyhow::Result;
use async_trait::async_trait;
use huddle_protocol::Outbound;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Frames queued per socket before new ones are dropped.
pub const OUTLET_CAPACITY: usize = 256;

/// Encoded text frames headed for one socket.
pub type Outlet = mpsc::Sender<Arc<str>>;

pub fn outlet() -> (Outlet, mpsc::Receiver<Arc<str>>) {
    mpsc::channel(OUTLET_CAPACITY)
}

/// Queue a frame without waiting. A socket that is not draining its queue
/// loses the frame.
pub fn offer(id: ConnectionId, outlet: &Outlet, frame: Arc<str>) -> bool {
    match outlet.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(connection = %id, "outlet full, dropping frame");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Broadcast to every connection bound to a room, wherever it lives.
#[async_trait]
pub trait Fanout: Send + Sync {
    async fn broadcast(
        &self,
        room: &str,
        event: &Outbound,
        exclude: Option<ConnectionId>,
    ) -> Result<()>;
}

pub fn encode(event: &Outbound) -> Result<Arc<str>> {
    Ok(Arc::from(event.encode()?))
}

#[derive(Default)]
struct Registry {
    rooms: HashMap<RoomId, HashMap<ConnectionId, Outlet>>,
    bound: HashMap<ConnectionId, RoomId>,
}

/// Outlets of the sockets connected to this process.
#[derive(Default)]
pub struct Connections {
    inner: RwLock<Registry>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, room: &str, id: ConnectionId, outlet: Outlet) {
        let mut inner = self.inner.write();
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(id, outlet);
        inner.bound.insert(id, room.to_string());
    }

    /// Returns false if the connection was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.write();
        let Some(room) = inner.bound.remove(&id) else {
            return false;
        };
        if let Some(members) = inner.rooms.get_mut(&room) {
            members.remove(&id);
            if members.is_empty() {
                inner.rooms.remove(&room);
            }
        }
        true
    }

    /// Deliver an encoded frame to local connections of a room.
    /// Returns how many outlets accepted it.
    pub fn deliver_local(&self, room: &str, frame: &Arc<str>, exclude: Option<ConnectionId>) -> usize {
        let inner = self.inner.read();
        let Some(members) = inner.rooms.get(room) else {
            return 0;
        };
        members
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .filter(|(id, outlet)| offer(**id, outlet, frame.clone()))
            .count()
    }

    /// Unicast to one local connection.
    pub fn send_to(&self, id: ConnectionId, event: &Outbound) -> Result<bool> {
        let frame = encode(event)?;
        let inner = self.inner.read();
        let Some(room) = inner.bound.get(&id) else {
            return Ok(false);
        };
        let sent = inner
            .rooms
            .get(room)
            .and_then(|members| members.get(&id))
            .is_some_and(|outlet| offer(id, outlet, frame));
        Ok(sent)
    }

    pub fn len(&self) -> usize {
        self.inner.read().bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Fanout for Connections {
    async fn broadcast(
        &self,
        room: &str,
        event: &Outbound,
        exclude: Option<ConnectionId>,
    ) -> Result<()> {
        let frame = encode(event)?;
        let n = self.deliver_local(room, &frame, exclude);
        debug!(room, event = event.name(), receivers = n, "broadcast");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::UserRef;

    #[tokio::test]
    async fn broadcast_respects_room_and_exclusion() {
        let conns = Connections::new();
        let (a, mut ra) = outlet();
        let (b, mut rb) = outlet();
        let (c, mut rc) = outlet();
        let (ida, idb, idc) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());
        conns.register("R1", ida, a);
        conns.register("R1", idb, b);
        conns.register("R2", idc, c);

        let ev = Outbound::UserLeft(UserRef {
            user_id: "7".into(),
        });
        conns.broadcast("R1", &ev, Some(ida)).await.unwrap();
        assert!(ra.try_recv().is_err());
        assert!(rb.try_recv().unwrap().contains("userLeft"));
        assert!(rc.try_recv().is_err());
    }

    #[test]
    fn unicast_and_unregister() {
        let conns = Connections::new();
        let (a, mut ra) = outlet();
        let id = ConnectionId::new();
        conns.register("R1", id, a);
        assert!(conns.send_to(id, &Outbound::error("nope")).unwrap());
        assert!(ra.try_recv().unwrap().contains("nope"));

        assert!(conns.unregister(id));
        assert!(!conns.unregister(id));
        assert!(conns.is_empty());
        assert!(!conns.send_to(id, &Outbound::error("gone")).unwrap());
    }

    #[tokio::test]
    async fn full_outlet_drops_frames_for_that_socket_only() {
        let conns = Connections::new();
        let (stalled, mut stalled_rx) = mpsc::channel(2);
        let (live, mut live_rx) = outlet();
        conns.register("R", ConnectionId::new(), stalled);
        conns.register("R", ConnectionId::new(), live);

        let ev = Outbound::error("tick");
        for _ in 0..5 {
            conns.broadcast("R", &ev, None).await.unwrap();
        }
        let mut stalled_got = 0;
        while stalled_rx.try_recv().is_ok() {
            stalled_got += 1;
        }
        let mut live_got = 0;
        while live_rx.try_recv().is_ok() {
            live_got += 1;
        }
        assert_eq!(stalled_got, 2);
        assert_eq!(live_got, 5);
    }
}
