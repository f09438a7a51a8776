//! One room session per live connection.
//!
//! A session is created by the gateway after a successful handshake, bound
//! to exactly one room, and driven one inbound event at a time. Every
//! failure of an event is reported to the acting connection as `error` and
//! the session carries on.

use crate::config::{MembershipPolicy, TypingPayloadMode};
use crate::error::SessionError;
use crate::fanout::{encode, offer, Outlet};
use crate::guard;
use crate::hub::Hub;
use crate::identity::{ConnectionId, Identity, Principal, RoomId};
use crate::model::{
    now_ms, ChatMessage, MembershipRecord, MessagePatch, NewMessage, NewPin, NewReaction,
    NewReadReceipt,
};
use huddle_protocol::{
    DeleteMessage, EditMessage, ForwardAck, ForwardMessage, Inbound, KickNotice, KickUser,
    MarkAsRead, MentionNotice, MentionUser, MessageRef, Outbound, PinMessage, ProtocolError,
    ReactionRef, ReactionRequest, ReadNotice, SendMessage, TypingPayload, UnpinMessage,
    UnpinNotice, UserOnline, UserRef, UserRemoved,
};
use std::future::Future;
use tracing::{debug, info, warn};

const DEFAULT_KICK_REASON: &str = "You have been removed from this group";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Bound,
    Closed,
}

pub struct RoomSession {
    hub: Hub,
    room: RoomId,
    principal: Principal,
    state: SessionState,
    outlet: Option<Outlet>,
}

impl RoomSession {
    pub fn new(hub: Hub, room: RoomId, principal: Principal) -> Self {
        Self {
            hub,
            room,
            principal,
            state: SessionState::Connecting,
            outlet: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn connection_id(&self) -> ConnectionId {
        self.principal.connection_id
    }

    /// Attach the socket outlet, register presence and announce the arrival.
    pub async fn bind(&mut self, outlet: Outlet) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.hub
            .connections
            .register(&self.room, self.connection_id(), outlet.clone());
        self.outlet = Some(outlet);
        self.state = SessionState::Bound;

        let joined = self.hub.presence.join(&self.room, &self.principal);
        info!(
            room = %self.room,
            connection = %self.connection_id(),
            name = %self.principal.display_name,
            replaced = ?joined.replaced,
            "session bound"
        );
        self.broadcast(Outbound::ActiveUsers(joined.roster), None).await;
        self.broadcast(
            Outbound::UserOnline(UserOnline {
                user_id: self.principal.identity().to_string(),
                name: self.principal.display_name.clone(),
            }),
            None,
        )
        .await;
        if joined.came_online {
            record_online(&self.hub, &self.principal, true).await;
        }
    }

    /// Decode and handle one text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match Inbound::parse(text) {
            Ok(event) => self.handle(event).await,
            Err(ProtocolError::UnknownEvent(name)) => {
                debug!(connection = %self.connection_id(), event = %name, "ignoring unknown event");
            }
            Err(ProtocolError::Payload { event, source }) => {
                debug!(connection = %self.connection_id(), %event, error = %source, "malformed payload");
                self.reply(&Outbound::error(format!("Invalid payload for {event}")));
            }
            Err(e) => {
                debug!(connection = %self.connection_id(), error = %e, "malformed frame");
                self.reply(&Outbound::error("Malformed frame"));
            }
        }
    }

    /// Handle one inbound event. Ignored unless the session is bound.
    pub async fn handle(&mut self, event: Inbound) {
        if self.state != SessionState::Bound {
            return;
        }
        let name = event.name();
        debug!(room = %self.room, connection = %self.connection_id(), event = name, "dispatch");
        let result = match event {
            Inbound::Message(p) => self.on_message(p).await,
            Inbound::EditMessage(p) => self.on_edit(p).await,
            Inbound::DeleteMessage(p) => self.on_delete(p).await,
            Inbound::AddReaction(p) => self.on_add_reaction(p).await,
            Inbound::RemoveReaction(p) => self.on_remove_reaction(p).await,
            Inbound::MarkAsRead(p) => self.on_mark_read(p).await,
            Inbound::PinMessage(p) => self.on_pin(p).await,
            Inbound::UnpinMessage(p) => self.on_unpin(p).await,
            Inbound::ForwardMessage(p) => self.on_forward(p).await,
            Inbound::MentionUser(p) => self.on_mention(p),
            Inbound::KickUser(p) => self.on_kick(p).await,
            Inbound::Typing(_) => self.on_typing().await,
            Inbound::StopTyping(_) => self.on_stop_typing().await,
            Inbound::GetUsers => {
                let roster = self.hub.presence.roster(&self.room);
                self.reply(&Outbound::ActiveUsers(roster));
                Ok(())
            }
            Inbound::GetOnlineUsers => {
                let online = self.hub.presence.online();
                self.reply(&Outbound::OnlineUsers(online));
                Ok(())
            }
        };
        if let Err(err) = result {
            match &err {
                SessionError::Persistence { source, .. } => {
                    warn!(room = %self.room, event = name, error = %source, "event failed");
                }
                other => {
                    debug!(room = %self.room, event = name, reason = %other, "event rejected");
                }
            }
            self.reply(&Outbound::error(err.to_string()));
        }
    }

    /// Deregister and announce the departure. Safe to call more than once.
    pub async fn close(&mut self) {
        let was_bound = self.state == SessionState::Bound;
        self.state = SessionState::Closed;
        self.outlet = None;
        if was_bound {
            teardown(&self.hub, &self.room, &self.principal).await;
        }
    }

    async fn on_message(&self, p: SendMessage) -> Result<(), SessionError> {
        self.require_member(&self.room).await?;
        let body = p.body.filter(|b| !b.trim().is_empty());
        let blob = p.encrypted_content.filter(|c| !c.is_empty());
        if (p.is_encrypted && blob.is_none()) || (!p.is_encrypted && body.is_none()) {
            return Err(SessionError::EmptyMessage);
        }
        let new = NewMessage {
            group_id: self.room.clone(),
            name: self.principal.display_name.clone(),
            user_id: self.principal.stable_user_id,
            message: body,
            is_encrypted: p.is_encrypted,
            encrypted_content: if p.is_encrypted { blob } else { None },
            key_version: if p.is_encrypted { p.key_version } else { None },
            parent_message_id: p.parent_message_id,
            forwarded_from: None,
        };
        let msg = self
            .persist("send message", self.hub.store.create_message(new))
            .await?;
        self.broadcast(Outbound::Message(msg), Some(self.connection_id()))
            .await;
        Ok(())
    }

    async fn on_edit(&self, p: EditMessage) -> Result<(), SessionError> {
        self.require_member(&self.room).await?;
        let msg = self.live_message(&p.id).await?;
        if !self.is_author(&msg) {
            return Err(SessionError::NotAuthor("edit"));
        }
        if p.message.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let patch = MessagePatch {
            message: Some(p.message),
            ..Default::default()
        };
        let edited = self
            .persist("edit message", self.hub.store.update_message(&p.id, patch))
            .await?;
        self.broadcast(Outbound::MessageEdited(edited), None).await;
        Ok(())
    }

    async fn on_delete(&self, p: DeleteMessage) -> Result<(), SessionError> {
        self.require_member(&self.room).await?;
        let msg = self.live_message(&p.id).await?;
        if !self.is_author(&msg) {
            return Err(SessionError::NotAuthor("delete"));
        }
        self.persist("delete message", self.hub.store.soft_delete_message(&p.id))
            .await?;
        self.broadcast(Outbound::MessageDeleted(MessageRef { id: p.id }), None)
            .await;
        Ok(())
    }

    async fn on_add_reaction(&self, p: ReactionRequest) -> Result<(), SessionError> {
        self.require_member(&self.room).await?;
        self.live_message(&p.message_id).await?;
        let new = NewReaction {
            message_id: p.message_id,
            user_name: self.principal.display_name.clone(),
            user_id: self.principal.stable_user_id,
            emoji: p.emoji,
        };
        let reaction = self
            .persist("add reaction", self.hub.store.upsert_reaction(new))
            .await?;
        self.broadcast(Outbound::ReactionAdded(reaction), None).await;
        Ok(())
    }

    async fn on_remove_reaction(&self, p: ReactionRequest) -> Result<(), SessionError> {
        self.require_member_by_policy().await?;
        let user_name = self.principal.display_name.clone();
        let removed = self
            .persist(
                "remove reaction",
                self.hub
                    .store
                    .delete_reaction(&p.message_id, &user_name, &p.emoji),
            )
            .await?;
        if !removed {
            debug!(message = %p.message_id, emoji = %p.emoji, "no reaction to remove");
        }
        self.broadcast(
            Outbound::ReactionRemoved(ReactionRef {
                message_id: p.message_id,
                emoji: p.emoji,
                user_name,
            }),
            None,
        )
        .await;
        Ok(())
    }

    async fn on_mark_read(&self, p: MarkAsRead) -> Result<(), SessionError> {
        self.require_member_by_policy().await?;
        if p.message_ids.is_empty() {
            return Ok(());
        }
        let message_ids = self
            .persist(
                "mark messages as read",
                self.hub.store.messages_in_room(&self.room, p.message_ids),
            )
            .await?;
        if message_ids.is_empty() {
            return Ok(());
        }
        let read_at = now_ms();
        let receipts = message_ids
            .iter()
            .map(|id| NewReadReceipt {
                message_id: id.clone(),
                user_name: self.principal.display_name.clone(),
                user_id: self.principal.stable_user_id,
                read_at,
            })
            .collect();
        self.persist(
            "mark messages as read",
            self.hub.store.create_read_receipts(receipts),
        )
        .await?;
        self.broadcast(
            Outbound::MessagesRead(ReadNotice {
                message_ids,
                user_id: self.principal.stable_user_id,
                user_name: self.principal.display_name.clone(),
                read_at,
            }),
            None,
        )
        .await;
        Ok(())
    }

    async fn on_pin(&self, p: PinMessage) -> Result<(), SessionError> {
        self.require_member(&self.room).await?;
        self.live_message(&p.message_id).await?;
        let new = NewPin {
            message_id: p.message_id,
            group_id: self.room.clone(),
            pinned_by: self.principal.display_name.clone(),
        };
        let pinned = self
            .persist("pin message", self.hub.store.create_pinned(new))
            .await?;
        self.broadcast(Outbound::MessagePinned(pinned), None).await;
        Ok(())
    }

    async fn on_unpin(&self, p: UnpinMessage) -> Result<(), SessionError> {
        self.require_member_by_policy().await?;
        // deleted messages can still be unpinned
        self.persist("load message", self.hub.store.find_message(&p.message_id))
            .await?
            .filter(|m| m.group_id == self.room)
            .ok_or(SessionError::MessageNotFound)?;
        self.persist(
            "unpin message",
            self.hub
                .store
                .delete_pinned_by_message(&p.message_id, &self.room),
        )
        .await?;
        self.broadcast(
            Outbound::MessageUnpinned(UnpinNotice {
                message_id: p.message_id,
            }),
            None,
        )
        .await;
        Ok(())
    }

    async fn on_forward(&self, p: ForwardMessage) -> Result<(), SessionError> {
        self.require_member(&p.target_group_id).await?;
        let original = self
            .persist(
                "forward message",
                self.hub.store.find_message(&p.original_message_id),
            )
            .await?
            .filter(|m| m.deleted_at.is_none())
            .ok_or(SessionError::MessageNotFound)?;
        let new = NewMessage {
            group_id: p.target_group_id.clone(),
            name: self.principal.display_name.clone(),
            user_id: self.principal.stable_user_id,
            message: original.message,
            is_encrypted: original.is_encrypted,
            encrypted_content: original.encrypted_content,
            key_version: original.key_version,
            parent_message_id: None,
            forwarded_from: Some(original.id),
        };
        let copy = self
            .persist("forward message", self.hub.store.create_message(new))
            .await?;
        self.broadcast_to(
            &p.target_group_id,
            Outbound::Message(copy.clone()),
            Some(self.connection_id()),
        )
        .await;
        self.reply(&Outbound::MessageForwarded(ForwardAck {
            original_message_id: p.original_message_id,
            target_group_id: p.target_group_id,
            message: copy,
        }));
        Ok(())
    }

    fn on_mention(&self, p: MentionUser) -> Result<(), SessionError> {
        let notice = Outbound::Mentioned(MentionNotice {
            message_id: p.message_id,
            group_id: self.room.clone(),
            sender_name: self.principal.display_name.clone(),
        });
        for identity in p.mentioned_user_ids.iter().filter_map(Identity::from_wire) {
            for conn in self.hub.presence.connections_of(identity) {
                if conn.connection_id == self.connection_id() {
                    continue;
                }
                self.unicast(conn.connection_id, &notice);
            }
        }
        Ok(())
    }

    async fn on_kick(&self, p: KickUser) -> Result<(), SessionError> {
        self.require_member_by_policy().await?;
        let target = p.user_id.as_ref().and_then(Identity::from_wire);
        if let Some(identity) = target {
            let notice = Outbound::Kicked(KickNotice {
                reason: p
                    .reason
                    .clone()
                    .unwrap_or_else(|| DEFAULT_KICK_REASON.to_string()),
                group_id: self.room.clone(),
            });
            for conn in self.hub.presence.connections_of(identity) {
                if conn.room == self.room {
                    self.unicast(conn.connection_id, &notice);
                }
            }
        }
        info!(room = %self.room, kicked = ?target, by = %self.principal.display_name, "user kicked");
        self.broadcast(
            Outbound::UserRemoved(UserRemoved {
                user_id: p.user_id.map(|id| id.to_string()).unwrap_or_default(),
                user_name: p.user_name.unwrap_or_default(),
            }),
            None,
        )
        .await;
        Ok(())
    }

    async fn on_typing(&self) -> Result<(), SessionError> {
        let name = self.principal.display_name.clone();
        let names = self
            .hub
            .presence
            .typing_start(&self.room, self.principal.identity(), &name);
        let payload = match self.hub.settings.typing_payload {
            TypingPayloadMode::Legacy => TypingPayload::One(name),
            TypingPayloadMode::Roster => TypingPayload::Many(names),
        };
        self.broadcast(Outbound::Typing(payload), None).await;
        Ok(())
    }

    async fn on_stop_typing(&self) -> Result<(), SessionError> {
        let names = self
            .hub
            .presence
            .typing_stop(&self.room, self.principal.identity());
        self.broadcast(Outbound::Typing(TypingPayload::Many(names)), None)
            .await;
        Ok(())
    }

    async fn require_member(&self, room: &str) -> Result<MembershipRecord, SessionError> {
        let record = guard::check(
            &*self.hub.store,
            room,
            &self.principal.display_name,
            self.principal.stable_user_id,
            self.hub.settings.store_timeout,
        )
        .await?;
        Ok(record)
    }

    /// Membership check for the events the compatible policy leaves open.
    async fn require_member_by_policy(&self) -> Result<(), SessionError> {
        match self.hub.settings.membership_policy {
            MembershipPolicy::Strict => self.require_member(&self.room).await.map(|_| ()),
            MembershipPolicy::Compatible => Ok(()),
        }
    }

    /// A message of this room that has not been deleted.
    async fn live_message(&self, id: &str) -> Result<ChatMessage, SessionError> {
        self.persist("load message", self.hub.store.find_message(id))
            .await?
            .filter(|m| m.deleted_at.is_none() && m.group_id == self.room)
            .ok_or(SessionError::MessageNotFound)
    }

    fn is_author(&self, msg: &ChatMessage) -> bool {
        match (msg.user_id, self.principal.stable_user_id) {
            (Some(author), Some(me)) => author == me,
            _ => msg.name == self.principal.display_name,
        }
    }

    async fn persist<T>(
        &self,
        action: &'static str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, SessionError> {
        match tokio::time::timeout(self.hub.settings.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SessionError::persistence(action, e)),
            Err(_) => Err(SessionError::persistence(
                action,
                anyhow::anyhow!("store_timeout"),
            )),
        }
    }

    async fn broadcast(&self, event: Outbound, exclude: Option<ConnectionId>) {
        broadcast(&self.hub, &self.room, &event, exclude).await;
    }

    async fn broadcast_to(&self, room: &str, event: Outbound, exclude: Option<ConnectionId>) {
        broadcast(&self.hub, room, &event, exclude).await;
    }

    /// Send to this connection only.
    fn reply(&self, event: &Outbound) {
        let Some(outlet) = &self.outlet else {
            return;
        };
        match encode(event) {
            Ok(frame) => {
                offer(self.connection_id(), outlet, frame);
            }
            Err(e) => warn!(event = event.name(), error = %e, "failed to encode reply"),
        }
    }

    fn unicast(&self, target: ConnectionId, event: &Outbound) {
        match self.hub.connections.send_to(target, event) {
            Ok(true) => {}
            Ok(false) => debug!(%target, event = event.name(), "target not connected"),
            Err(e) => warn!(%target, event = event.name(), error = %e, "unicast failed"),
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if self.state != SessionState::Bound {
            return;
        }
        self.state = SessionState::Closed;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let hub = self.hub.clone();
            let room = self.room.clone();
            let principal = self.principal.clone();
            handle.spawn(async move { teardown(&hub, &room, &principal).await });
        }
    }
}

async fn teardown(hub: &Hub, room: &str, principal: &Principal) {
    hub.connections.unregister(principal.connection_id);
    let left = hub.presence.leave(room, principal);
    let identity = principal.identity().to_string();
    info!(
        room,
        connection = %principal.connection_id,
        name = %principal.display_name,
        offline = left.went_offline,
        "session closed"
    );
    if let Some(roster) = left.roster {
        let user_left = Outbound::UserLeft(UserRef {
            user_id: identity.clone(),
        });
        broadcast(hub, room, &user_left, None).await;
        broadcast(hub, room, &Outbound::ActiveUsers(roster), None).await;
        if let Some(names) = left.typing {
            broadcast(hub, room, &Outbound::Typing(TypingPayload::Many(names)), None).await;
        }
    }
    if left.went_offline {
        let offline = Outbound::UserOffline(UserRef { user_id: identity });
        broadcast(hub, room, &offline, None).await;
        record_online(hub, principal, false).await;
    }
}

async fn broadcast(hub: &Hub, room: &str, event: &Outbound, exclude: Option<ConnectionId>) {
    if let Err(e) = hub.fanout.broadcast(room, event, exclude).await {
        warn!(room, event = event.name(), error = %e, "broadcast failed");
    }
}

/// Best-effort durable online flag for registered users.
async fn record_online(hub: &Hub, principal: &Principal, online: bool) {
    let Some(user_id) = principal.stable_user_id else {
        return;
    };
    let call = hub.store.set_user_online(user_id, online, Some(now_ms()));
    match tokio::time::timeout(hub.settings.store_timeout, call).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(user_id, online, error = %e, "online status not recorded"),
        Err(_) => warn!(user_id, online, "online status write timed out"),
    }
}
