//! The persistence collaborator consumed by the realtime core.
//!
//! [`Store`] is the abstract interface; [`SqliteStore`] implements it on a
//! pooled SQLite database, moving every blocking call onto the blocking pool.

use crate::model::{
    ChatMessage, MembershipRecord, MessagePatch, NewMessage, NewPin, NewReaction,
    NewReadReceipt, PinnedMessage, Reaction,
};
use crate::{db, members, messages, reactions, reads};
use anyhow::Result;
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_message(&self, new: NewMessage) -> Result<ChatMessage>;
    async fn update_message(&self, id: &str, patch: MessagePatch) -> Result<ChatMessage>;
    async fn soft_delete_message(&self, id: &str) -> Result<()>;
    /// Soft-deleted messages are returned too.
    async fn find_message(&self, id: &str) -> Result<Option<ChatMessage>>;
    /// Normal room-history read: newest `limit` live messages, oldest first.
    async fn list_messages(&self, room_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;
    async fn list_thread(&self, parent_id: &str) -> Result<Vec<ChatMessage>>;
    /// The subset of `ids` that are messages of the room.
    async fn messages_in_room(&self, room_id: &str, ids: Vec<String>) -> Result<Vec<String>>;
    async fn find_membership(
        &self,
        room_id: &str,
        name: &str,
        user_id: Option<i64>,
    ) -> Result<Option<MembershipRecord>>;
    async fn upsert_reaction(&self, new: NewReaction) -> Result<Reaction>;
    async fn delete_reaction(&self, message_id: &str, user_name: &str, emoji: &str) -> Result<bool>;
    async fn create_read_receipts(&self, receipts: Vec<NewReadReceipt>) -> Result<usize>;
    async fn create_pinned(&self, new: NewPin) -> Result<PinnedMessage>;
    async fn delete_pinned_by_message(&self, message_id: &str, room_id: &str) -> Result<usize>;
    async fn set_user_online(&self, user_id: i64, online: bool, at: Option<i64>) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (and migrate) a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(dir) = path.as_ref().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.busy_timeout(std::time::Duration::from_secs(5)));
        let pool = Pool::new(manager)?;
        pool.get()?.execute_batch(db::SCHEMA)?;
        Ok(Self { pool })
    }

    /// A private in-memory database. The pool holds exactly one connection
    /// that is never recycled, otherwise the data would vanish with it.
    pub fn open_in_memory() -> Result<Self> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory())?;
        pool.get()?.execute_batch(db::SCHEMA)?;
        Ok(Self { pool })
    }

    pub async fn upsert_member(&self, record: MembershipRecord) -> Result<()> {
        self.run(move |conn| members::upsert_member(conn, &record)).await
    }

    pub async fn upsert_user(&self, user_id: i64, name: &str) -> Result<()> {
        let name = name.to_string();
        self.run(move |conn| members::upsert_user(conn, user_id, &name))
            .await
    }

    /// Run a closure against a pooled connection on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_message(&self, new: NewMessage) -> Result<ChatMessage> {
        self.run(move |conn| messages::create_message(conn, &new)).await
    }

    async fn update_message(&self, id: &str, patch: MessagePatch) -> Result<ChatMessage> {
        let id = id.to_string();
        self.run(move |conn| messages::update_message(conn, &id, &patch))
            .await
    }

    async fn soft_delete_message(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run(move |conn| messages::soft_delete_message(conn, &id))
            .await
    }

    async fn find_message(&self, id: &str) -> Result<Option<ChatMessage>> {
        let id = id.to_string();
        self.run(move |conn| messages::find_message(conn, &id)).await
    }

    async fn list_messages(&self, room_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let room_id = room_id.to_string();
        self.run(move |conn| messages::list_messages(conn, &room_id, limit))
            .await
    }

    async fn list_thread(&self, parent_id: &str) -> Result<Vec<ChatMessage>> {
        let parent_id = parent_id.to_string();
        self.run(move |conn| messages::list_thread(conn, &parent_id))
            .await
    }

    async fn messages_in_room(&self, room_id: &str, ids: Vec<String>) -> Result<Vec<String>> {
        let room_id = room_id.to_string();
        self.run(move |conn| messages::ids_in_group(conn, &room_id, &ids))
            .await
    }

    async fn find_membership(
        &self,
        room_id: &str,
        name: &str,
        user_id: Option<i64>,
    ) -> Result<Option<MembershipRecord>> {
        let (room_id, name) = (room_id.to_string(), name.to_string());
        self.run(move |conn| members::find_membership(conn, &room_id, &name, user_id))
            .await
    }

    async fn upsert_reaction(&self, new: NewReaction) -> Result<Reaction> {
        self.run(move |conn| reactions::upsert_reaction(conn, &new))
            .await
    }

    async fn delete_reaction(&self, message_id: &str, user_name: &str, emoji: &str) -> Result<bool> {
        let (message_id, user_name, emoji) =
            (message_id.to_string(), user_name.to_string(), emoji.to_string());
        self.run(move |conn| reactions::delete_reaction(conn, &message_id, &user_name, &emoji))
            .await
    }

    async fn create_read_receipts(&self, receipts: Vec<NewReadReceipt>) -> Result<usize> {
        self.run(move |conn| reads::create_read_receipts(conn, &receipts))
            .await
    }

    async fn create_pinned(&self, new: NewPin) -> Result<PinnedMessage> {
        self.run(move |conn| reactions::create_pinned(conn, &new))
            .await
    }

    async fn delete_pinned_by_message(&self, message_id: &str, room_id: &str) -> Result<usize> {
        let (message_id, room_id) = (message_id.to_string(), room_id.to_string());
        self.run(move |conn| reactions::delete_pinned_by_message(conn, &message_id, &room_id))
            .await
    }

    async fn set_user_online(&self, user_id: i64, online: bool, at: Option<i64>) -> Result<()> {
        self.run(move |conn| members::set_user_online(conn, user_id, online, at))
            .await
    }
}
