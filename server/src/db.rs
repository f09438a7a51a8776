use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;

/// Open a SQLite database and run migrations.
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  is_online INTEGER NOT NULL DEFAULT 0,
  last_seen INTEGER
);

CREATE TABLE IF NOT EXISTS group_members (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  group_id TEXT NOT NULL,
  name TEXT NOT NULL,
  user_id INTEGER,
  is_admin INTEGER NOT NULL DEFAULT 0,
  is_owner INTEGER NOT NULL DEFAULT 0,
  is_muted INTEGER NOT NULL DEFAULT 0,
  is_banned INTEGER NOT NULL DEFAULT 0,
  joined_at INTEGER NOT NULL,
  UNIQUE(group_id, name)
);
CREATE INDEX IF NOT EXISTS group_members_user ON group_members(group_id, user_id);

CREATE TABLE IF NOT EXISTS messages (
  id TEXT PRIMARY KEY,
  group_id TEXT NOT NULL,
  name TEXT NOT NULL,
  user_id INTEGER,
  message TEXT,
  is_encrypted INTEGER NOT NULL DEFAULT 0,
  encrypted_content TEXT,
  key_version INTEGER,
  parent_message_id TEXT,
  forwarded_from TEXT,
  created_at INTEGER NOT NULL,
  edited_at INTEGER,
  deleted_at INTEGER
);
CREATE INDEX IF NOT EXISTS messages_group ON messages(group_id, created_at);
CREATE INDEX IF NOT EXISTS messages_parent ON messages(parent_message_id);

CREATE TABLE IF NOT EXISTS message_reactions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  message_id TEXT NOT NULL,
  user_name TEXT NOT NULL,
  user_id INTEGER,
  emoji TEXT NOT NULL,
  created_at INTEGER NOT NULL,
  UNIQUE(message_id, user_name, emoji)
);

CREATE TABLE IF NOT EXISTS message_reads (
  message_id TEXT NOT NULL,
  user_name TEXT NOT NULL,
  user_id INTEGER,
  read_at INTEGER NOT NULL,
  PRIMARY KEY (message_id, user_name)
);

CREATE TABLE IF NOT EXISTS pinned_messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  message_id TEXT NOT NULL,
  group_id TEXT NOT NULL,
  pinned_by TEXT NOT NULL,
  pinned_at INTEGER NOT NULL,
  UNIQUE(message_id, group_id)
);
"#;
