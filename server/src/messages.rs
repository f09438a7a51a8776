use crate::model::{now_ms, ChatMessage, MessagePatch, NewMessage};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

const COLUMNS: &str = "id, group_id, name, user_id, message, is_encrypted, encrypted_content, key_version, parent_message_id, forwarded_from, created_at, edited_at, deleted_at";

/// Persist a new message. Plain messages need a non-blank body, encrypted ones
/// need a ciphertext blob.
pub fn create_message(conn: &Connection, new: &NewMessage) -> Result<ChatMessage> {
    let has_body = new.message.as_deref().is_some_and(|m| !m.trim().is_empty());
    let has_blob = new
        .encrypted_content
        .as_deref()
        .is_some_and(|c| !c.is_empty());
    if (new.is_encrypted && !has_blob) || (!new.is_encrypted && !has_body) {
        anyhow::bail!("empty_message");
    }
    let id = Uuid::new_v4().to_string();
    let now = now_ms();
    conn.execute(
        "INSERT INTO messages (id, group_id, name, user_id, message, is_encrypted, encrypted_content, key_version, parent_message_id, forwarded_from, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            new.group_id,
            new.name,
            new.user_id,
            new.message,
            new.is_encrypted,
            new.encrypted_content,
            new.key_version,
            new.parent_message_id,
            new.forwarded_from,
            now
        ],
    )?;
    Ok(ChatMessage {
        id,
        group_id: new.group_id.clone(),
        name: new.name.clone(),
        user_id: new.user_id,
        message: new.message.clone(),
        is_encrypted: new.is_encrypted,
        encrypted_content: new.encrypted_content.clone(),
        key_version: new.key_version,
        parent_message_id: new.parent_message_id.clone(),
        forwarded_from: new.forwarded_from.clone(),
        created_at: now,
        edited_at: None,
        deleted_at: None,
    })
}

fn row_to_msg(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        group_id: row.get(1)?,
        name: row.get(2)?,
        user_id: row.get(3)?,
        message: row.get(4)?,
        is_encrypted: row.get(5)?,
        encrypted_content: row.get(6)?,
        key_version: row.get(7)?,
        parent_message_id: row.get(8)?,
        forwarded_from: row.get(9)?,
        created_at: row.get(10)?,
        edited_at: row.get(11)?,
        deleted_at: row.get(12)?,
    })
}

/// Fetch a message by id, soft-deleted ones included.
pub fn find_message(conn: &Connection, id: &str) -> Result<Option<ChatMessage>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"))?;
    let msg = stmt.query_row([id], row_to_msg).optional()?;
    Ok(msg)
}

pub fn update_message(conn: &Connection, id: &str, patch: &MessagePatch) -> Result<ChatMessage> {
    if patch
        .message
        .as_deref()
        .is_some_and(|m| m.trim().is_empty())
    {
        anyhow::bail!("empty_message");
    }
    let changed = conn.execute(
        "UPDATE messages SET message = COALESCE(?2, message), encrypted_content = COALESCE(?3, encrypted_content), \
         key_version = COALESCE(?4, key_version), edited_at = ?5 WHERE id = ?1 AND deleted_at IS NULL",
        params![id, patch.message, patch.encrypted_content, patch.key_version, now_ms()],
    )?;
    if changed == 0 {
        anyhow::bail!("not_found");
    }
    find_message(conn, id)?.ok_or_else(|| anyhow::anyhow!("not_found"))
}

/// Mark a message deleted and clear its content. The row stays.
pub fn soft_delete_message(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE messages SET deleted_at = ?2, message = NULL, encrypted_content = NULL WHERE id = ?1 AND deleted_at IS NULL",
        params![id, now_ms()],
    )?;
    if changed == 0 {
        anyhow::bail!("not_found");
    }
    Ok(())
}

/// Most recent `limit` live messages of a room, oldest first.
pub fn list_messages(conn: &Connection, group_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
    let limit = limit.min(200);
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM messages WHERE group_id = ?1 AND deleted_at IS NULL ORDER BY created_at DESC, rowid DESC LIMIT ?2"
    ))?;
    let mut msgs = stmt
        .query_map(params![group_id, limit as i64], row_to_msg)?
        .collect::<Result<Vec<_>, _>>()?;
    msgs.reverse();
    Ok(msgs)
}

/// Live replies to a thread root, oldest first.
pub fn list_thread(conn: &Connection, parent_id: &str) -> Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM messages WHERE parent_message_id = ?1 AND deleted_at IS NULL ORDER BY created_at, rowid"
    ))?;
    let msgs = stmt
        .query_map([parent_id], row_to_msg)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(msgs)
}

/// The subset of `ids` that belong to a group, in input order.
pub fn ids_in_group(conn: &Connection, group_id: &str, ids: &[String]) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT 1 FROM messages WHERE id = ?1 AND group_id = ?2")?;
    let mut found = Vec::with_capacity(ids.len());
    for id in ids {
        if stmt.exists(params![id, group_id])? {
            found.push(id.clone());
        }
    }
    Ok(found)
}
