use crate::model::{now_ms, NewReaction, NewPin, PinnedMessage, Reaction};
use anyhow::Result;
use rusqlite::{params, Connection};

/// Add a reaction. Re-adding the same (message, user, emoji) triple returns
/// the existing row.
pub fn upsert_reaction(conn: &Connection, new: &NewReaction) -> Result<Reaction> {
    conn.execute(
        "INSERT INTO message_reactions (message_id, user_name, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(message_id, user_name, emoji) DO NOTHING",
        params![new.message_id, new.user_name, new.user_id, new.emoji, now_ms()],
    )?;
    let reaction = conn.query_row(
        "SELECT id, message_id, user_name, user_id, emoji, created_at FROM message_reactions \
         WHERE message_id = ?1 AND user_name = ?2 AND emoji = ?3",
        params![new.message_id, new.user_name, new.emoji],
        row_to_reaction,
    )?;
    Ok(reaction)
}

/// Returns false when there was nothing to remove.
pub fn delete_reaction(conn: &Connection, message_id: &str, user_name: &str, emoji: &str) -> Result<bool> {
    let removed = conn.execute(
        "DELETE FROM message_reactions WHERE message_id = ?1 AND user_name = ?2 AND emoji = ?3",
        params![message_id, user_name, emoji],
    )?;
    Ok(removed > 0)
}

pub fn reactions_for(conn: &Connection, message_id: &str) -> Result<Vec<Reaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, message_id, user_name, user_id, emoji, created_at FROM message_reactions WHERE message_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([message_id], row_to_reaction)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_reaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        id: row.get(0)?,
        message_id: row.get(1)?,
        user_name: row.get(2)?,
        user_id: row.get(3)?,
        emoji: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Pin a message in a group. A message can be pinned once per group.
pub fn create_pinned(conn: &Connection, new: &NewPin) -> Result<PinnedMessage> {
    let now = now_ms();
    conn.execute(
        "INSERT INTO pinned_messages (message_id, group_id, pinned_by, pinned_at) VALUES (?1, ?2, ?3, ?4)",
        params![new.message_id, new.group_id, new.pinned_by, now],
    )?;
    Ok(PinnedMessage {
        id: conn.last_insert_rowid(),
        message_id: new.message_id.clone(),
        group_id: new.group_id.clone(),
        pinned_by: new.pinned_by.clone(),
        pinned_at: now,
    })
}

/// Remove the pin of a message in one group.
pub fn delete_pinned_by_message(conn: &Connection, message_id: &str, group_id: &str) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM pinned_messages WHERE message_id = ?1 AND group_id = ?2",
        params![message_id, group_id],
    )?;
    Ok(removed)
}
