use crate::model::{now_ms, MembershipRecord};
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Find a membership row in a room by display name or numeric user id.
/// When both keys match different rows the user id match wins.
pub fn find_membership(
    conn: &Connection,
    room_id: &str,
    name: &str,
    user_id: Option<i64>,
) -> Result<Option<MembershipRecord>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, name, user_id, is_admin, is_owner, is_muted, is_banned FROM group_members \
         WHERE group_id = ?1 AND (name = ?2 OR (?3 IS NOT NULL AND user_id = ?3)) \
         ORDER BY (user_id IS NOT NULL AND user_id = ?3) DESC LIMIT 1",
    )?;
    let record = stmt
        .query_row(params![room_id, name, user_id], |row| {
            Ok(MembershipRecord {
                room_id: row.get(0)?,
                name: row.get(1)?,
                user_id: row.get(2)?,
                is_admin: row.get(3)?,
                is_owner: row.get(4)?,
                is_muted: row.get(5)?,
                is_banned: row.get(6)?,
            })
        })
        .optional()?;
    Ok(record)
}

/// Insert or replace the membership row keyed by (room, name).
pub fn upsert_member(conn: &Connection, record: &MembershipRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO group_members (group_id, name, user_id, is_admin, is_owner, is_muted, is_banned, joined_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(group_id, name) DO UPDATE SET user_id = excluded.user_id, is_admin = excluded.is_admin, \
         is_owner = excluded.is_owner, is_muted = excluded.is_muted, is_banned = excluded.is_banned",
        params![
            record.room_id,
            record.name,
            record.user_id,
            record.is_admin,
            record.is_owner,
            record.is_muted,
            record.is_banned,
            now_ms()
        ],
    )?;
    Ok(())
}

pub fn upsert_user(conn: &Connection, user_id: i64, name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, name) VALUES (?1, ?2) ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        params![user_id, name],
    )?;
    Ok(())
}

/// Record a user's online flag and last-seen time. Unknown ids are an error.
pub fn set_user_online(conn: &Connection, user_id: i64, online: bool, at: Option<i64>) -> Result<()> {
    let changed = conn.execute(
        "UPDATE users SET is_online = ?2, last_seen = ?3 WHERE id = ?1",
        params![user_id, online, at.unwrap_or_else(now_ms)],
    )?;
    if changed == 0 {
        anyhow::bail!("unknown_user");
    }
    Ok(())
}

/// `(is_online, last_seen)` for a user, if known.
pub fn user_status(conn: &Connection, user_id: i64) -> Result<Option<(bool, Option<i64>)>> {
    let status = conn
        .query_row(
            "SELECT is_online, last_seen FROM users WHERE id = ?1",
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn lookup_by_name_or_id() {
        let conn = db::init_db(":memory:").unwrap();
        upsert_member(&conn, &MembershipRecord::member("R1", "Alice", Some(7))).unwrap();
        upsert_member(&conn, &MembershipRecord::member("R1", "Guest-ab12c", None)).unwrap();

        let by_id = find_membership(&conn, "R1", "renamed", Some(7)).unwrap().unwrap();
        assert_eq!(by_id.name, "Alice");
        let by_name = find_membership(&conn, "R1", "Guest-ab12c", None).unwrap().unwrap();
        assert_eq!(by_name.user_id, None);
        assert!(find_membership(&conn, "R2", "Alice", Some(7)).unwrap().is_none());
        assert!(find_membership(&conn, "R1", "Mallory", Some(99)).unwrap().is_none());
    }

    #[test]
    fn id_match_beats_name_match() {
        let conn = db::init_db(":memory:").unwrap();
        let mut impostor = MembershipRecord::member("R1", "Alice", Some(8));
        impostor.is_banned = true;
        upsert_member(&conn, &impostor).unwrap();
        upsert_member(&conn, &MembershipRecord::member("R1", "Alice Smith", Some(7))).unwrap();
        let found = find_membership(&conn, "R1", "Alice", Some(7)).unwrap().unwrap();
        assert_eq!(found.user_id, Some(7));
        assert!(!found.is_banned);
    }

    #[test]
    fn upsert_member_updates_flags() {
        let conn = db::init_db(":memory:").unwrap();
        let mut rec = MembershipRecord::member("R1", "Bob", Some(2));
        upsert_member(&conn, &rec).unwrap();
        rec.is_muted = true;
        upsert_member(&conn, &rec).unwrap();
        let found = find_membership(&conn, "R1", "Bob", None).unwrap().unwrap();
        assert!(found.is_muted);
    }

    #[test]
    fn online_status_requires_known_user() {
        let conn = db::init_db(":memory:").unwrap();
        assert!(set_user_online(&conn, 1, true, None).is_err());
        upsert_user(&conn, 1, "Alice").unwrap();
        set_user_online(&conn, 1, true, Some(10)).unwrap();
        assert_eq!(user_status(&conn, 1).unwrap(), Some((true, Some(10))));
        set_user_online(&conn, 1, false, Some(20)).unwrap();
        assert_eq!(user_status(&conn, 1).unwrap(), Some((false, Some(20))));
    }
}
