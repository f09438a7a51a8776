use crate::model::NewReadReceipt;
use anyhow::Result;
use rusqlite::{params, Connection};

/// Insert read receipts, skipping ones already recorded for the same
/// message and reader. Returns how many rows were inserted.
pub fn create_read_receipts(conn: &Connection, receipts: &[NewReadReceipt]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO message_reads (message_id, user_name, user_id, read_at) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for r in receipts {
            inserted += stmt.execute(params![r.message_id, r.user_name, r.user_id, r.read_at])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

/// Names of everyone who has read a message, in read order.
#[cfg(test)]
fn readers_of(conn: &Connection, message_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_name FROM message_reads WHERE message_id = ?1 ORDER BY read_at, user_name",
    )?;
    let names = stmt
        .query_map([message_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn receipt(message_id: &str, user_name: &str, read_at: i64) -> NewReadReceipt {
        NewReadReceipt {
            message_id: message_id.into(),
            user_name: user_name.into(),
            user_id: None,
            read_at,
        }
    }

    #[test]
    fn duplicates_are_skipped() {
        let conn = db::init_db(":memory:").unwrap();
        let first = [receipt("m1", "bob", 1), receipt("m2", "bob", 1)];
        assert_eq!(create_read_receipts(&conn, &first).unwrap(), 2);
        let again = [receipt("m1", "bob", 5), receipt("m1", "carol", 6)];
        assert_eq!(create_read_receipts(&conn, &again).unwrap(), 1);
        assert_eq!(readers_of(&conn, "m1").unwrap(), ["bob", "carol"]);
    }

    #[test]
    fn empty_batch_is_fine() {
        let conn = db::init_db(":memory:").unwrap();
        assert_eq!(create_read_receipts(&conn, &[]).unwrap(), 0);
    }
}
