//! Membership guard: read-through check of a principal's standing in a room.

use crate::error::DenyReason;
use crate::model::MembershipRecord;
use crate::store::Store;
use std::time::Duration;
use tracing::warn;

/// Look up the membership record and classify it. Store errors and timeouts
/// fail closed as [`DenyReason::LookupError`].
pub async fn check(
    store: &dyn Store,
    room_id: &str,
    name: &str,
    user_id: Option<i64>,
    timeout: Duration,
) -> Result<MembershipRecord, DenyReason> {
    let lookup = tokio::time::timeout(timeout, store.find_membership(room_id, name, user_id)).await;
    let record = match lookup {
        Ok(Ok(record)) => record,
        Ok(Err(e)) => {
            warn!(room = room_id, name, error = %e, "membership lookup failed");
            return Err(DenyReason::LookupError);
        }
        Err(_) => {
            warn!(room = room_id, name, "membership lookup timed out");
            return Err(DenyReason::LookupError);
        }
    };
    classify(record)
}

/// Precedence: missing, then banned, then muted.
pub fn classify(record: Option<MembershipRecord>) -> Result<MembershipRecord, DenyReason> {
    match record {
        None => Err(DenyReason::NotMember),
        Some(r) if r.is_banned => Err(DenyReason::Banned),
        Some(r) if r.is_muted => Err(DenyReason::Muted),
        Some(r) => Ok(r),
    }
}
