use crate::hub::Hub;
use huddle_protocol::{Outbound, TypingPayload};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

/// Periodically expire stale typing indicators.
pub fn run_housekeeping(hub: Hub) -> JoinHandle<()> {
    let period = (hub.settings.typing_ttl / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            sweep_typing(&hub).await;
        }
    })
}

/// Drop typing entries older than the configured TTL and tell the affected
/// rooms who is still typing. Returns how many rooms changed.
pub async fn sweep_typing(hub: &Hub) -> usize {
    let changed = hub.presence.expire_typing(hub.settings.typing_ttl);
    for (room, names) in &changed {
        debug!(%room, remaining = names.len(), "typing expired");
        let event = Outbound::Typing(TypingPayload::Many(names.clone()));
        if let Err(e) = hub.fanout.broadcast(room, &event, None).await {
            warn!(%room, error = %e, "typing sweep broadcast failed");
        }
    }
    changed.len()
}
