use crate::config::RealtimeConfig;
use crate::fanout::{Connections, Fanout};
use crate::presence::{LocalPresence, PresenceRegistry};
use crate::relay::{Backplane, RelayFanout};
use crate::store::Store;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Everything a room session shares with the rest of the process.
#[derive(Clone)]
pub struct Hub {
    pub store: Arc<dyn Store>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub fanout: Arc<dyn Fanout>,
    pub connections: Arc<Connections>,
    pub settings: RealtimeConfig,
}

impl Hub {
    /// Single-instance hub: room broadcasts reach local sockets only.
    pub fn local(store: Arc<dyn Store>, settings: RealtimeConfig) -> Self {
        let connections = Arc::new(Connections::new());
        Self {
            store,
            presence: Arc::new(LocalPresence::new()),
            fanout: connections.clone(),
            connections,
            settings,
        }
    }

    /// Hub whose room broadcasts also travel over `backplane`. The returned
    /// task delivers frames published by other instances.
    pub fn relayed(
        store: Arc<dyn Store>,
        settings: RealtimeConfig,
        backplane: Arc<dyn Backplane>,
    ) -> (Self, JoinHandle<()>) {
        let connections = Arc::new(Connections::new());
        let relay = RelayFanout::new(connections.clone(), backplane);
        let pump = relay.spawn_pump();
        let hub = Self {
            store,
            presence: Arc::new(LocalPresence::new()),
            fanout: Arc::new(relay),
            connections,
            settings,
        };
        (hub, pump)
    }
}
