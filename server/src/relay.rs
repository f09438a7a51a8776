//! Cross-instance fan-out over a publish/subscribe backplane.
//!
//! Each instance delivers to its own sockets immediately and publishes the
//! frame; a pump task delivers frames published by other instances.

use crate::fanout::{encode, Connections, Fanout};
use crate::identity::{ConnectionId, RoomId};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use huddle_protocol::Outbound;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

const BACKPLANE_CAPACITY: usize = 1024;

/// One room broadcast as carried between instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayFrame {
    pub origin: Uuid,
    pub room: RoomId,
    pub exclude: Option<ConnectionId>,
    pub payload: String,
}

#[async_trait]
pub trait Backplane: Send + Sync {
    async fn publish(&self, frame: RelayFrame) -> Result<()>;
    fn subscribe(&self) -> BoxStream<'static, RelayFrame>;
}

/// In-process backplane, enough to run several instances side by side.
#[derive(Clone)]
pub struct MemoryBackplane {
    tx: broadcast::Sender<RelayFrame>,
}

impl MemoryBackplane {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BACKPLANE_CAPACITY);
        Self { tx }
    }
}

impl Default for MemoryBackplane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backplane for MemoryBackplane {
    async fn publish(&self, frame: RelayFrame) -> Result<()> {
        // no subscribers is not an error
        let _ = self.tx.send(frame);
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, RelayFrame> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        warn!(error = %e, "backplane lagged");
                        None
                    }
                }
            })
            .boxed()
    }
}

pub struct RelayFanout {
    origin: Uuid,
    local: Arc<Connections>,
    backplane: Arc<dyn Backplane>,
}

impl RelayFanout {
    pub fn new(local: Arc<Connections>, backplane: Arc<dyn Backplane>) -> Self {
        Self {
            origin: Uuid::new_v4(),
            local,
            backplane,
        }
    }

    /// Start delivering frames published by other instances.
    pub fn spawn_pump(&self) -> JoinHandle<()> {
        let mut frames = self.backplane.subscribe();
        let origin = self.origin;
        let local = self.local.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                if frame.origin == origin {
                    continue;
                }
                let payload: Arc<str> = Arc::from(frame.payload);
                let n = local.deliver_local(&frame.room, &payload, frame.exclude);
                debug!(room = %frame.room, receivers = n, "relayed frame delivered");
            }
        })
    }
}

#[async_trait]
impl Fanout for RelayFanout {
    async fn broadcast(
        &self,
        room: &str,
        event: &Outbound,
        exclude: Option<ConnectionId>,
    ) -> Result<()> {
        let frame = encode(event)?;
        self.local.deliver_local(room, &frame, exclude);
        self.backplane
            .publish(RelayFrame {
                origin: self.origin,
                room: room.to_string(),
                exclude,
                payload: frame.to_string(),
            })
            .await
    }
}
