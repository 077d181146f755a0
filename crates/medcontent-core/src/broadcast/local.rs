//! In-process broadcast hub connecting several clients in one process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::broadcast::{BroadcastChannel, ChannelEvent, Fanout, Subscription};
use crate::error::{Error, Result};
use crate::models::Envelope;

const DEFAULT_HUB_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct HubFrame {
    origin: u64,
    payload: String,
}

/// Shared relay; each client gets its own [`HubEndpoint`].
#[derive(Clone)]
pub struct LocalBroadcastHub {
    sender: broadcast::Sender<HubFrame>,
    next_endpoint: Arc<AtomicU64>,
}

impl LocalBroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HUB_CAPACITY)
    }

    /// Hub whose per-endpoint backlog holds at most `capacity` frames before lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_endpoint: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Attach a new, connected endpoint. Must be called from within a Tokio runtime.
    pub fn connect(&self) -> HubEndpoint {
        let endpoint = HubEndpoint {
            id: self.next_endpoint.fetch_add(1, Ordering::Relaxed),
            hub: self.clone(),
            fanout: Fanout::default(),
            link: Mutex::new(None),
        };
        endpoint.attach();
        endpoint
    }
}

impl Default for LocalBroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's connection to a [`LocalBroadcastHub`].
///
/// Frames are serialized to JSON on publish and parsed on receipt, like a
/// network transport. A client never receives its own envelopes.
pub struct HubEndpoint {
    id: u64,
    hub: LocalBroadcastHub,
    fanout: Fanout,
    link: Mutex<Option<JoinHandle<()>>>,
}

impl HubEndpoint {
    pub fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Drop the link. Envelopes published by others meanwhile are never delivered here.
    pub fn disconnect(&self) {
        if let Some(link) = self.link.lock().take() {
            link.abort();
            tracing::debug!(endpoint = self.id, "Hub endpoint disconnected");
        }
    }

    /// Re-establish the link and report `Reconnected` to subscribers.
    pub fn reconnect(&self) {
        if self.is_connected() {
            return;
        }
        self.attach();
        tracing::debug!(endpoint = self.id, "Hub endpoint reconnected");
        self.fanout.emit(&ChannelEvent::Reconnected);
    }

    fn attach(&self) {
        let receiver = self.hub.sender.subscribe();
        let link = tokio::spawn(forward_frames(self.id, receiver, self.fanout.clone()));
        *self.link.lock() = Some(link);
    }
}

impl Drop for HubEndpoint {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.abort();
        }
    }
}

#[async_trait]
impl BroadcastChannel for HubEndpoint {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Broadcast("hub endpoint is disconnected".to_string()));
        }
        let frame = HubFrame {
            origin: self.id,
            payload: envelope.to_json()?,
        };
        // No receivers just means nobody else is listening.
        let _ = self.hub.sender.send(frame);
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.fanout.subscribe()
    }
}

async fn forward_frames(id: u64, mut receiver: broadcast::Receiver<HubFrame>, fanout: Fanout) {
    loop {
        match receiver.recv().await {
            Ok(frame) if frame.origin == id => {}
            Ok(frame) => match Envelope::from_json(&frame.payload) {
                Ok(envelope) => fanout.emit(&ChannelEvent::Envelope(envelope)),
                Err(error) => tracing::debug!("Ignoring malformed hub frame: {}", error),
            },
            Err(RecvError::Lagged(skipped)) => fanout.emit(&ChannelEvent::Lagged(skipped)),
            Err(RecvError::Closed) => break,
        }
    }
}
