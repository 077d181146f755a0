//! Broadcast channel: best-effort, at-most-once fan-out of envelopes to other clients.
//!
//! Transports deliver inbound traffic as [`ChannelEvent`]s through a
//! [`Subscription`]. A transport that lost messages reports it with
//! `Reconnected` or `Lagged`; the sync client answers both with a full
//! hydration.

mod local;
mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub use local::{HubEndpoint, LocalBroadcastHub};
pub use websocket::WebSocketChannel;

use crate::error::{Error, Result};
use crate::models::Envelope;

/// Something observed on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// An envelope published by another client.
    Envelope(Envelope),
    /// The link was re-established; anything sent meanwhile is lost.
    Reconnected,
    /// The transport dropped this many messages.
    Lagged(u64),
}

#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Hand an envelope to the transport. Failures are not retried by callers.
    async fn publish(&self, envelope: &Envelope) -> Result<()>;

    /// Start receiving events. Each subscription sees events from the moment it is created.
    fn subscribe(&self) -> Subscription;
}

/// Stream of inbound events for one subscriber.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Subscription {
    /// Next event, or `None` once the transport has shut down.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_next(&mut self) -> Option<ChannelEvent> {
        self.events.try_recv().ok()
    }
}

/// Subscriber list shared by the transports.
#[derive(Clone, Default)]
pub(crate) struct Fanout {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>>,
}

impl Fanout {
    pub(crate) fn subscribe(&self) -> Subscription {
        let (sender, events) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);
        Subscription { events }
    }

    pub(crate) fn emit(&self, event: &ChannelEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// Channel for clients running without a broadcast transport.
///
/// Publishing always fails and subscriptions never yield, so such a client
/// only converges through hydration.
#[derive(Clone, Default)]
pub struct DisabledChannel {
    fanout: Fanout,
}

impl DisabledChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BroadcastChannel for DisabledChannel {
    async fn publish(&self, _envelope: &Envelope) -> Result<()> {
        Err(Error::Broadcast("broadcast is disabled".to_string()))
    }

    fn subscribe(&self) -> Subscription {
        self.fanout.subscribe()
    }
}
