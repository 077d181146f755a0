//! WebSocket transport for the broadcast relay.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::broadcast::{BroadcastChannel, ChannelEvent, Fanout, Subscription};
use crate::error::{Error, Result};
use crate::models::Envelope;
use crate::util::{is_ws_url, normalize_text_option};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client side of the relay. A background task keeps the socket open,
/// reconnecting with capped exponential backoff.
pub struct WebSocketChannel {
    url: String,
    outbound: mpsc::UnboundedSender<String>,
    connected: watch::Receiver<bool>,
    fanout: Fanout,
    supervisor: JoinHandle<()>,
}

impl std::fmt::Debug for WebSocketChannel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WebSocketChannel")
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl WebSocketChannel {
    /// Start connecting to `url` (`ws://` or `wss://`). Must be called from within a Tokio runtime.
    pub fn connect(url: impl Into<String>) -> Result<Self> {
        let url = normalize_text_option(Some(url.into()))
            .filter(|url| is_ws_url(url))
            .ok_or_else(|| {
                Error::Config("broadcast URL must include ws:// or wss://".to_string())
            })?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected) = watch::channel(false);
        let fanout = Fanout::default();
        let supervisor = tokio::spawn(supervise(
            url.clone(),
            outbound_rx,
            connected_tx,
            fanout.clone(),
        ));

        Ok(Self {
            url,
            outbound,
            connected,
            fanout,
            supervisor,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the socket is open. Returns `false` if `timeout` elapses first.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        let waited = tokio::time::timeout(timeout, async move {
            connected.wait_for(|is_connected| *is_connected).await.is_ok()
        })
        .await;
        waited.unwrap_or(false)
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

#[async_trait]
impl BroadcastChannel for WebSocketChannel {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Broadcast(format!("not connected to {}", self.url)));
        }
        self.outbound
            .send(envelope.to_json()?)
            .map_err(|_| Error::Broadcast("broadcast connection task stopped".to_string()))
    }

    fn subscribe(&self) -> Subscription {
        self.fanout.subscribe()
    }
}

async fn supervise(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    connected: watch::Sender<bool>,
    fanout: Fanout,
) {
    let mut backoff = INITIAL_BACKOFF;
    let mut first_attempt = true;

    loop {
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                tracing::info!("Connected to broadcast relay at {}", url);
                backoff = INITIAL_BACKOFF;
                let _ = connected.send(true);
                if !first_attempt {
                    fanout.emit(&ChannelEvent::Reconnected);
                }

                let keep_running = pump(stream, &mut outbound, &fanout).await;
                let _ = connected.send(false);
                // Envelopes queued for a dead socket are dropped, not replayed.
                while outbound.try_recv().is_ok() {}
                if !keep_running {
                    return;
                }
                tracing::warn!("Lost connection to broadcast relay at {}", url);
            }
            Err(error) => {
                tracing::warn!("Failed to connect to broadcast relay at {}: {}", url, error);
            }
        }

        first_attempt = false;
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Shuttle frames until the socket drops (`true`) or the channel owner goes away (`false`).
async fn pump(
    stream: RelayStream,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    fanout: &Fanout,
) -> bool {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(text) => {
                    if let Err(error) = sink.send(Message::Text(text)).await {
                        tracing::warn!("Failed to send envelope to relay: {}", error);
                        return true;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return false;
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => match Envelope::from_json(&text) {
                    Ok(envelope) => fanout.emit(&ChannelEvent::Envelope(envelope)),
                    Err(error) => tracing::debug!("Ignoring malformed relay frame: {}", error),
                },
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::warn!("Broadcast relay read failed: {}", error);
                    return true;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_non_websocket_urls() {
        assert!(WebSocketChannel::connect("https://api.example.com/events").is_err());
        assert!(WebSocketChannel::connect("  ").is_err());
    }

    #[tokio::test]
    async fn publish_fails_while_disconnected() {
        // Nothing listens on port 9 (discard); the supervisor keeps retrying.
        let channel = WebSocketChannel::connect("ws://127.0.0.1:9/events").unwrap();
        assert!(!channel.wait_connected(Duration::from_millis(50)).await);

        let envelope = Envelope::full(&"offices".into(), Vec::new()).unwrap();
        assert!(matches!(
            channel.publish(&envelope).await,
            Err(Error::Broadcast(_))
        ));
    }
}
