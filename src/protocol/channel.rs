//! Duplex WebSocket channel to the speech service
//!
//! One spawned I/O task owns both directions: it drains an outbound queue
//! and parses inbound frames into [`ChannelEvent`]s for the session loop.
//! Sends are fire-and-forget; there is no acknowledgement in the protocol.
//! The channel never reconnects on its own; retry policy belongs to the
//! caller.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::messages::{ClientMessage, ServerEvent, ServerMessage};
use crate::{Error, Result};

/// Outbound queue depth; capture produces one frame per tens of ms, so this
/// covers seconds of network stall before backpressure reaches the session
const OUTBOUND_CAPACITY: usize = 256;

/// Events delivered from the channel to the session loop
#[derive(Debug)]
pub enum ChannelEvent {
    /// A recognized inbound message
    Event(ServerEvent),
    /// A frame that failed to parse; dropped, the channel stays up
    ProtocolError(String),
    /// The remote side closed the channel
    Closed,
    /// Transport-level failure; the channel is dead
    TransportError(String),
}

enum Outbound {
    Message(ClientMessage),
    Close,
}

/// Live duplex channel handle
///
/// Dropping the handle closes the channel; [`LiveChannel::close`] does the
/// same but waits for the I/O task to finish.
pub struct LiveChannel {
    outbound: mpsc::Sender<Outbound>,
    task: JoinHandle<()>,
}

impl LiveChannel {
    /// Open the channel and spawn its I/O task
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if the WebSocket handshake fails.
    pub async fn connect(url: &str, events: mpsc::Sender<ChannelEvent>) -> Result<Self> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;

        tracing::info!("channel open");

        let (mut sink, mut stream) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = outbound_rx.recv() => match maybe {
                        Some(Outbound::Message(message)) => {
                            let wire = match message.to_wire() {
                                Ok(wire) => wire,
                                Err(e) => {
                                    tracing::error!(error = %e, "failed to serialize outbound message");
                                    continue;
                                }
                            };
                            if let Err(e) = sink.send(Message::Text(wire.into())).await {
                                let _ = events
                                    .send(ChannelEvent::TransportError(e.to_string()))
                                    .await;
                                break;
                            }
                        }
                        // Local close, or the handle was dropped
                        Some(Outbound::Close) | None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },

                    maybe = stream.next() => match maybe {
                        Some(Ok(Message::Text(text))) => {
                            dispatch(text.as_str(), &events).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            // Some deployments deliver JSON frames as binary
                            match std::str::from_utf8(&data) {
                                Ok(text) => dispatch(text, &events).await,
                                Err(_) => {
                                    let _ = events
                                        .send(ChannelEvent::ProtocolError(
                                            "non-UTF-8 binary frame".to_string(),
                                        ))
                                        .await;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = sink.send(Message::Pong(data)).await {
                                tracing::error!(error = %e, "failed to send pong");
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("channel closed by remote");
                            let _ = events.send(ChannelEvent::Closed).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "channel transport error");
                            let _ = events
                                .send(ChannelEvent::TransportError(e.to_string()))
                                .await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(Self {
            outbound: outbound_tx,
            task,
        })
    }

    /// Queue a message for sending; fire-and-forget
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if the I/O task is gone.
    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound
            .send(Outbound::Message(message))
            .await
            .map_err(|_| Error::Channel("channel task terminated".to_string()))
    }

    /// Close the channel and wait for the I/O task to finish
    pub async fn close(self) {
        let _ = self.outbound.send(Outbound::Close).await;
        let _ = self.task.await;
    }
}

/// Parse one inbound frame and forward its events
async fn dispatch(text: &str, events: &mpsc::Sender<ChannelEvent>) {
    match ServerMessage::parse(text) {
        Ok(parsed) => {
            for event in parsed {
                if let ServerEvent::Unrecognized = event {
                    tracing::trace!("unrecognized inbound frame");
                }
                if events.send(ChannelEvent::Event(event)).await.is_err() {
                    return;
                }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed inbound frame");
            let _ = events.send(ChannelEvent::ProtocolError(e.to_string())).await;
        }
    }
}
