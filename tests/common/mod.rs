//! Shared test utilities
//!
//! A scripted audio backend and a loopback speech service so sessions can
//! be exercised end to end without audio hardware or network access.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use confab_engine::Result;
use confab_engine::SessionState;
use confab_engine::audio::{AudioBackend, PlaybackScheduler};

/// Audio backend that replays a scripted set of capture frames and exposes
/// the playback scheduler so tests can drive the device clock by hand
pub struct FakeBackend {
    script: Vec<Vec<i16>>,
    pub capture_running: Arc<AtomicBool>,
    pub output_running: Arc<AtomicBool>,
    pub scheduler: Arc<Mutex<Option<PlaybackScheduler>>>,
}

/// Observation handles that outlive the boxed backend
#[derive(Clone)]
pub struct FakeHandles {
    pub capture_running: Arc<AtomicBool>,
    pub output_running: Arc<AtomicBool>,
    pub scheduler: Arc<Mutex<Option<PlaybackScheduler>>>,
}

impl FakeBackend {
    #[must_use]
    pub fn new(script: Vec<Vec<i16>>) -> Self {
        Self {
            script,
            capture_running: Arc::new(AtomicBool::new(false)),
            output_running: Arc::new(AtomicBool::new(false)),
            scheduler: Arc::new(Mutex::new(None)),
        }
    }

    #[must_use]
    pub fn handles(&self) -> FakeHandles {
        FakeHandles {
            capture_running: Arc::clone(&self.capture_running),
            output_running: Arc::clone(&self.output_running),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

impl AudioBackend for FakeBackend {
    fn start_capture(&mut self, frames: mpsc::Sender<Vec<i16>>) -> Result<()> {
        self.capture_running
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let script = self.script.clone();
        tokio::spawn(async move {
            for frame in script {
                if frames.send(frame).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    fn stop_capture(&mut self) {
        self.capture_running
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }

    fn start_output(&mut self, scheduler: PlaybackScheduler) -> Result<()> {
        self.output_running
            .store(true, std::sync::atomic::Ordering::SeqCst);
        if let Ok(mut slot) = self.scheduler.lock() {
            *slot = Some(scheduler);
        }
        Ok(())
    }

    fn stop_output(&mut self) {
        self.output_running
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Frames the loopback service can push to the client
pub enum ServerFrame {
    Text(String),
    Close,
}

/// Loopback speech service over a real WebSocket on 127.0.0.1
pub struct FakeService {
    pub url: String,
    /// Messages received from the client, parsed as JSON
    pub incoming: mpsc::UnboundedReceiver<serde_json::Value>,
    /// Push frames to the client
    pub outgoing: mpsc::UnboundedSender<ServerFrame>,
}

/// Bind a loopback service accepting a single session
pub async fn spawn_service() -> FakeService {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("local addr");

    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();

    tokio::spawn(async move {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => return,
        };
        let (mut sink, mut source) = ws.split();

        loop {
            tokio::select! {
                msg = source.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let value: serde_json::Value =
                            serde_json::from_str(text.as_str()).expect("client sent invalid JSON");
                        if in_tx.send(value).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },

                frame = out_rx.recv() => match frame {
                    Some(ServerFrame::Text(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(ServerFrame::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    None => break,
                },
            }
        }
    });

    FakeService {
        url: format!("ws://{addr}"),
        incoming: in_rx,
        outgoing: out_tx,
    }
}

/// Wait until the session reaches `want`, or panic after five seconds
pub async fn wait_for_state(states: &mut watch::Receiver<SessionState>, want: SessionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *states.borrow_and_update() == want {
                return;
            }
            states.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {want}"));
}

/// Receive the next client message, or panic after five seconds
pub async fn next_message(
    incoming: &mut mpsc::UnboundedReceiver<serde_json::Value>,
) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), incoming.recv())
        .await
        .expect("timed out waiting for client message")
        .expect("client hung up")
}
