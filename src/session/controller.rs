//! Session controller
//!
//! Orchestrates one live conversation: owns the audio backend handle and
//! the channel, wires capture frames through the codec onto the channel and
//! inbound speech through the codec into the playback scheduler, and is the
//! sole writer of the observable state, error, and input-level outputs.
//!
//! All session activity runs in a single spawned event loop that selects
//! over three sources (capture frames, channel events, playback events),
//! so encoding, decoding, and scheduling happen synchronously and briefly
//! inside one cooperative task.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::{
    self, AudioBackend, CpalBackend, OUTPUT_SAMPLE_RATE, PlaybackEvent, PlaybackScheduler,
};
use crate::config::SessionConfig;
use crate::protocol::{self, ChannelEvent, ClientMessage, LiveChannel, ServerEvent};
use crate::session::state::{SessionEvent, SessionState, transition};
use crate::Result;

/// Capture frame queue depth: one in-flight frame (spillover is dropped at
/// the accumulator, never buffered)
const FRAME_CHANNEL_CAPACITY: usize = 1;

/// Inbound channel event queue depth
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Observable session status; written only by the controller and its loop
struct Status {
    state: watch::Sender<SessionState>,
    last_error: Mutex<Option<String>>,
    input_level: AtomicU8,
    protocol_errors: AtomicU64,
}

impl Status {
    fn new() -> Self {
        Self {
            state: watch::Sender::new(SessionState::Disconnected),
            last_error: Mutex::new(None),
            input_level: AtomicU8::new(0),
            protocol_errors: AtomicU64::new(0),
        }
    }

    /// Route an event through the state machine and record its cause
    fn apply(&self, event: &SessionEvent) {
        if let SessionEvent::Fault(cause) = event {
            tracing::error!(error = %cause, "session fault");
            if let Ok(mut last) = self.last_error.lock() {
                *last = Some(cause.clone());
            }
        }

        self.state.send_modify(|state| {
            let next = transition(*state, event);
            if next != *state {
                tracing::info!(from = %state, to = %next, "session state");
            }
            *state = next;
        });
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }
}

/// Handles for one live session
struct Runtime {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Controls one conversation session at a time
///
/// `connect()` acquires every resource in order (output device, channel,
/// setup, capture device) and `disconnect()` releases them from any state,
/// including mid-error. The audio backend is an owned handle so tests and
/// embedders can substitute their own devices.
pub struct SessionController {
    config: SessionConfig,
    audio: Arc<Mutex<Box<dyn AudioBackend>>>,
    status: Arc<Status>,
    runtime: Option<Runtime>,
}

impl SessionController {
    /// Create a controller over the system's default audio devices
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_backend(config, Box::new(CpalBackend::new()))
    }

    /// Create a controller with an explicit audio backend
    #[must_use]
    pub fn with_backend(config: SessionConfig, backend: Box<dyn AudioBackend>) -> Self {
        Self {
            config,
            audio: Arc::new(Mutex::new(backend)),
            status: Arc::new(Status::new()),
            runtime: None,
        }
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.status.current()
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.status.state.subscribe()
    }

    /// Human-readable cause of the last fault, if any
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.status.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Coarse 0-100 microphone loudness; visualization aid only
    #[must_use]
    pub fn input_level(&self) -> u8 {
        self.status.input_level.load(Ordering::Relaxed)
    }

    /// Malformed inbound frames dropped this session
    #[must_use]
    pub fn protocol_errors(&self) -> u64 {
        self.status.protocol_errors.load(Ordering::Relaxed)
    }

    /// Open a session: allocate devices, open the channel, send setup,
    /// start capture, and spawn the session loop
    ///
    /// A no-op if a session is already live. After a fault, calling this
    /// again re-runs the full sequence from `disconnected`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] before anything is acquired if no
    /// credential is configured, or the acquisition/channel error that
    /// stopped setup; in the latter case the session is left in the
    /// `error` state with everything released.
    pub async fn connect(&mut self) -> Result<()> {
        match self.status.current() {
            SessionState::Disconnected => {}
            SessionState::Error => self.disconnect().await,
            _ => return Ok(()),
        }

        // Fails synchronously, before any resource is acquired
        let url = protocol::endpoint_url(&self.config)?;

        if let Ok(mut last) = self.status.last_error.lock() {
            *last = None;
        }
        self.status.input_level.store(0, Ordering::Relaxed);
        self.status.protocol_errors.store(0, Ordering::Relaxed);
        self.status.apply(&SessionEvent::ConnectRequested);

        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let scheduler = PlaybackScheduler::new(OUTPUT_SAMPLE_RATE, playback_tx);

        if let Err(e) = self.start_output(scheduler.clone()) {
            self.fail_connect(&e.to_string());
            return Err(e);
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let channel = match LiveChannel::connect(&url, event_tx).await {
            Ok(channel) => channel,
            Err(e) => {
                self.fail_connect(&e.to_string());
                return Err(e);
            }
        };
        self.status.apply(&SessionEvent::ChannelOpened);

        // Setup is always the first message on the channel; capture has not
        // started, so no media chunk can precede it
        let setup = ClientMessage::setup(
            &self.config.model,
            &self.config.voice,
            self.config.system_instruction.as_deref(),
        );
        if let Err(e) = channel.send(setup).await {
            channel.close().await;
            self.fail_connect(&e.to_string());
            return Err(e);
        }

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        if let Err(e) = self.start_capture(frame_tx) {
            channel.close().await;
            self.fail_connect(&e.to_string());
            return Err(e);
        }
        self.status.apply(&SessionEvent::CaptureStarted);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_session(SessionLoop {
            status: Arc::clone(&self.status),
            audio: Arc::clone(&self.audio),
            scheduler,
            channel,
            frames: frame_rx,
            events: event_rx,
            playback: playback_rx,
            shutdown: shutdown_rx,
        }));

        self.runtime = Some(Runtime {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Close the session and release every acquired resource
    ///
    /// Idempotent and reachable from every state, including mid-error and
    /// when never connected.
    pub async fn disconnect(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let _ = runtime.shutdown.send(true);
            let _ = runtime.task.await;
        }

        // The loop releases devices on its way out; repeat here so a
        // session that never reached the loop is still torn down
        self.stop_audio();
        self.status.apply(&SessionEvent::DisconnectRequested);
    }

    fn start_output(&self, scheduler: PlaybackScheduler) -> Result<()> {
        let mut audio = self
            .audio
            .lock()
            .map_err(|_| crate::Error::Acquisition("audio backend poisoned".to_string()))?;
        audio.start_output(scheduler)
    }

    fn start_capture(&self, frames: mpsc::Sender<Vec<i16>>) -> Result<()> {
        let mut audio = self
            .audio
            .lock()
            .map_err(|_| crate::Error::Acquisition("audio backend poisoned".to_string()))?;
        audio.start_capture(frames)
    }

    fn stop_audio(&self) {
        if let Ok(mut audio) = self.audio.lock() {
            audio.stop_capture();
            audio.stop_output();
        }
    }

    /// Release everything acquired during a failed `connect()`
    fn fail_connect(&mut self, cause: &str) {
        self.stop_audio();
        self.runtime = None;
        self.status.apply(&SessionEvent::Fault(cause.to_string()));
    }
}

/// Everything the session loop owns
struct SessionLoop {
    status: Arc<Status>,
    audio: Arc<Mutex<Box<dyn AudioBackend>>>,
    scheduler: PlaybackScheduler,
    channel: LiveChannel,
    frames: mpsc::Receiver<Vec<i16>>,
    events: mpsc::Receiver<ChannelEvent>,
    playback: mpsc::UnboundedReceiver<PlaybackEvent>,
    shutdown: watch::Receiver<bool>,
}

/// The single cooperative event loop of a session
///
/// Runs until shutdown or a fatal fault; on every exit path it stops both
/// audio halves, resets the scheduler, and closes the channel.
async fn run_session(mut this: SessionLoop) {
    let fatal = loop {
        tokio::select! {
            _ = this.shutdown.changed() => break None,

            Some(frame) = this.frames.recv() => {
                this.status
                    .input_level
                    .store(audio::input_level(&frame), Ordering::Relaxed);

                let chunk = ClientMessage::media_chunk(audio::encode_pcm(&frame));
                if let Err(e) = this.channel.send(chunk).await {
                    break Some(e.to_string());
                }
            }

            Some(event) = this.events.recv() => match event {
                ChannelEvent::Event(ServerEvent::Audio { mime_type, data }) => {
                    match audio::decode_pcm(&data) {
                        Ok(samples) => {
                            tracing::trace!(
                                samples = samples.len(),
                                mime_type = %mime_type,
                                "response audio scheduled"
                            );
                            this.scheduler.enqueue(samples);
                            this.status.apply(&SessionEvent::AudioScheduled);
                        }
                        // A decode fault is fatal; one of our peers is
                        // speaking a different protocol
                        Err(e) => break Some(e.to_string()),
                    }
                }
                ChannelEvent::Event(ServerEvent::Interrupted) => {
                    tracing::debug!("response interrupted, flushing playback");
                    this.scheduler.reset();
                    this.status.apply(&SessionEvent::Interrupted);
                }
                ChannelEvent::Event(ServerEvent::TurnComplete) => {
                    tracing::debug!("turn complete");
                }
                ChannelEvent::Event(ServerEvent::SetupComplete) => {
                    tracing::debug!("setup acknowledged");
                }
                ChannelEvent::Event(ServerEvent::Unrecognized) => {}
                ChannelEvent::ProtocolError(cause) => {
                    this.status.protocol_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %cause, "inbound frame dropped");
                }
                ChannelEvent::Closed => {
                    // No local disconnect preceded this: abnormal termination
                    break Some("channel closed by remote".to_string());
                }
                ChannelEvent::TransportError(cause) => break Some(cause),
            },

            Some(event) = this.playback.recv() => match event {
                PlaybackEvent::CaughtUp => {
                    this.status.apply(&SessionEvent::PlaybackCaughtUp);
                }
            },
        }
    };

    if let Ok(mut audio) = this.audio.lock() {
        audio.stop_capture();
        audio.stop_output();
    }
    this.scheduler.reset();
    this.channel.close().await;

    if let Some(cause) = fatal {
        this.status.apply(&SessionEvent::Fault(cause));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicBool;

    /// Backend that records calls without touching hardware
    #[derive(Default)]
    struct NullBackend {
        capture_running: Arc<AtomicBool>,
        output_running: Arc<AtomicBool>,
    }

    impl AudioBackend for NullBackend {
        fn start_capture(&mut self, _frames: mpsc::Sender<Vec<i16>>) -> Result<()> {
            self.capture_running.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop_capture(&mut self) {
            self.capture_running.store(false, Ordering::SeqCst);
        }

        fn start_output(&mut self, _scheduler: PlaybackScheduler) -> Result<()> {
            self.output_running.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop_output(&mut self) {
            self.output_running.store(false, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_any_resource() {
        let backend = NullBackend::default();
        let output_running = Arc::clone(&backend.output_running);
        let mut controller =
            SessionController::with_backend(SessionConfig::default(), Box::new(backend));

        let err = controller.connect().await.unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));

        // No state change, no devices touched
        assert_eq!(controller.state(), SessionState::Disconnected);
        assert!(controller.last_error().is_none());
        assert!(!output_running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_safe() {
        let mut controller = SessionController::with_backend(
            SessionConfig::default(),
            Box::new(NullBackend::default()),
        );

        controller.disconnect().await;
        controller.disconnect().await;
        assert_eq!(controller.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_enters_error_and_releases() {
        // Unreachable local endpoint: channel open fails after the output
        // device was acquired
        let config = SessionConfig {
            proxy: Some("ws://127.0.0.1:1/".to_string()),
            ..SessionConfig::default()
        };
        let backend = NullBackend::default();
        let output_running = Arc::clone(&backend.output_running);
        let mut controller = SessionController::with_backend(config, Box::new(backend));

        assert!(controller.connect().await.is_err());
        assert_eq!(controller.state(), SessionState::Error);
        assert!(controller.last_error().is_some());
        assert!(!output_running.load(Ordering::SeqCst), "output not released");

        // Explicit reconnect path: disconnect resets, connect re-runs
        controller.disconnect().await;
        assert_eq!(controller.state(), SessionState::Disconnected);
    }
}
