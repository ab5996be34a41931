//! Session lifecycle state machine
//!
//! Capture, channel, and playback all deliver results asynchronously; each
//! outcome becomes a typed [`SessionEvent`] and every transition in the
//! engine flows through [`transition`]. No state is entered before its
//! precondition is confirmed: `Listening` requires the capture grant, not
//! the request; `Speaking` requires a scheduled chunk, not an expected one.

use std::fmt;

/// Externally observable session lifecycle states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No live session; the initial and terminal state
    #[default]
    Disconnected,
    /// Channel handshake in progress
    Connecting,
    /// Channel open, capture not yet granted
    Connected,
    /// Capture running, no response audio pending
    Listening,
    /// Response audio scheduled and not yet played out
    Speaking,
    /// Fatal fault; terminal until an explicit reconnect
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Typed events that drive the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// `connect()` was called
    ConnectRequested,
    /// Channel handshake succeeded
    ChannelOpened,
    /// Capture device grant succeeded
    CaptureStarted,
    /// First audio chunk of a response was scheduled
    AudioScheduled,
    /// Playback caught up with the cursor; response played out
    PlaybackCaughtUp,
    /// The service cut the current response short
    Interrupted,
    /// Channel error, capture-device error, or decode fault
    Fault(String),
    /// `disconnect()` was called
    DisconnectRequested,
}

/// Compute the next state for an event
///
/// Events that do not apply in the current state leave it unchanged;
/// `DisconnectRequested` reaches `Disconnected` from everywhere, and the
/// terminal states absorb faults.
#[must_use]
pub fn transition(state: SessionState, event: &SessionEvent) -> SessionState {
    use SessionState::{Connected, Connecting, Disconnected, Error, Listening, Speaking};

    match (state, event) {
        (_, SessionEvent::DisconnectRequested) => Disconnected,
        (Disconnected, SessionEvent::ConnectRequested) => Connecting,
        (Connecting, SessionEvent::ChannelOpened) => Connected,
        (Connected, SessionEvent::CaptureStarted) => Listening,
        (Listening, SessionEvent::AudioScheduled) => Speaking,
        (Speaking, SessionEvent::PlaybackCaughtUp | SessionEvent::Interrupted) => Listening,
        (Disconnected | Error, SessionEvent::Fault(_)) => state,
        (_, SessionEvent::Fault(_)) => Error,
        _ => state,
    }
}
