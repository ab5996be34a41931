//! Gapless playback scheduling
//!
//! Synthesized speech arrives as variable-length chunks at irregular
//! intervals. The scheduler places each chunk back-to-back on the output
//! device timeline so playback is continuous under steady arrival and
//! degrades to silent, bounded gaps under jitter. The bookkeeping lives in
//! one shared state block: the device callback renders from it and the
//! session loop schedules into it, each under a single short lock so the
//! cursor is always read, decided on, and written as one step.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Sample rate of synthesized speech from the remote service (24kHz mono)
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Safety margin applied when the cursor has fallen behind the device clock
const SAFETY_MARGIN_MS: u64 = 50;

/// Notifications from the render path to the session loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The device clock reached the cursor with nothing left queued;
    /// the current response has been played out in full
    CaughtUp,
}

/// One decoded speech chunk placed on the output timeline
struct ScheduledChunk {
    /// Absolute start, in samples since the output stream began
    start: u64,
    samples: Vec<f32>,
}

impl ScheduledChunk {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

struct TimelineState {
    /// Samples rendered so far; the device clock
    position: u64,
    /// Next free start time, in samples; monotonically non-decreasing
    cursor: u64,
    queue: VecDeque<ScheduledChunk>,
    /// Set while a response is scheduled and not yet played out
    speaking: bool,
}

/// Schedules decoded speech chunks back-to-back on the output device clock
///
/// Clones share the same timeline; the output backend holds one clone and
/// renders from it on the audio thread while the session loop enqueues.
#[derive(Clone)]
pub struct PlaybackScheduler {
    state: Arc<Mutex<TimelineState>>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    margin: u64,
}

impl PlaybackScheduler {
    /// Create a scheduler for the given sample rate
    #[must_use]
    pub fn new(sample_rate: u32, events: mpsc::UnboundedSender<PlaybackEvent>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimelineState {
                position: 0,
                cursor: 0,
                queue: VecDeque::new(),
                speaking: false,
            })),
            events,
            margin: u64::from(sample_rate) * SAFETY_MARGIN_MS / 1000,
        }
    }

    /// Schedule a chunk at the next free start time
    ///
    /// Start time is `max(cursor, position + margin)`: a chunk arriving
    /// while the previous one still plays lands exactly at its end, and a
    /// chunk arriving after an underrun snaps forward to the device clock
    /// plus the safety margin instead of being scheduled in the past.
    pub fn enqueue(&self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }

        if let Ok(mut state) = self.state.lock() {
            let start = state.cursor.max(state.position + self.margin);
            let len = samples.len() as u64;

            tracing::trace!(
                start,
                len,
                behind = start > state.cursor,
                "chunk scheduled"
            );

            state.queue.push_back(ScheduledChunk { start, samples });
            state.cursor = start + len;
            state.speaking = true;
        }
    }

    /// Render the next block of output, interleaved across `channels`
    ///
    /// Called by the output device callback; tests drive it directly to
    /// advance the clock without hardware. Fills scheduled samples by
    /// absolute position, zero-fills gaps, retires consumed chunks, and
    /// emits [`PlaybackEvent::CaughtUp`] once when the clock reaches the
    /// cursor with an empty queue.
    pub fn render(&self, out: &mut [f32], channels: usize) {
        let Ok(mut state) = self.state.lock() else {
            out.fill(0.0);
            return;
        };

        for frame in out.chunks_mut(channels.max(1)) {
            let position = state.position;

            while state.queue.front().is_some_and(|c| c.end() <= position) {
                state.queue.pop_front();
            }

            let sample = match state.queue.front() {
                Some(chunk) if chunk.start <= position => {
                    chunk.samples[(position - chunk.start) as usize]
                }
                _ => 0.0,
            };

            for slot in frame.iter_mut() {
                *slot = sample;
            }
            state.position += 1;
        }

        // Retire anything fully consumed by this block so the caught-up
        // check below sees the true queue state
        let position = state.position;
        while state.queue.front().is_some_and(|c| c.end() <= position) {
            state.queue.pop_front();
        }

        if state.speaking && state.queue.is_empty() && state.position >= state.cursor {
            state.speaking = false;
            let _ = self.events.send(PlaybackEvent::CaughtUp);
        }
    }

    /// Drop everything queued and rejoin the cursor to the device clock
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.queue.clear();
            state.cursor = state.position;
            state.speaking = false;
        }
    }

    /// Device clock, in samples rendered since the stream began
    #[must_use]
    pub fn position(&self) -> u64 {
        self.state.lock().map(|s| s.position).unwrap_or(0)
    }

    /// Next free start time, in samples
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.state.lock().map(|s| s.cursor).unwrap_or(0)
    }
}
