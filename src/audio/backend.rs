//! Audio device backends
//!
//! The host audio engine is modeled as an explicitly owned handle passed
//! into the session controller, not a module-level singleton: sessions get
//! independent device lifecycles and tests inject fakes. `cpal` streams are
//! not `Send`, so the production backend confines each stream to a dedicated
//! thread and keeps only a stop handle; acquisition errors are relayed back
//! synchronously before `start_*` returns.
//!
//! Input processing (echo cancellation, noise suppression, gain) belongs to
//! the platform's device configuration and is not negotiated here.

use std::sync::mpsc as std_mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::mpsc;

use crate::audio::capture::{FrameAccumulator, INPUT_SAMPLE_RATE};
use crate::audio::playback::{PlaybackScheduler, OUTPUT_SAMPLE_RATE};
use crate::{Error, Result};

/// Capture and playback halves of an audio device
///
/// `start_capture` delivers fixed-size 16-bit PCM frames at 16kHz mono into
/// `frames` until `stop_capture`. `start_output` renders the scheduler's
/// timeline at 24kHz until `stop_output`. All four calls are idempotent and
/// the stops are safe to call when never started.
pub trait AudioBackend: Send {
    /// Start the microphone stream
    ///
    /// # Errors
    ///
    /// Returns [`Error::Acquisition`] if no suitable input device is
    /// available; reported once, never retried here.
    fn start_capture(&mut self, frames: mpsc::Sender<Vec<i16>>) -> Result<()>;

    /// Release the input device and detach the block processor
    fn stop_capture(&mut self);

    /// Start the output stream rendering the given scheduler
    ///
    /// # Errors
    ///
    /// Returns [`Error::Acquisition`] if no suitable output device is
    /// available.
    fn start_output(&mut self, scheduler: PlaybackScheduler) -> Result<()>;

    /// Release the output device
    fn stop_output(&mut self);
}

/// Stop handle for a stream confined to its own thread
///
/// Dropping the sender unblocks the thread's `recv()`, which drops the
/// stream and exits.
struct StreamHandle {
    _stop: std_mpsc::Sender<()>,
}

/// Production backend over the system's default audio devices
#[derive(Default)]
pub struct CpalBackend {
    capture: Option<StreamHandle>,
    output: Option<StreamHandle>,
}

impl CpalBackend {
    /// Create a backend over the default host
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBackend for CpalBackend {
    fn start_capture(&mut self, frames: mpsc::Sender<Vec<i16>>) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        thread::spawn(move || {
            let stream = match build_input_stream(frames) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            // Parked until the handle is dropped
            let _ = stop_rx.recv();
            drop(stream);
        });

        ready_rx
            .recv()
            .map_err(|_| Error::Acquisition("capture thread exited".to_string()))??;

        self.capture = Some(StreamHandle { _stop: stop_tx });
        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop_capture(&mut self) {
        if self.capture.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
    }

    fn start_output(&mut self, scheduler: PlaybackScheduler) -> Result<()> {
        if self.output.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        thread::spawn(move || {
            let stream = match build_output_stream(&scheduler) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            let _ = stop_rx.recv();
            drop(stream);
        });

        ready_rx
            .recv()
            .map_err(|_| Error::Acquisition("playback thread exited".to_string()))??;

        self.output = Some(StreamHandle { _stop: stop_tx });
        tracing::debug!("audio output started");
        Ok(())
    }

    fn stop_output(&mut self) {
        if self.output.take().is_some() {
            tracing::debug!("audio output stopped");
        }
    }
}

/// Open the default input device at 16kHz mono and attach the accumulator
fn build_input_stream(frames: mpsc::Sender<Vec<i16>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Acquisition("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Acquisition(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Acquisition("no mono 16kHz input config".to_string()))?;

    let config = supported.with_sample_rate(SampleRate(INPUT_SAMPLE_RATE)).config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = INPUT_SAMPLE_RATE,
        "audio capture initialized"
    );

    let mut accumulator = FrameAccumulator::new(frames);
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                accumulator.push(data);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Acquisition(e.to_string()))?;

    stream.play().map_err(|e| Error::Acquisition(e.to_string()))?;
    Ok(stream)
}

/// Open the default output device at 24kHz and render the scheduler
fn build_output_stream(scheduler: &PlaybackScheduler) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Acquisition("no output device available".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Acquisition(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: stereo, the mono timeline is duplicated per channel
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(OUTPUT_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(OUTPUT_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Acquisition("no 24kHz output config".to_string()))?;

    let config = supported.with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE)).config();
    let channels = config.channels as usize;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = OUTPUT_SAMPLE_RATE,
        channels,
        "audio playback initialized"
    );

    let scheduler = scheduler.clone();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                scheduler.render(data, channels);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Acquisition(e.to_string()))?;

    stream.play().map_err(|e| Error::Acquisition(e.to_string()))?;
    Ok(stream)
}
