//! Audio processing module
//!
//! Capture (fixed-block 16kHz mono PCM), gapless playback scheduling on the
//! output device clock, and the PCM wire codec. Device access goes through
//! [`AudioBackend`] so sessions own their hardware handles explicitly.

mod backend;
mod capture;
mod codec;
mod playback;

pub use backend::{AudioBackend, CpalBackend};
pub use capture::{FRAME_SAMPLES, FrameAccumulator, INPUT_SAMPLE_RATE};
pub use codec::{decode_pcm, encode_pcm, input_level};
pub use playback::{OUTPUT_SAMPLE_RATE, PlaybackEvent, PlaybackScheduler};
