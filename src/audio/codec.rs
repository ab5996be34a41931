//! PCM frame codec
//!
//! The duplex channel only carries text-safe payloads, so captured PCM goes
//! out as base64 over its raw little-endian byte layout and inbound speech
//! comes back the same way. Decoding normalizes to f32 in [-1, 1], the
//! domain the playback scheduler works in.

use base64::prelude::*;

use crate::{Error, Result};

/// Stride used when sampling a frame for the input-level meter
const LEVEL_STRIDE: usize = 16;

/// Full-scale input level is reached at a quarter of the i16 range;
/// conversational speech rarely exceeds that
const LEVEL_FULL_SCALE: f32 = 8192.0;

/// Encode a block of 16-bit PCM samples into wire text
#[must_use]
pub fn encode_pcm(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    BASE64_STANDARD.encode(bytes)
}

/// Decode wire text into playback samples normalized to [-1, 1]
///
/// # Errors
///
/// Returns [`Error::Decode`] if the text is not valid base64 or the decoded
/// byte count is not a whole number of 16-bit samples. The fault is the
/// caller's to surface; nothing is swallowed here.
pub fn decode_pcm(data: &str) -> Result<Vec<f32>> {
    let bytes = BASE64_STANDARD
        .decode(data)
        .map_err(|e| Error::Decode(e.to_string()))?;

    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "odd payload length: {} bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect())
}

/// Coarse 0-100 loudness of a captured frame
///
/// Averages absolute magnitude over every [`LEVEL_STRIDE`]th sample to keep
/// the per-frame cost negligible. Visualization aid only; never used for
/// control decisions.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn input_level(samples: &[i16]) -> u8 {
    let mut sum = 0.0f32;
    let mut count = 0u32;
    for sample in samples.iter().step_by(LEVEL_STRIDE) {
        sum += f32::from(*sample).abs();
        count += 1;
    }
    if count == 0 {
        return 0;
    }

    let avg = sum / count as f32;
    (avg / LEVEL_FULL_SCALE * 100.0).clamp(0.0, 100.0) as u8
}
