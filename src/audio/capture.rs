//! Microphone capture pipeline
//!
//! The input device delivers callbacks of whatever size the host audio
//! engine prefers; the accumulator reblocks them into fixed-size 16-bit
//! frames and hands each one off immediately. At most one frame is ever in
//! flight toward the session loop, bounding both memory and latency.

use tokio::sync::mpsc;

/// Sample rate for audio capture (16kHz mono for speech)
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Samples per captured frame (32ms at 16kHz)
pub const FRAME_SAMPLES: usize = 512;

/// Reblocks device callbacks into fixed-size PCM frames
///
/// Runs on the capture device thread. Hand-off is non-blocking: if the
/// session loop has not yet drained the previous frame, the new one is
/// dropped rather than stalling the audio callback or buffering without
/// bound.
pub struct FrameAccumulator {
    pending: Vec<i16>,
    frames: mpsc::Sender<Vec<i16>>,
    dropped: u64,
}

impl FrameAccumulator {
    /// Create an accumulator feeding the given frame channel
    #[must_use]
    pub fn new(frames: mpsc::Sender<Vec<i16>>) -> Self {
        Self {
            pending: Vec::with_capacity(FRAME_SAMPLES),
            frames,
            dropped: 0,
        }
    }

    /// Feed one device callback's worth of samples
    pub fn push(&mut self, samples: &[f32]) {
        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let quantized = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            self.pending.push(quantized);

            if self.pending.len() == FRAME_SAMPLES {
                let frame = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(FRAME_SAMPLES),
                );
                if self.frames.try_send(frame).is_err() {
                    self.dropped += 1;
                    tracing::trace!(dropped = self.dropped, "capture frame dropped");
                }
            }
        }
    }

    /// Frames dropped because the previous one was still in flight
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reblocks_uneven_callbacks() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut acc = FrameAccumulator::new(tx);

        // Three callbacks that straddle a frame boundary
        acc.push(&vec![0.0; 300]);
        acc.push(&vec![0.0; 300]);
        assert_eq!(rx.try_recv().unwrap().len(), FRAME_SAMPLES);

        acc.push(&vec![0.0; FRAME_SAMPLES - 88]);
        assert_eq!(rx.try_recv().unwrap().len(), FRAME_SAMPLES);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_quantizes_with_clamp() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut acc = FrameAccumulator::new(tx);

        let mut samples = vec![0.0f32; FRAME_SAMPLES];
        samples[0] = 1.0;
        samples[1] = -1.0;
        samples[2] = 2.0; // out of range, clamps
        samples[3] = 0.5;
        acc.push(&samples);

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame[0], 32767);
        assert_eq!(frame[1], -32767);
        assert_eq!(frame[2], 32767);
        assert_eq!(frame[3], 16383);
    }

    #[test]
    fn test_drops_when_frame_in_flight() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut acc = FrameAccumulator::new(tx);

        acc.push(&vec![0.0; FRAME_SAMPLES * 3]);

        assert_eq!(acc.dropped(), 2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
