// Slices broadcaster audio into fixed-duration frames
//
// Broadcasters send chunks of arbitrary size, rate and channel count, with
// irregular spacing. The framer normalises every chunk to mono at the target
// rate and cuts the result into frames of exactly `frame_ms`. Frame
// timestamps come from the capture timestamps carried by the chunks, so
// network jitter never shifts them.

use tracing::debug;

use super::frame::{resample, to_mono, AudioFrame};

/// A chunk of audio as received from the broadcaster
#[derive(Debug, Clone)]
pub struct IncomingAudio {
    /// Interleaved i16 PCM
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Capture time of the first sample; derived from the running sample count when absent
    pub timestamp_ms: Option<u64>,
}

pub struct Framer {
    sample_rate: u32,
    frame_ms: u32,
    frame_samples: usize,
    pending: Vec<i16>,
    pending_start_ms: Option<u64>,
    next_sequence: u64,
}

impl Framer {
    pub fn new(sample_rate: u32, frame_ms: u32) -> Self {
        let frame_samples = (sample_rate as usize * frame_ms as usize) / 1000;
        Self {
            sample_rate,
            frame_ms,
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
            pending_start_ms: None,
            next_sequence: 0,
        }
    }

    /// Continue numbering after a reconnect so sequence numbers stay monotonic per session
    pub fn with_next_sequence(mut self, next_sequence: u64) -> Self {
        self.next_sequence = next_sequence;
        self
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Capture time the next sample is expected at
    fn expected_ms(&self) -> Option<u64> {
        self.pending_start_ms
            .map(|start| start.saturating_add(self.samples_to_ms(self.pending.len())))
    }

    fn samples_to_ms(&self, samples: usize) -> u64 {
        samples as u64 * 1000 / self.sample_rate as u64
    }

    /// Normalise a chunk and return every frame it completes
    pub fn push(&mut self, chunk: IncomingAudio) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        if chunk.samples.is_empty() || chunk.sample_rate == 0 {
            return frames;
        }

        let mono = to_mono(&chunk.samples, chunk.channels);
        let normalized = resample(&mono, chunk.sample_rate, self.sample_rate);

        match (chunk.timestamp_ms, self.expected_ms()) {
            (Some(ts), Some(expected)) if ts > expected.saturating_add(self.frame_ms as u64) => {
                // Capture gap (lost packets): pad the open frame with silence
                debug!(
                    "Capture gap of {}ms before {}ms, padding open frame",
                    ts - expected,
                    ts
                );
                if let Some(frame) = self.flush() {
                    frames.push(frame);
                }
                self.pending_start_ms = Some(ts);
            }
            (Some(ts), None) => self.pending_start_ms = Some(ts),
            (None, None) => self.pending_start_ms = Some(0),
            _ => {}
        }

        self.pending.extend_from_slice(&normalized);

        while self.pending.len() >= self.frame_samples {
            let samples: Vec<i16> = self.pending.drain(..self.frame_samples).collect();
            frames.push(self.emit(samples));
        }

        if self.pending.is_empty() && chunk.timestamp_ms.is_some() {
            // Next chunk re-anchors on its own capture timestamp
            self.pending_start_ms = None;
        }

        frames
    }

    /// Emit the partially filled frame, padded with silence
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let mut samples = std::mem::take(&mut self.pending);
        samples.resize(self.frame_samples, 0);
        let frame = self.emit(samples);
        self.pending_start_ms = None;
        Some(frame)
    }

    fn emit(&mut self, samples: Vec<i16>) -> AudioFrame {
        let timestamp_ms = self.pending_start_ms.unwrap_or(0);
        self.pending_start_ms = Some(timestamp_ms.saturating_add(self.frame_ms as u64));

        let frame = AudioFrame {
            sequence: self.next_sequence,
            samples,
            sample_rate: self.sample_rate,
            channels: 1,
            timestamp_ms,
        };
        self.next_sequence += 1;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(samples: usize, rate: u32, channels: u16, ts: Option<u64>) -> IncomingAudio {
        IncomingAudio {
            samples: vec![100; samples],
            sample_rate: rate,
            channels,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn test_exact_frames() {
        let mut framer = Framer::new(16000, 20);
        let frames = framer.push(chunk(640, 16000, 1, Some(1000)));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[0].timestamp_ms, 1000);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(frames[1].timestamp_ms, 1020);
        assert!(frames.iter().all(|f| f.samples.len() == 320));
    }

    #[test]
    fn test_partial_chunks_accumulate() {
        let mut framer = Framer::new(16000, 20);
        assert!(framer.push(chunk(200, 16000, 1, Some(0))).is_empty());
        let frames = framer.push(chunk(200, 16000, 1, Some(12)));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp_ms, 0);
    }

    #[test]
    fn test_timestamps_follow_capture_not_arrival() {
        let mut framer = Framer::new(16000, 20);
        // Chunks arrive in a burst but carry their capture times
        let a = framer.push(chunk(320, 16000, 1, Some(5000)));
        let b = framer.push(chunk(320, 16000, 1, Some(5020)));
        let c = framer.push(chunk(320, 16000, 1, Some(5040)));
        let stamps: Vec<u64> = a.iter().chain(&b).chain(&c).map(|f| f.timestamp_ms).collect();
        assert_eq!(stamps, vec![5000, 5020, 5040]);
    }

    #[test]
    fn test_stereo_48k_normalised() {
        let mut framer = Framer::new(16000, 20);
        // 20ms of 48kHz stereo = 1920 interleaved samples
        let frames = framer.push(chunk(1920, 48000, 2, Some(0)));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].channels, 1);
        assert_eq!(frames[0].sample_rate, 16000);
        assert_eq!(frames[0].samples.len(), 320);
    }

    #[test]
    fn test_gap_pads_open_frame() {
        let mut framer = Framer::new(16000, 20);
        assert!(framer.push(chunk(160, 16000, 1, Some(0))).is_empty());
        let frames = framer.push(chunk(320, 16000, 1, Some(500)));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].timestamp_ms, 0);
        assert_eq!(&frames[0].samples[160..], &[0; 160][..]);
        assert_eq!(frames[1].timestamp_ms, 500);
    }

    #[test]
    fn test_missing_timestamps_use_sample_clock() {
        let mut framer = Framer::new(16000, 20);
        let frames = framer.push(chunk(960, 16000, 1, None));
        let stamps: Vec<u64> = frames.iter().map(|f| f.timestamp_ms).collect();
        assert_eq!(stamps, vec![0, 20, 40]);
        let more = framer.push(chunk(320, 16000, 1, None));
        assert_eq!(more[0].timestamp_ms, 60);
    }

    #[test]
    fn test_flush_pads_and_sequence_continues() {
        let mut framer = Framer::new(16000, 20).with_next_sequence(7);
        framer.push(chunk(100, 16000, 1, Some(0)));
        let frame = framer.flush().unwrap();
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.samples.len(), 320);
        assert!(framer.flush().is_none());
        assert_eq!(framer.next_sequence(), 8);
    }

    #[test]
    fn test_timestamps_near_clock_limit_saturate() {
        let mut framer = Framer::new(16000, 20);
        assert!(framer.push(chunk(100, 16000, 1, Some(u64::MAX - 3))).is_empty());
        let frames = framer.push(chunk(400, 16000, 1, Some(u64::MAX - 1)));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].timestamp_ms, u64::MAX - 3);
        assert_eq!(frames[0].end_ms(), u64::MAX);

        let last = framer.flush().unwrap();
        assert_eq!(last.timestamp_ms, u64::MAX);
    }
}
