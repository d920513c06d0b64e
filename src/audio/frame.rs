/// Fixed-duration block of normalised audio (16-bit PCM, mono after framing)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Monotonic per-session sequence number
    pub sequence: u64,
    /// Raw audio samples (i16 PCM, interleaved when channels > 1)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Capture time of the first sample, in milliseconds on the broadcaster's clock
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration covered by the samples in this frame
    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() as u64 / self.channels.max(1) as u64;
        per_channel * 1000 / self.sample_rate.max(1) as u64
    }

    /// Capture time just after the last sample
    pub fn end_ms(&self) -> u64 {
        self.timestamp_ms.saturating_add(self.duration_ms())
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels
pub fn to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Resample mono audio by linear interpolation.
///
/// Broadcasters send 44.1kHz or 48kHz; decimation only works for integer
/// ratios, so interpolate between neighbouring samples instead.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            let frac = pos - idx as f64;
            let a = samples[idx.min(last)] as f64;
            let b = samples[(idx + 1).min(last)] as f64;
            (a + (b - a) * frac)
                .round()
                .clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect()
}

/// Root Mean Square level of the samples, normalised to 0.0..=1.0
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame {
            sequence: 0,
            samples: vec![0; 320],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 1000,
        };
        assert_eq!(frame.duration_ms(), 20);
        assert_eq!(frame.end_ms(), 1020);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let stereo = vec![100, 300, -200, -400, i16::MAX, i16::MAX];
        assert_eq!(to_mono(&stereo, 2), vec![200, -300, i16::MAX]);
    }

    #[test]
    fn test_mono_passthrough() {
        let mono = vec![1, 2, 3];
        assert_eq!(to_mono(&mono, 1), mono);
    }

    #[test]
    fn test_resample_48k_to_16k_length() {
        let input = vec![0i16; 960]; // 20ms at 48kHz
        assert_eq!(resample(&input, 48000, 16000).len(), 320);
    }

    #[test]
    fn test_resample_44k_to_16k_length() {
        let input = vec![0i16; 4410]; // 100ms at 44.1kHz
        assert_eq!(resample(&input, 44100, 16000).len(), 1600);
    }

    #[test]
    fn test_resample_interpolates() {
        let input = vec![0, 100];
        let out = resample(&input, 1, 2);
        assert_eq!(out, vec![0, 50, 100, 100]);
    }

    #[test]
    fn test_rms_silence_and_full_scale() {
        assert_eq!(rms(&[0; 100]), 0.0);
        assert!((rms(&[i16::MAX; 100]) - 1.0).abs() < 0.001);
        assert_eq!(rms(&[]), 0.0);
    }
}
