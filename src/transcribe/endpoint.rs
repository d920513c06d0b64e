//! Utterance endpointing.
//!
//! RMS-threshold voice activity detection driven by frame durations rather
//! than wall-clock time, so bursts of late frames endpoint exactly as if
//! they had arrived on schedule.

use crate::audio::{rms, AudioFrame};
use crate::config::TranscriptionConfig;

/// What the pipeline should do with the frame just processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointEvent {
    /// Not inside an utterance; the frame can be discarded
    Silence,
    /// First speech frame of a new utterance
    SpeechStart,
    /// Frame belongs to the open utterance
    Speech,
    /// Frame belongs to the open utterance and a partial hypothesis is due
    PartialDue,
    /// Frame closes the utterance; `forced` when the maximum length was hit
    UtteranceEnd { forced: bool },
    /// Utterance closed but was too short to be speech; drop its audio
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Speaking,
}

pub struct Endpointer {
    config: TranscriptionConfig,
    state: State,
    utterance_ms: u64,
    speech_ms: u64,
    silence_ms: u64,
    since_partial_ms: u64,
}

impl Endpointer {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            config,
            state: State::Idle,
            utterance_ms: 0,
            speech_ms: 0,
            silence_ms: 0,
            since_partial_ms: 0,
        }
    }

    pub fn in_utterance(&self) -> bool {
        self.state == State::Speaking
    }

    pub fn process(&mut self, frame: &AudioFrame) -> EndpointEvent {
        let duration = frame.duration_ms();
        let is_speech = rms(&frame.samples) > self.config.speech_threshold;

        match self.state {
            State::Idle => {
                if !is_speech {
                    return EndpointEvent::Silence;
                }
                self.state = State::Speaking;
                self.utterance_ms = duration;
                self.speech_ms = duration;
                self.silence_ms = 0;
                self.since_partial_ms = duration;
                EndpointEvent::SpeechStart
            }
            State::Speaking => {
                self.utterance_ms += duration;
                self.since_partial_ms += duration;
                if is_speech {
                    self.speech_ms += duration;
                    self.silence_ms = 0;
                } else {
                    self.silence_ms += duration;
                }

                if self.silence_ms >= self.config.silence_ms as u64 {
                    return self.close(false);
                }
                if self.utterance_ms >= self.config.max_utterance_ms as u64 {
                    return self.close(true);
                }
                if self.since_partial_ms >= self.config.partial_interval_ms as u64
                    && self.speech_ms >= self.config.min_speech_ms as u64
                {
                    self.since_partial_ms = 0;
                    return EndpointEvent::PartialDue;
                }
                EndpointEvent::Speech
            }
        }
    }

    /// Close the open utterance because audio stopped arriving
    pub fn flush(&mut self) -> Option<EndpointEvent> {
        match self.state {
            State::Idle => None,
            State::Speaking => Some(self.close(false)),
        }
    }

    fn close(&mut self, forced: bool) -> EndpointEvent {
        let long_enough = self.speech_ms >= self.config.min_speech_ms as u64;
        self.reset();
        if long_enough {
            EndpointEvent::UtteranceEnd { forced }
        } else {
            EndpointEvent::Discard
        }
    }

    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.utterance_ms = 0;
        self.speech_ms = 0;
        self.silence_ms = 0;
        self.since_partial_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TranscriptionConfig {
        TranscriptionConfig {
            speech_threshold: 0.02,
            silence_ms: 100,
            min_speech_ms: 60,
            partial_interval_ms: 200,
            max_utterance_ms: 1000,
        }
    }

    fn frame(loud: bool) -> AudioFrame {
        AudioFrame {
            sequence: 0,
            samples: vec![if loud { 8000 } else { 0 }; 320],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_silence_stays_idle() {
        let mut ep = Endpointer::new(config());
        for _ in 0..10 {
            assert_eq!(ep.process(&frame(false)), EndpointEvent::Silence);
        }
        assert!(!ep.in_utterance());
    }

    #[test]
    fn test_utterance_ends_after_trailing_silence() {
        let mut ep = Endpointer::new(config());
        assert_eq!(ep.process(&frame(true)), EndpointEvent::SpeechStart);
        for _ in 0..4 {
            assert_eq!(ep.process(&frame(true)), EndpointEvent::Speech);
        }
        // 100ms of silence = 5 frames of 20ms
        for _ in 0..4 {
            assert_eq!(ep.process(&frame(false)), EndpointEvent::Speech);
        }
        assert_eq!(
            ep.process(&frame(false)),
            EndpointEvent::UtteranceEnd { forced: false }
        );
        assert!(!ep.in_utterance());
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut ep = Endpointer::new(config());
        assert_eq!(ep.process(&frame(true)), EndpointEvent::SpeechStart);
        let mut last = EndpointEvent::Speech;
        for _ in 0..5 {
            last = ep.process(&frame(false));
        }
        assert_eq!(last, EndpointEvent::Discard);
    }

    #[test]
    fn test_partial_due_on_interval() {
        let mut ep = Endpointer::new(config());
        ep.process(&frame(true));
        let events: Vec<EndpointEvent> = (0..20).map(|_| ep.process(&frame(true))).collect();
        let partials = events
            .iter()
            .filter(|e| **e == EndpointEvent::PartialDue)
            .count();
        // 21 frames * 20ms = 420ms of speech, one partial every 200ms
        assert_eq!(partials, 2);
    }

    #[test]
    fn test_long_utterance_is_forced_closed() {
        let mut ep = Endpointer::new(config());
        ep.process(&frame(true));
        let mut forced = false;
        for _ in 0..60 {
            if ep.process(&frame(true)) == (EndpointEvent::UtteranceEnd { forced: true }) {
                forced = true;
                break;
            }
        }
        assert!(forced);
    }

    #[test]
    fn test_flush_closes_open_utterance() {
        let mut ep = Endpointer::new(config());
        assert!(ep.flush().is_none());
        for _ in 0..5 {
            ep.process(&frame(true));
        }
        assert_eq!(ep.flush(), Some(EndpointEvent::UtteranceEnd { forced: false }));
        assert!(ep.flush().is_none());
    }
}
