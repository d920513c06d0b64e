use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::endpoint::{EndpointEvent, Endpointer};
use super::{SegmentMarker, TranscriptSegment, UNRECOGNIZED_TEXT};
use crate::audio::{AudioFrame, FrameQueue};
use crate::config::TranscriptionConfig;
use crate::engine::retry::{call_once, call_with_retry};
use crate::engine::{RecognitionRequest, RetryPolicy, SpeechEngine};
use crate::error::EngineError;
use crate::session::{Languages, SessionCounters, SessionKey};

/// Audio of the utterance currently being spoken
#[derive(Default)]
struct Utterance {
    samples: Vec<i16>,
    start_ms: u64,
    end_ms: u64,
}

impl Utterance {
    fn push(&mut self, frame: &AudioFrame) {
        if self.samples.is_empty() {
            self.start_ms = frame.timestamp_ms;
        }
        self.samples.extend_from_slice(&frame.samples);
        self.end_ms = frame.end_ms();
    }
}

struct PartialResult {
    index: u64,
    generation: u64,
    result: Result<String, EngineError>,
}

/// Per-session transcription stage.
///
/// Final recognition runs inline with bounded retries; partial hypotheses run
/// as a side task (at most one in flight) so they never delay endpointing.
/// A partial whose index has already been finalised is discarded on arrival.
pub struct TranscriptionStage {
    session_key: SessionKey,
    engine: Arc<dyn SpeechEngine>,
    policy: RetryPolicy,
    sample_rate: u32,
    idle_flush: Duration,
    languages: watch::Receiver<Languages>,
    /// `true` while a broadcaster is attached
    attached: watch::Receiver<bool>,
    counters: Arc<SessionCounters>,
    endpointer: Endpointer,
    utterance: Utterance,
    next_index: u64,
    /// Bumped whenever an utterance is finalised or discarded
    generation: u64,
    partial_emitted: bool,
    partial_task: Option<JoinHandle<()>>,
    partial_tx: mpsc::Sender<PartialResult>,
    partial_rx: mpsc::Receiver<PartialResult>,
}

impl TranscriptionStage {
    pub fn new(
        session_key: SessionKey,
        engine: Arc<dyn SpeechEngine>,
        policy: RetryPolicy,
        config: TranscriptionConfig,
        sample_rate: u32,
        languages: watch::Receiver<Languages>,
        attached: watch::Receiver<bool>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        let (partial_tx, partial_rx) = mpsc::channel(4);
        Self {
            session_key,
            engine,
            policy,
            sample_rate,
            idle_flush: Duration::from_millis(config.silence_ms.max(1) as u64),
            languages,
            attached,
            counters,
            endpointer: Endpointer::new(config),
            utterance: Utterance::default(),
            next_index: 0,
            generation: 0,
            partial_emitted: false,
            partial_task: None,
            partial_tx,
            partial_rx,
        }
    }

    /// Run until the frame queue closes, the output is dropped, or shutdown is signalled
    pub async fn run(
        mut self,
        frames: Arc<FrameQueue>,
        out: mpsc::Sender<TranscriptSegment>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Transcription stage started for session {}", self.session_key);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,

                Some(partial) = self.partial_rx.recv() => {
                    if !self.on_partial(partial, &out).await {
                        break;
                    }
                }

                popped = tokio::time::timeout(self.idle_flush, frames.pop()) => {
                    let keep_going = match popped {
                        Ok(Some(frame)) => self.on_frame(frame, &out, &mut shutdown).await,
                        Ok(None) => false,
                        // Arrival gaps are jitter while the broadcaster is attached
                        Err(_) if *self.attached.borrow() => true,
                        // Broadcaster gone mid-utterance: close it
                        Err(_) => self.flush_open_utterance(&out, &mut shutdown).await,
                    };
                    if !keep_going {
                        break;
                    }
                }
            }
        }

        if let Some(task) = self.partial_task.take() {
            task.abort();
        }
        info!(
            "Transcription stage stopped for session {} ({} final segments)",
            self.session_key, self.next_index
        );
    }

    async fn flush_open_utterance(
        &mut self,
        out: &mpsc::Sender<TranscriptSegment>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        match self.endpointer.flush() {
            Some(EndpointEvent::UtteranceEnd { .. }) => self.finalize(out, shutdown).await,
            Some(_) => {
                self.discard();
                true
            }
            None => true,
        }
    }

    async fn on_frame(
        &mut self,
        frame: AudioFrame,
        out: &mpsc::Sender<TranscriptSegment>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        match self.endpointer.process(&frame) {
            EndpointEvent::Silence => true,
            EndpointEvent::SpeechStart | EndpointEvent::Speech => {
                self.utterance.push(&frame);
                true
            }
            EndpointEvent::PartialDue => {
                self.utterance.push(&frame);
                self.request_partial();
                true
            }
            EndpointEvent::UtteranceEnd { forced } => {
                self.utterance.push(&frame);
                if forced {
                    debug!(
                        "Session {}: utterance {} hit the maximum length",
                        self.session_key, self.next_index
                    );
                }
                self.finalize(out, shutdown).await
            }
            EndpointEvent::Discard => {
                self.discard();
                true
            }
        }
    }

    fn source_language(&self) -> String {
        self.languages.borrow().source_lang.clone()
    }

    fn request(&self, samples: Arc<[i16]>, partial: bool) -> RecognitionRequest {
        RecognitionRequest {
            samples,
            sample_rate: self.sample_rate,
            language: self.source_language(),
            partial,
        }
    }

    fn request_partial(&mut self) {
        if self.partial_task.as_ref().is_some_and(|t| !t.is_finished())
            || self.utterance.samples.is_empty()
        {
            return;
        }

        let request = self.request(Arc::from(self.utterance.samples.as_slice()), true);
        let engine = Arc::clone(&self.engine);
        let tx = self.partial_tx.clone();
        let index = self.next_index;
        let generation = self.generation;
        let timeout = self.policy.timeout;

        self.partial_task = Some(tokio::spawn(async move {
            let result = call_once(timeout, engine.recognize(&request)).await;
            let _ = tx
                .send(PartialResult {
                    index,
                    generation,
                    result,
                })
                .await;
        }));
    }

    async fn on_partial(
        &mut self,
        partial: PartialResult,
        out: &mpsc::Sender<TranscriptSegment>,
    ) -> bool {
        if partial.index != self.next_index
            || partial.generation != self.generation
            || !self.endpointer.in_utterance()
        {
            debug!(
                "Session {}: discarding late partial for finalised segment {}",
                self.session_key, partial.index
            );
            return true;
        }

        match partial.result {
            Ok(text) if !text.is_empty() => {
                let segment = TranscriptSegment {
                    session_key: self.session_key.clone(),
                    index: partial.index,
                    text,
                    start_ms: self.utterance.start_ms,
                    end_ms: self.utterance.end_ms,
                    is_final: false,
                    marker: None,
                };
                self.partial_emitted = true;
                self.emit(out, segment).await
            }
            Ok(_) => true,
            Err(e) => {
                debug!(
                    "Session {}: partial recognition for {} failed: {}",
                    self.session_key, partial.index, e
                );
                true
            }
        }
    }

    fn discard(&mut self) {
        if let Some(task) = self.partial_task.take() {
            task.abort();
        }
        self.utterance = Utterance::default();
        self.generation += 1;
    }

    /// Recognise the closed utterance and emit its final segment.
    /// Returns false when the stage should stop.
    async fn finalize(
        &mut self,
        out: &mpsc::Sender<TranscriptSegment>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        if let Some(task) = self.partial_task.take() {
            task.abort();
        }

        let utterance = std::mem::take(&mut self.utterance);
        self.generation += 1;
        if utterance.samples.is_empty() {
            return true;
        }

        let request = self.request(Arc::from(utterance.samples), false);
        let engine = Arc::clone(&self.engine);
        let counters = Arc::clone(&self.counters);
        let call = call_with_retry(
            &self.policy,
            "transcription",
            || {
                let engine = Arc::clone(&engine);
                let request = request.clone();
                async move { engine.recognize(&request).await }
            },
            |_| SessionCounters::incr(&counters.transcription_retries),
        );

        let result = tokio::select! {
            result = call => result,
            _ = shutdown.changed() => return false,
        };

        let (text, marker) = match result {
            Ok(text) => (text, None),
            Err(e) => {
                warn!(
                    "Session {}: segment {} unrecognized: {}",
                    self.session_key, self.next_index, e
                );
                SessionCounters::incr(&self.counters.unrecognized_segments);
                (UNRECOGNIZED_TEXT.to_string(), Some(SegmentMarker::Unrecognized))
            }
        };

        if text.is_empty() && !self.partial_emitted {
            // Nothing was said and nothing was shown: reuse the index
            debug!(
                "Session {}: empty recognition, index {} reused",
                self.session_key, self.next_index
            );
            return true;
        }

        let segment = TranscriptSegment {
            session_key: self.session_key.clone(),
            index: self.next_index,
            text,
            start_ms: utterance.start_ms,
            end_ms: utterance.end_ms,
            is_final: true,
            marker,
        };
        self.next_index += 1;
        self.partial_emitted = false;
        self.emit(out, segment).await
    }

    async fn emit(&self, out: &mpsc::Sender<TranscriptSegment>, segment: TranscriptSegment) -> bool {
        debug!(
            "Session {}: transcript {} (final={}): {}",
            self.session_key, segment.index, segment.is_final, segment.text
        );
        SessionCounters::incr(&self.counters.transcript_segments);
        out.send(segment).await.is_ok()
    }
}
