use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, warn};

use super::{LaneSequencer, TranslationSegment};
use crate::broadcast::SegmentEvent;
use crate::engine::retry::{call_once, call_with_retry};
use crate::engine::{RetryPolicy, TranslationEngine};
use crate::error::SessionError;
use crate::session::{Languages, SessionCounters, SessionKey};
use crate::transcribe::{SegmentMarker, TranscriptSegment};

struct JobOutcome {
    source: TranscriptSegment,
    /// Set for partial jobs so stale revisions can be recognised
    partial_job: Option<u64>,
    result: Result<String, SessionError>,
}

/// Translation lane for one target language.
///
/// Up to `max_in_flight` engine calls run concurrently; the sequencer puts
/// their results back into index order before they reach fan-out.
pub struct TranslationLane {
    session_key: SessionKey,
    lang: String,
    engine: Arc<dyn TranslationEngine>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
    languages: watch::Receiver<Languages>,
    counters: Arc<SessionCounters>,
    sequencer: LaneSequencer,
    jobs: JoinSet<JobOutcome>,
    /// In-flight partial job per transcript index
    partial_jobs: HashMap<u64, (u64, AbortHandle)>,
    next_job: u64,
}

impl TranslationLane {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_key: SessionKey,
        lang: String,
        engine: Arc<dyn TranslationEngine>,
        policy: RetryPolicy,
        max_in_flight: usize,
        start_index: u64,
        languages: watch::Receiver<Languages>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            session_key,
            lang,
            engine,
            policy,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            languages,
            counters,
            sequencer: LaneSequencer::new(start_index),
            jobs: JoinSet::new(),
            partial_jobs: HashMap::new(),
            next_job: 0,
        }
    }

    /// Translate transcript segments until the input closes and every job
    /// has finished, or until shutdown. Dropping the lane aborts its jobs.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<TranscriptSegment>,
        out: mpsc::Sender<SegmentEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            "Translation lane {} started for session {} at index {}",
            self.lang,
            self.session_key,
            self.sequencer.next_index()
        );

        let mut input_open = true;
        loop {
            if !input_open && self.jobs.is_empty() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,

                segment = input.recv(), if input_open => match segment {
                    Some(segment) => {
                        if !self.on_transcript(segment, &out).await {
                            break;
                        }
                    }
                    None => input_open = false,
                },

                Some(joined) = self.jobs.join_next(), if !self.jobs.is_empty() => {
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        // aborted partial
                        Err(_) => continue,
                    };
                    if !self.on_outcome(outcome, &out).await {
                        break;
                    }
                }
            }
        }

        self.jobs.abort_all();
        info!(
            "Translation lane {} stopped for session {}",
            self.lang, self.session_key
        );
    }

    async fn on_transcript(
        &mut self,
        segment: TranscriptSegment,
        out: &mpsc::Sender<SegmentEvent>,
    ) -> bool {
        if segment.is_final {
            self.sequencer.transcript_finalized(segment.index);
            if let Some((_, handle)) = self.partial_jobs.remove(&segment.index) {
                handle.abort();
            }

            if segment.marker == Some(SegmentMarker::Unrecognized) {
                // Nothing to translate: pass the marker through in order
                let passthrough = self.segment(&segment, segment.text.clone(), segment.marker);
                return self.release(passthrough, out).await;
            }

            self.spawn_final(segment);
            return true;
        }

        if self.sequencer.is_finalized(segment.index) {
            return true;
        }
        self.spawn_partial(segment);
        true
    }

    fn spawn_final(&mut self, source: TranscriptSegment) {
        let engine = Arc::clone(&self.engine);
        let permits = Arc::clone(&self.permits);
        let counters = Arc::clone(&self.counters);
        let policy = self.policy.clone();
        let source_lang = self.languages.borrow().source_lang.clone();
        let target = self.lang.clone();
        let what = format!("translation to {}", self.lang);

        self.jobs.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => {
                    call_with_retry(
                        &policy,
                        &what,
                        || {
                            let engine = Arc::clone(&engine);
                            let text = source.text.clone();
                            let source_lang = source_lang.clone();
                            let target = target.clone();
                            async move { engine.translate(&text, &source_lang, &target).await }
                        },
                        |_| SessionCounters::incr(&counters.translation_retries),
                    )
                    .await
                }
                Err(_) => Err(SessionError::InvalidRequest("lane closed".to_string())),
            };
            JobOutcome {
                source,
                partial_job: None,
                result,
            }
        });
    }

    fn spawn_partial(&mut self, source: TranscriptSegment) {
        let job = self.next_job;
        self.next_job += 1;

        // A newer revision makes the older one pointless
        if let Some((_, handle)) = self.partial_jobs.remove(&source.index) {
            handle.abort();
        }

        let engine = Arc::clone(&self.engine);
        let permits = Arc::clone(&self.permits);
        let timeout = self.policy.timeout;
        let source_lang = self.languages.borrow().source_lang.clone();
        let target = self.lang.clone();
        let index = source.index;

        let handle = self.jobs.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => call_once(timeout, engine.translate(&source.text, &source_lang, &target))
                    .await
                    .map_err(SessionError::from),
                Err(_) => Err(SessionError::InvalidRequest("lane closed".to_string())),
            };
            JobOutcome {
                source,
                partial_job: Some(job),
                result,
            }
        });
        self.partial_jobs.insert(index, (job, handle));
    }

    async fn on_outcome(&mut self, outcome: JobOutcome, out: &mpsc::Sender<SegmentEvent>) -> bool {
        let JobOutcome {
            source,
            partial_job,
            result,
        } = outcome;

        if let Some(job) = partial_job {
            match self.partial_jobs.get(&source.index) {
                Some((current, _)) if *current == job => {
                    self.partial_jobs.remove(&source.index);
                }
                _ => return true,
            }
            return match result {
                Ok(text) => {
                    let segment = self.segment(&source, text, None);
                    self.release(segment, out).await
                }
                Err(e) => {
                    debug!(
                        "Session {}: partial translation {} of {} failed: {}",
                        self.session_key, self.lang, source.index, e
                    );
                    true
                }
            };
        }

        let segment = match result {
            Ok(text) => self.segment(&source, text, None),
            Err(e) => {
                warn!(
                    "Session {}: segment {} left untranslated for {}: {}",
                    self.session_key, source.index, self.lang, e
                );
                SessionCounters::incr(&self.counters.untranslated_segments);
                self.segment(&source, source.text.clone(), Some(SegmentMarker::Untranslated))
            }
        };
        self.release(segment, out).await
    }

    fn segment(
        &self,
        source: &TranscriptSegment,
        text: String,
        marker: Option<SegmentMarker>,
    ) -> TranslationSegment {
        TranslationSegment {
            session_key: self.session_key.clone(),
            index: source.index,
            lang: self.lang.clone(),
            text,
            is_final: source.is_final,
            marker,
            start_ms: source.start_ms,
            end_ms: source.end_ms,
        }
    }

    /// Hand a finished translation to the sequencer and forward whatever it releases
    async fn release(&mut self, segment: TranslationSegment, out: &mpsc::Sender<SegmentEvent>) -> bool {
        for ready in self.sequencer.offer(segment) {
            SessionCounters::incr(&self.counters.translation_segments);
            if out.send(SegmentEvent::from(ready)).await.is_err() {
                return false;
            }
        }
        true
    }
}
