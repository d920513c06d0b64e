use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::TranslationLane;
use crate::broadcast::SegmentEvent;
use crate::engine::{RetryPolicy, TranslationEngine};
use crate::session::{Languages, SessionCounters, SessionKey};
use crate::transcribe::TranscriptSegment;

struct LaneHandle {
    tx: mpsc::Sender<TranscriptSegment>,
    task: JoinHandle<()>,
}

/// Fans transcript segments out to one lane per target language.
///
/// Every transcript event is handed to fan-out before any lane sees the
/// segment, so a translation can never overtake its transcript. Lanes are
/// added and removed as the session's target languages change; a new lane
/// starts at the next unassigned index.
pub struct TranslationRouter {
    session_key: SessionKey,
    engine: Arc<dyn TranslationEngine>,
    policy: RetryPolicy,
    max_in_flight: usize,
    queue_size: usize,
    languages: watch::Receiver<Languages>,
    counters: Arc<SessionCounters>,
    out: mpsc::Sender<SegmentEvent>,
    shutdown: watch::Receiver<bool>,
    lanes: HashMap<String, LaneHandle>,
    /// Index after the last final transcript
    head_index: u64,
}

impl TranslationRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_key: SessionKey,
        engine: Arc<dyn TranslationEngine>,
        policy: RetryPolicy,
        max_in_flight: usize,
        queue_size: usize,
        languages: watch::Receiver<Languages>,
        counters: Arc<SessionCounters>,
        out: mpsc::Sender<SegmentEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session_key,
            engine,
            policy,
            max_in_flight,
            queue_size: queue_size.max(1),
            languages,
            counters,
            out,
            shutdown,
            lanes: HashMap::new(),
            head_index: 0,
        }
    }

    pub async fn run(mut self, mut input: mpsc::Receiver<TranscriptSegment>) {
        info!("Translation router started for session {}", self.session_key);
        self.reconcile_lanes();

        let mut shutdown = self.shutdown.clone();
        let mut languages_open = true;
        let mut stopped = false;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    stopped = true;
                    break;
                }

                changed = self.languages.changed(), if languages_open => {
                    if changed.is_ok() {
                        self.reconcile_lanes();
                    } else {
                        languages_open = false;
                    }
                }

                segment = input.recv() => match segment {
                    Some(segment) => {
                        if !self.route(segment).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        let lanes: Vec<LaneHandle> = self.lanes.drain().map(|(_, lane)| lane).collect();
        for lane in lanes {
            drop(lane.tx);
            if stopped {
                lane.task.abort();
            } else {
                // Let in-flight translations finish once transcription is done
                let _ = lane.task.await;
            }
        }
        info!("Translation router stopped for session {}", self.session_key);
    }

    async fn route(&mut self, segment: TranscriptSegment) -> bool {
        if self.languages.has_changed().unwrap_or(false) {
            self.reconcile_lanes();
        }

        let source_lang = self.languages.borrow().source_lang.clone();
        if self
            .out
            .send(SegmentEvent::transcript(&segment, &source_lang))
            .await
            .is_err()
        {
            return false;
        }

        if segment.is_final {
            self.head_index = self.head_index.max(segment.index + 1);
        }

        for (lang, lane) in &self.lanes {
            if segment.is_final {
                // Finals are never dropped; wait for the lane to make room
                if lane.tx.send(segment.clone()).await.is_err() {
                    debug!(
                        "Session {}: lane {} closed before segment {}",
                        self.session_key, lang, segment.index
                    );
                }
            } else if let Err(TrySendError::Full(_)) = lane.tx.try_send(segment.clone()) {
                SessionCounters::incr(&self.counters.partials_dropped);
            }
        }
        true
    }

    /// Match the running lanes to the current target languages
    fn reconcile_lanes(&mut self) {
        let targets = self.languages.borrow_and_update().target_langs.clone();

        let removed: Vec<String> = self
            .lanes
            .keys()
            .filter(|lang| !targets.contains(lang))
            .cloned()
            .collect();
        for lang in removed {
            if let Some(lane) = self.lanes.remove(&lang) {
                lane.task.abort();
                info!("Session {}: translation lane {} removed", self.session_key, lang);
            }
        }

        for lang in targets {
            if self.lanes.contains_key(&lang) {
                continue;
            }
            let (tx, rx) = mpsc::channel(self.queue_size);
            let lane = TranslationLane::new(
                self.session_key.clone(),
                lang.clone(),
                Arc::clone(&self.engine),
                self.policy.clone(),
                self.max_in_flight,
                self.head_index,
                self.languages.clone(),
                Arc::clone(&self.counters),
            );
            let task = tokio::spawn(lane.run(rx, self.out.clone(), self.shutdown.clone()));
            self.lanes.insert(lang, LaneHandle { tx, task });
        }
    }
}
