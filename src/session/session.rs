use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info};

use super::config::{Languages, PipelineSettings};
use super::key::SessionKey;
use super::state::SessionState;
use super::stats::{SessionCounters, SessionStats};
use crate::audio::{AudioFrame, FrameQueue, PushOutcome};
use crate::broadcast::{Broadcaster, Subscription, SubscriptionOptions};
use crate::engine::Engines;
use crate::error::SessionError;
use crate::nats::NatsClient;
use crate::transcribe::TranscriptionStage;
use crate::translate::TranslationRouter;

struct SessionInner {
    state: SessionState,
    /// Epoch of the attached broadcaster connection, if any
    broadcaster: Option<u64>,
    next_epoch: u64,
    last_activity: Instant,
    /// Sequence number for the next frame, kept across reconnects
    next_sequence: u64,
    grace_timer: Option<AbortHandle>,
}

/// A live translation session and its pipeline.
///
/// Owned by the registry. All state changes go through the lifecycle
/// controller; the pipeline stages only see the session's queues, the
/// language watch and the shutdown signal.
pub struct Session {
    key: SessionKey,
    created_at: DateTime<Utc>,
    settings: PipelineSettings,
    inner: Mutex<SessionInner>,
    languages: watch::Sender<Languages>,
    /// Mirrors whether a broadcaster is attached, for the transcription stage
    attached: watch::Sender<bool>,
    frames: Arc<FrameQueue>,
    broadcaster: Arc<Broadcaster>,
    counters: Arc<SessionCounters>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        key: SessionKey,
        languages: Languages,
        settings: PipelineSettings,
        nats: Option<NatsClient>,
    ) -> Self {
        let counters = Arc::new(SessionCounters::default());
        let broadcaster = Arc::new(Broadcaster::new(
            key.clone(),
            settings.session.subscriber_queue,
            settings.session.replay_buffer,
            Arc::clone(&counters),
            nats,
        ));
        let frames = Arc::new(FrameQueue::new(settings.audio.ingest_queue_frames));
        let (languages, _) = watch::channel(languages);
        let (shutdown, _) = watch::channel(false);
        let (attached, _) = watch::channel(false);

        Self {
            key,
            created_at: Utc::now(),
            settings,
            inner: Mutex::new(SessionInner {
                state: SessionState::Created,
                broadcaster: None,
                next_epoch: 0,
                last_activity: Instant::now(),
                next_sequence: 0,
                grace_timer: None,
            }),
            languages,
            attached,
            frames,
            broadcaster,
            counters,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the transcription, translation and fan-out stages
    pub fn start(&self, engines: &Engines) {
        let queue = self.settings.session.stage_queue.max(1);
        let (transcript_tx, transcript_rx) = mpsc::channel(queue);
        let (event_tx, event_rx) = mpsc::channel(queue);

        let transcription = TranscriptionStage::new(
            self.key.clone(),
            Arc::clone(&engines.speech),
            self.settings.retry.clone(),
            self.settings.transcription.clone(),
            self.settings.audio.sample_rate,
            self.languages.subscribe(),
            self.attached.subscribe(),
            Arc::clone(&self.counters),
        );
        let router = TranslationRouter::new(
            self.key.clone(),
            Arc::clone(&engines.translation),
            self.settings.retry.clone(),
            self.settings.max_in_flight,
            queue,
            self.languages.subscribe(),
            Arc::clone(&self.counters),
            event_tx,
            self.shutdown.subscribe(),
        );

        let handles = vec![
            tokio::spawn(transcription.run(
                Arc::clone(&self.frames),
                transcript_tx,
                self.shutdown.subscribe(),
            )),
            tokio::spawn(router.run(transcript_rx)),
            tokio::spawn(Arc::clone(&self.broadcaster).run(event_rx)),
        ];

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);

        debug!("Pipeline started for session {}", self.key);
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn languages(&self) -> Languages {
        self.languages.borrow().clone()
    }

    /// Follow language changes
    pub fn watch_languages(&self) -> watch::Receiver<Languages> {
        self.languages.subscribe()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn counters(&self) -> &Arc<SessionCounters> {
        &self.counters
    }

    /// Time since the last media frame (or since creation)
    pub fn idle_for(&self) -> std::time::Duration {
        self.lock().last_activity.elapsed()
    }

    /// Flips to `true` once the session has ended
    pub fn ended(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn has_broadcaster(&self) -> bool {
        self.lock().broadcaster.is_some()
    }

    fn transition(
        &self,
        inner: &mut SessionInner,
        next: SessionState,
    ) -> Result<SessionState, SessionError> {
        let previous = inner.state;
        if previous == next {
            return Ok(previous);
        }
        if !previous.can_transition_to(next) {
            return Err(SessionError::InvalidState {
                operation: "change state",
                state: previous,
            });
        }
        inner.state = next;
        info!("Session {}: {} -> {}", self.key, previous, next);
        Ok(previous)
    }

    /// Attach a broadcaster connection and return its epoch
    pub(crate) fn attach_broadcaster(&self) -> Result<u64, SessionError> {
        let mut inner = self.lock();
        if !inner.state.accepts_broadcaster() {
            return Err(SessionError::InvalidState {
                operation: "attach a broadcaster",
                state: inner.state,
            });
        }
        if inner.broadcaster.is_some() {
            return Err(SessionError::SessionConflict(self.key.clone()));
        }

        if inner.state == SessionState::BroadcasterDisconnected {
            self.transition(&mut inner, SessionState::Active)?;
        }
        if let Some(timer) = inner.grace_timer.take() {
            timer.abort();
        }

        let epoch = inner.next_epoch;
        inner.next_epoch += 1;
        inner.broadcaster = Some(epoch);
        inner.last_activity = Instant::now();
        self.attached.send_replace(true);
        Ok(epoch)
    }

    /// Detach the broadcaster with `epoch`. Returns true when the session
    /// moved to `broadcaster_disconnected` and a grace timer is due.
    pub(crate) fn detach_broadcaster(&self, epoch: u64) -> bool {
        let mut inner = self.lock();
        if inner.broadcaster != Some(epoch) {
            return false;
        }
        inner.broadcaster = None;
        self.attached.send_replace(false);

        match inner.state {
            SessionState::Active => self
                .transition(&mut inner, SessionState::BroadcasterDisconnected)
                .is_ok(),
            _ => false,
        }
    }

    pub(crate) fn set_grace_timer(&self, timer: AbortHandle) {
        let mut inner = self.lock();
        if let Some(old) = inner.grace_timer.replace(timer) {
            old.abort();
        }
    }

    /// Push frames from the broadcaster with `epoch` into the pipeline.
    /// The first frame of a session moves it to `active`.
    pub(crate) fn push_frames(&self, epoch: u64, frames: Vec<AudioFrame>) -> Result<bool, SessionError> {
        if frames.is_empty() {
            return Ok(false);
        }

        let activated = {
            let mut inner = self.lock();
            if inner.broadcaster != Some(epoch) {
                return Err(SessionError::InvalidState {
                    operation: "send media",
                    state: inner.state,
                });
            }
            inner.last_activity = Instant::now();
            match inner.state {
                SessionState::Created => {
                    self.transition(&mut inner, SessionState::Active)?;
                    true
                }
                SessionState::Ended => {
                    return Err(SessionError::InvalidState {
                        operation: "send media",
                        state: SessionState::Ended,
                    })
                }
                _ => false,
            }
        };

        for frame in frames {
            SessionCounters::incr(&self.counters.frames_received);
            match self.frames.push(frame) {
                PushOutcome::Queued => {}
                PushOutcome::DroppedOldest => SessionCounters::incr(&self.counters.frames_dropped),
                PushOutcome::Closed => break,
            }
        }
        Ok(activated)
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        self.lock().next_sequence
    }

    pub(crate) fn set_next_sequence(&self, next: u64) {
        let mut inner = self.lock();
        inner.next_sequence = inner.next_sequence.max(next);
    }

    /// Validate and apply a language change
    pub(crate) fn update_languages(
        &self,
        source: Option<&str>,
        targets: Option<&[String]>,
    ) -> Result<Languages, SessionError> {
        let state = self.state();
        if !state.accepts_language_change() {
            return Err(SessionError::InvalidState {
                operation: "change languages",
                state,
            });
        }
        let updated = self.languages.borrow().updated(source, targets)?;
        self.languages.send_replace(updated.clone());
        info!(
            "Session {}: languages now {} -> {:?}",
            self.key, updated.source_lang, updated.target_langs
        );
        Ok(updated)
    }

    pub fn subscribe(&self, options: SubscriptionOptions) -> Subscription {
        self.broadcaster.subscribe(options)
    }

    /// Move to `ended` and release everything the pipeline holds.
    /// Returns false if the session had already ended.
    pub(crate) fn end(&self) -> bool {
        {
            let mut inner = self.lock();
            if inner.state == SessionState::Ended {
                return false;
            }
            if self.transition(&mut inner, SessionState::Ended).is_err() {
                return false;
            }
            inner.broadcaster = None;
            self.attached.send_replace(false);
            if let Some(timer) = inner.grace_timer.take() {
                timer.abort();
            }
        }
        self.teardown();
        true
    }

    fn teardown(&self) {
        self.shutdown.send_replace(true);
        self.frames.close();
        self.broadcaster.close_all();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        debug!("Session {} torn down", self.key);
    }

    pub fn stats(&self) -> SessionStats {
        let (state, broadcaster_connected) = {
            let inner = self.lock();
            (inner.state, inner.broadcaster.is_some())
        };
        let languages = self.languages();
        let elapsed = Utc::now() - self.created_at;

        SessionStats {
            session_key: self.key.to_string(),
            state,
            source_lang: languages.source_lang,
            target_langs: languages.target_langs,
            created_at: self.created_at,
            duration_secs: elapsed.num_milliseconds().max(0) as f64 / 1000.0,
            broadcaster_connected,
            subscribers: self.broadcaster.subscriber_count(),
            counters: self.counters.snapshot(),
        }
    }
}
