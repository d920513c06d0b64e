use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::{Languages, PipelineSettings};
use super::key::SessionKey;
use super::registry::SessionRegistry;
use super::session::Session;
use super::state::SessionState;
use super::stats::SessionStats;
use crate::audio::AudioFrame;
use crate::broadcast::{Subscription, SubscriptionOptions};
use crate::engine::Engines;
use crate::error::SessionError;
use crate::nats::NatsClient;

struct ControllerInner {
    registry: SessionRegistry,
    engines: Engines,
    settings: PipelineSettings,
    nats: Option<NatsClient>,
}

/// Every state change of every session goes through here.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(engines: Engines, settings: PipelineSettings, nats: Option<NatsClient>) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                registry: SessionRegistry::new(),
                engines,
                settings,
                nats,
            }),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    /// Create a session in `created` and start its pipeline
    pub fn create_session(
        &self,
        source_lang: &str,
        target_langs: &[String],
    ) -> Result<Arc<Session>, SessionError> {
        let languages = Languages::new(source_lang, target_langs)?;

        let session = self.inner.registry.create_session(|key| {
            Session::new(
                key,
                languages,
                self.inner.settings.clone(),
                self.inner.nats.clone(),
            )
        });
        session.start(&self.inner.engines);

        info!(
            "Created session {} ({} -> {:?})",
            session.key(),
            source_lang,
            session.languages().target_langs
        );
        self.export_stats(&session);
        Ok(session)
    }

    pub fn get(&self, key: &SessionKey) -> Result<Arc<Session>, SessionError> {
        self.inner.registry.get(key)
    }

    pub fn list(&self) -> Vec<SessionStats> {
        let mut stats: Vec<SessionStats> = self
            .inner
            .registry
            .sessions()
            .iter()
            .map(|session| session.stats())
            .collect();
        stats.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stats
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// End a session. Ending an already ended session is a no-op that
    /// reports `ended` again.
    pub fn end_session(&self, key: &SessionKey) -> Result<SessionState, SessionError> {
        match self.inner.registry.remove(key) {
            Some(session) => {
                if session.end() {
                    info!("Ended session {}", key);
                    self.export_stats(&session);
                }
                Ok(SessionState::Ended)
            }
            None if self.inner.registry.was_removed(key) => Ok(SessionState::Ended),
            None => Err(SessionError::SessionNotFound(key.clone())),
        }
    }

    pub fn update_languages(
        &self,
        key: &SessionKey,
        source_lang: Option<&str>,
        target_langs: Option<&[String]>,
    ) -> Result<Languages, SessionError> {
        let session = self.get(key)?;
        session.update_languages(source_lang, target_langs)
    }

    /// Attach the single broadcaster of a session
    pub fn attach_broadcaster(&self, key: &SessionKey) -> Result<BroadcasterLease, SessionError> {
        let session = self.get(key)?;
        let before = session.state();
        let epoch = session.attach_broadcaster()?;

        if before == SessionState::BroadcasterDisconnected {
            info!("Broadcaster reconnected to session {}", key);
            self.export_stats(&session);
        } else {
            info!("Broadcaster attached to session {}", key);
        }

        Ok(BroadcasterLease {
            controller: self.clone(),
            session,
            epoch,
        })
    }

    /// The broadcaster connection with `epoch` went away
    fn broadcaster_lost(&self, session: &Arc<Session>, epoch: u64) {
        if !session.detach_broadcaster(epoch) {
            debug!("Broadcaster {} detached from session {}", epoch, session.key());
            return;
        }

        let grace = self.inner.settings.session.grace_window();
        warn!(
            "Broadcaster lost for session {}, ending in {:?} unless it reconnects",
            session.key(),
            grace
        );
        self.export_stats(session);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let controller = self.clone();
        let key = session.key().clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            controller.grace_expired(&key);
        });
        session.set_grace_timer(timer.abort_handle());
    }

    fn grace_expired(&self, key: &SessionKey) {
        let Ok(session) = self.get(key) else {
            return;
        };
        if session.state() == SessionState::BroadcasterDisconnected {
            info!("Grace window expired for session {}", key);
            let _ = self.end_session(key);
        }
    }

    pub fn subscribe(
        &self,
        key: &SessionKey,
        options: SubscriptionOptions,
    ) -> Result<Subscription, SessionError> {
        Ok(self.get(key)?.subscribe(options))
    }

    /// End sessions idle for longer than the configured timeout.
    /// Returns the evicted keys.
    pub fn evict_idle(&self) -> Vec<SessionKey> {
        let timeout = self.inner.settings.session.idle_timeout();
        let idle: Vec<SessionKey> = self
            .inner
            .registry
            .sessions()
            .iter()
            .filter(|session| {
                matches!(
                    session.state(),
                    SessionState::Created | SessionState::Active
                ) && session.idle_for() >= timeout
            })
            .map(|session| session.key().clone())
            .collect();

        for key in &idle {
            info!("Evicting idle session {}", key);
            let _ = self.end_session(key);
        }
        idle
    }

    /// Periodically evict idle sessions and forget old tombstones
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let controller = self.clone();
        let period = self.inner.settings.session.sweep_interval();
        let tombstone_ttl = self.inner.settings.session.tombstone_ttl();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                controller.evict_idle();
                let purged = controller.inner.registry.purge_tombstones(tombstone_ttl);
                if purged > 0 {
                    debug!("Forgot {} ended session keys", purged);
                }
            }
        })
    }

    /// End every live session
    pub fn shutdown_all(&self) {
        let sessions = self.inner.registry.sessions();
        if !sessions.is_empty() {
            info!("Ending {} live session(s)", sessions.len());
        }
        for session in sessions {
            let _ = self.end_session(session.key());
        }
    }

    fn export_stats(&self, session: &Session) {
        let Some(nats) = self.inner.nats.clone() else {
            return;
        };
        let stats = session.stats();
        tokio::spawn(async move {
            if let Err(e) = nats.publish_stats(&stats).await {
                warn!("Failed to export stats for {}: {:#}", stats.session_key, e);
            }
        });
    }
}

/// Exclusive right to feed media into a session.
///
/// Dropping the lease is how the ingestion adapter reports a lost
/// connection: an active session moves to `broadcaster_disconnected` and
/// its grace timer starts.
pub struct BroadcasterLease {
    controller: SessionController,
    session: Arc<Session>,
    epoch: u64,
}

impl BroadcasterLease {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn key(&self) -> &SessionKey {
        self.session.key()
    }

    /// Feed normalised frames into the pipeline
    pub fn push_frames(&self, frames: Vec<AudioFrame>) -> Result<(), SessionError> {
        if self.session.push_frames(self.epoch, frames)? {
            self.controller.export_stats(&self.session);
        }
        Ok(())
    }

    /// Sequence number the next frame should carry
    pub fn next_sequence(&self) -> u64 {
        self.session.next_sequence()
    }

    pub fn set_next_sequence(&self, next: u64) {
        self.session.set_next_sequence(next);
    }

    pub fn update_languages(
        &self,
        source_lang: Option<&str>,
        target_langs: Option<&[String]>,
    ) -> Result<Languages, SessionError> {
        self.controller
            .update_languages(self.session.key(), source_lang, target_langs)
    }

    /// End the session from the broadcaster side
    pub fn end_session(&self) -> Result<SessionState, SessionError> {
        self.controller.end_session(self.session.key())
    }
}

impl Drop for BroadcasterLease {
    fn drop(&mut self) {
        self.controller.broadcaster_lost(&self.session, self.epoch);
    }
}
