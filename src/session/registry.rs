use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::key::SessionKey;
use super::session::Session;
use crate::error::SessionError;

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionKey, Arc<Session>>,
    /// Recently removed keys, so repeated operations on an ended session
    /// can be told apart from unknown keys
    tombstones: HashMap<SessionKey, Instant>,
}

/// Map of live sessions.
///
/// Every critical section is a single map operation; sessions are built and
/// torn down outside the lock.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a fresh key, build the session for it and register it
    pub fn create_session<F>(&self, build: F) -> Arc<Session>
    where
        F: FnOnce(SessionKey) -> Session,
    {
        let key = loop {
            let key = SessionKey::generate();
            let taken = {
                let inner = self.read();
                inner.sessions.contains_key(&key) || inner.tombstones.contains_key(&key)
            };
            if !taken {
                break key;
            }
        };

        let session = Arc::new(build(key.clone()));
        self.write().sessions.insert(key, Arc::clone(&session));
        session
    }

    pub fn get(&self, key: &SessionKey) -> Result<Arc<Session>, SessionError> {
        self.read()
            .sessions
            .get(key)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(key.clone()))
    }

    /// Remove a session, leaving a tombstone. Unknown keys are a no-op.
    pub fn remove(&self, key: &SessionKey) -> Option<Arc<Session>> {
        let mut inner = self.write();
        let removed = inner.sessions.remove(key);
        if removed.is_some() {
            inner.tombstones.insert(key.clone(), Instant::now());
        }
        removed
    }

    /// Whether `key` belonged to a session that was removed recently
    pub fn was_removed(&self, key: &SessionKey) -> bool {
        self.read().tombstones.contains_key(key)
    }

    /// Forget tombstones older than `ttl`
    pub fn purge_tombstones(&self, ttl: Duration) -> usize {
        let mut inner = self.write();
        let before = inner.tombstones.len();
        inner.tombstones.retain(|_, removed| removed.elapsed() < ttl);
        before - inner.tombstones.len()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.read().sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Languages, PipelineSettings};

    fn build(key: SessionKey) -> Session {
        Session::new(
            key,
            Languages::new("en", &["es".to_string()]).unwrap(),
            PipelineSettings::default(),
            None,
        )
    }

    #[test]
    fn test_create_and_get() {
        let registry = SessionRegistry::new();
        let session = registry.create_session(build);
        let found = registry.get(session.key()).unwrap();
        assert!(Arc::ptr_eq(&session, &found));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_key_not_found() {
        let registry = SessionRegistry::new();
        let key = SessionKey::from_string("nope");
        assert!(matches!(
            registry.get(&key),
            Err(SessionError::SessionNotFound(_))
        ));
        assert!(registry.remove(&key).is_none());
        assert!(!registry.was_removed(&key));
    }

    #[test]
    fn test_remove_is_idempotent_and_leaves_tombstone() {
        let registry = SessionRegistry::new();
        let key = registry.create_session(build).key().clone();
        assert!(registry.remove(&key).is_some());
        assert!(registry.remove(&key).is_none());
        assert!(registry.was_removed(&key));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tombstones_expire() {
        let registry = SessionRegistry::new();
        let key = registry.create_session(build).key().clone();
        registry.remove(&key);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(registry.purge_tombstones(Duration::from_secs(10)), 0);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(registry.purge_tombstones(Duration::from_secs(10)), 1);
        assert!(!registry.was_removed(&key));
    }
}
