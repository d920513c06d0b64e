use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use super::event::SegmentEvent;
use super::subscriber::{Offer, SubscriberQueue, SubscriptionOptions};
use crate::error::SessionError;
use crate::nats::NatsClient;
use crate::session::{SessionCounters, SessionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    SessionEnded,
    SlowConsumer,
}

struct SlotState {
    queue: SubscriberQueue,
    closed: Option<CloseReason>,
}

/// One subscriber's queue plus the wakeup for its connection task
struct Slot {
    id: u64,
    state: Mutex<SlotState>,
    notify: Notify,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self, reason: CloseReason) {
        {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason);
            }
            if reason == CloseReason::SessionEnded {
                state.queue.clear();
            }
        }
        self.notify.notify_one();
    }
}

struct Inner {
    subscribers: HashMap<u64, Arc<Slot>>,
    /// Most recent finals, oldest first
    replay: VecDeque<Arc<SegmentEvent>>,
    next_id: u64,
    closed: bool,
}

/// Per-session fan-out of transcript and translation events.
///
/// Every subscriber has its own bounded queue, so a slow subscriber only
/// ever affects itself: it loses partials first and is disconnected with
/// [`SessionError::SlowConsumer`] if finals alone overflow its queue.
pub struct Broadcaster {
    session_key: SessionKey,
    queue_capacity: usize,
    replay_capacity: usize,
    counters: Arc<SessionCounters>,
    nats: Option<NatsClient>,
    inner: Mutex<Inner>,
}

impl Broadcaster {
    pub fn new(
        session_key: SessionKey,
        queue_capacity: usize,
        replay_capacity: usize,
        counters: Arc<SessionCounters>,
        nats: Option<NatsClient>,
    ) -> Self {
        Self {
            session_key,
            queue_capacity: queue_capacity.max(1),
            replay_capacity,
            counters,
            nats,
            inner: Mutex::new(Inner {
                subscribers: HashMap::new(),
                replay: VecDeque::new(),
                next_id: 0,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver events from the pipeline until every sender is gone
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<SegmentEvent>) {
        info!("Fan-out started for session {}", self.session_key);

        while let Some(event) = events.recv().await {
            let event = Arc::new(event);
            if event.is_final {
                if let Some(nats) = &self.nats {
                    if let Err(e) = nats.publish_segment(&event).await {
                        warn!("Session {}: NATS export failed: {:#}", self.session_key, e);
                    }
                }
            }
            self.deliver(event);
        }

        info!("Fan-out stopped for session {}", self.session_key);
    }

    /// Offer one event to every subscriber
    pub fn deliver(&self, event: Arc<SegmentEvent>) {
        let slots: Vec<Arc<Slot>> = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            if event.is_final && self.replay_capacity > 0 {
                inner.replay.push_back(Arc::clone(&event));
                while inner.replay.len() > self.replay_capacity {
                    inner.replay.pop_front();
                }
            }
            inner.subscribers.values().cloned().collect()
        };

        let mut slow = Vec::new();
        for slot in slots {
            let offer = slot.lock().queue.offer(Arc::clone(&event));
            match offer {
                Offer::Queued { evicted } => {
                    if evicted > 0 {
                        SessionCounters::add(&self.counters.partials_dropped, evicted as u64);
                    }
                    slot.notify.notify_one();
                }
                Offer::Discarded => SessionCounters::incr(&self.counters.partials_dropped),
                Offer::Filtered | Offer::Stale => {}
                Offer::Overflow => {
                    warn!(
                        "Session {}: subscriber {} is too slow, disconnecting",
                        self.session_key, slot.id
                    );
                    SessionCounters::incr(&self.counters.slow_consumer_disconnects);
                    slot.close(CloseReason::SlowConsumer);
                    slow.push(slot.id);
                }
            }
        }

        if !slow.is_empty() {
            let mut inner = self.lock();
            for id in slow {
                inner.subscribers.remove(&id);
            }
        }
    }

    /// Register a subscriber. With `options.replay` its queue starts with the
    /// most recent finals it is interested in.
    pub fn subscribe(self: &Arc<Self>, options: SubscriptionOptions) -> Subscription {
        let replay = options.replay;
        let mut queue = SubscriberQueue::new(self.queue_capacity, options);

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        if replay {
            let wanted: Vec<&Arc<SegmentEvent>> = inner
                .replay
                .iter()
                .filter(|event| queue.options().wants(event))
                .collect();
            let skip = wanted.len().saturating_sub(self.queue_capacity);
            for event in wanted.into_iter().skip(skip) {
                queue.offer(Arc::clone(event));
            }
        }

        let closed = inner.closed.then_some(CloseReason::SessionEnded);
        let slot = Arc::new(Slot {
            id,
            state: Mutex::new(SlotState { queue, closed }),
            notify: Notify::new(),
        });
        if !inner.closed {
            inner.subscribers.insert(id, Arc::clone(&slot));
        }
        let count = inner.subscribers.len();
        drop(inner);

        debug!(
            "Session {}: subscriber {} attached ({} total)",
            self.session_key, id, count
        );

        Subscription {
            slot,
            broadcaster: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        if self.lock().subscribers.remove(&id).is_some() {
            debug!("Session {}: subscriber {} detached", self.session_key, id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Disconnect every subscriber and release all buffered events
    pub fn close_all(&self) {
        let slots: Vec<Arc<Slot>> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.replay.clear();
            inner.subscribers.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            slot.close(CloseReason::SessionEnded);
        }
    }
}

/// A subscriber's handle on the fan-out; dropping it unsubscribes
pub struct Subscription {
    slot: Arc<Slot>,
    broadcaster: Weak<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.slot.id
    }

    /// Next event for this subscriber.
    ///
    /// `Ok(None)` once the session has ended; `Err(SlowConsumer)` after the
    /// subscriber fell too far behind and everything queued was delivered.
    pub async fn recv(&self) -> Result<Option<Arc<SegmentEvent>>, SessionError> {
        loop {
            {
                let mut state = self.slot.lock();
                if let Some(event) = state.queue.pop() {
                    return Ok(Some(event));
                }
                match state.closed {
                    Some(CloseReason::SessionEnded) => return Ok(None),
                    Some(CloseReason::SlowConsumer) => {
                        return Err(SessionError::SlowConsumer {
                            subscriber: self.slot.id,
                        })
                    }
                    None => {}
                }
            }
            self.slot.notify.notified().await;
        }
    }

    /// Restrict translations to `langs`; `None` selects every target language
    pub fn set_languages(&self, langs: Option<HashSet<String>>) {
        self.slot.lock().queue.set_languages(langs);
    }

    pub fn set_include_source(&self, include_source: bool) {
        self.slot.lock().queue.set_include_source(include_source);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.slot.id);
        }
    }
}
