use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::event::{EventKind, SegmentEvent};

/// What a subscriber asked to receive
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionOptions {
    /// Translation languages to deliver; `None` delivers every target language
    pub langs: Option<HashSet<String>>,
    /// Deliver transcript events in the source language
    pub include_source: bool,
    /// Pre-fill the queue with the most recent finals
    pub replay: bool,
    /// Skip every index up to and including this one (resume after reconnect)
    pub after: Option<u64>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            langs: None,
            include_source: true,
            replay: false,
            after: None,
        }
    }
}

impl SubscriptionOptions {
    pub fn wants(&self, event: &SegmentEvent) -> bool {
        match event.kind {
            EventKind::Transcript => self.include_source,
            EventKind::Translation => self
                .langs
                .as_ref()
                .map_or(true, |langs| langs.contains(&event.lang)),
        }
    }
}

/// Result of offering an event to a subscriber queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued after evicting `evicted` older partials
    Queued { evicted: usize },
    /// A partial that found the queue full of finals; it was dropped
    Discarded,
    /// Not wanted by this subscriber
    Filtered,
    /// Index already finalised for this stream
    Stale,
    /// Queue holds only finals and is full; the subscriber must be disconnected
    Overflow,
}

/// Bounded per-subscriber delivery queue.
///
/// Partials are dropped oldest-first to make room; finals are never dropped.
/// Per stream (kind, language) the queue remembers the last final it accepted
/// and rejects anything at or below it, so a subscriber never sees a final
/// twice nor a revision after a final.
#[derive(Debug)]
pub struct SubscriberQueue {
    capacity: usize,
    options: SubscriptionOptions,
    items: VecDeque<Arc<SegmentEvent>>,
    last_final: HashMap<(EventKind, String), u64>,
}

impl SubscriberQueue {
    pub fn new(capacity: usize, options: SubscriptionOptions) -> Self {
        Self {
            capacity: capacity.max(1),
            options,
            items: VecDeque::new(),
            last_final: HashMap::new(),
        }
    }

    pub fn options(&self) -> &SubscriptionOptions {
        &self.options
    }

    /// Change the language selection; queued events no longer wanted are removed
    pub fn set_languages(&mut self, langs: Option<HashSet<String>>) {
        self.options.langs = langs;
        let options = &self.options;
        self.items.retain(|event| options.wants(event));
    }

    pub fn set_include_source(&mut self, include_source: bool) {
        self.options.include_source = include_source;
        let options = &self.options;
        self.items.retain(|event| options.wants(event));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pop(&mut self) -> Option<Arc<SegmentEvent>> {
        self.items.pop_front()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn floor(&self, event: &SegmentEvent) -> Option<u64> {
        let (kind, lang) = event.stream();
        self.last_final
            .get(&(kind, lang.to_string()))
            .copied()
            .max(self.options.after)
    }

    pub fn offer(&mut self, event: Arc<SegmentEvent>) -> Offer {
        if !self.options.wants(&event) {
            return Offer::Filtered;
        }
        if self.floor(&event).is_some_and(|floor| event.index <= floor) {
            return Offer::Stale;
        }

        // A newer revision or the final replaces queued partials of the same segment
        let same_segment = |queued: &Arc<SegmentEvent>| {
            !queued.is_final
                && queued.stream() == event.stream()
                && queued.index <= event.index
                && (event.is_final || queued.index == event.index)
        };
        self.items.retain(|queued| !same_segment(queued));

        let mut evicted = 0;
        while self.items.len() >= self.capacity {
            match self.items.iter().position(|queued| !queued.is_final) {
                Some(pos) => {
                    self.items.remove(pos);
                    evicted += 1;
                }
                None => break,
            }
        }

        if self.items.len() >= self.capacity {
            if !event.is_final {
                return Offer::Discarded;
            }
            return Offer::Overflow;
        }

        if event.is_final {
            self.last_final
                .insert((event.kind, event.lang.clone()), event.index);
        }
        self.items.push_back(event);
        Offer::Queued { evicted }
    }
}
