use std::collections::{BTreeMap, BTreeSet};

use super::TranslationSegment;

/// Releases one lane's translations in index order.
///
/// Translations complete in any order; the sequencer holds finals until every
/// earlier index has been released and drops partials that can no longer be
/// shown (behind the head, or superseded by a final transcript).
#[derive(Debug, Default)]
pub struct LaneSequencer {
    next_index: u64,
    finals: BTreeMap<u64, TranslationSegment>,
    /// Latest partial per index ahead of the head
    partials: BTreeMap<u64, TranslationSegment>,
    /// Indices whose final transcript has been seen but not yet released
    finalized: BTreeSet<u64>,
}

impl LaneSequencer {
    pub fn new(start_index: u64) -> Self {
        Self {
            next_index: start_index,
            ..Self::default()
        }
    }

    /// Index of the next final this lane will release
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Finals waiting for an earlier index
    pub fn pending(&self) -> usize {
        self.finals.len()
    }

    /// Whether partials for `index` are stale
    pub fn is_finalized(&self, index: u64) -> bool {
        index < self.next_index || self.finalized.contains(&index)
    }

    /// Record that the final transcript for `index` exists, so any partial
    /// translation of it is superseded
    pub fn transcript_finalized(&mut self, index: u64) {
        if index >= self.next_index {
            self.finalized.insert(index);
            self.partials.remove(&index);
        }
    }

    /// Accept a finished translation and return everything now releasable
    pub fn offer(&mut self, segment: TranslationSegment) -> Vec<TranslationSegment> {
        let mut ready = Vec::new();
        if segment.index < self.next_index {
            return ready;
        }

        if segment.is_final {
            self.finalized.insert(segment.index);
            self.partials.remove(&segment.index);
            self.finals.insert(segment.index, segment);
            self.drain(&mut ready);
        } else if self.finalized.contains(&segment.index) {
            // superseded
        } else if segment.index == self.next_index {
            ready.push(segment);
        } else {
            self.partials.insert(segment.index, segment);
        }

        ready
    }

    fn drain(&mut self, ready: &mut Vec<TranslationSegment>) {
        while let Some(segment) = self.finals.remove(&self.next_index) {
            self.finalized.remove(&self.next_index);
            self.next_index += 1;
            ready.push(segment);
        }

        self.partials = self.partials.split_off(&self.next_index);
        if let Some(partial) = self.partials.remove(&self.next_index) {
            ready.push(partial);
        }
    }
}
