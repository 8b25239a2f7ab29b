//! Bounded, priority-coalescing repost queue.
//!
//! Requote requests pile up faster than the rate gate lets them out;
//! the queue keeps one entry per reason and drains highest priority
//! first, ties by arrival.

use avell_detector::EventPriority;
use serde::{Deserialize, Serialize};

/// Why a requote was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepostReason {
    /// Top-N exit or drift: the ladder is in the wrong place.
    Requote,
    /// Queue-ahead breach on a level.
    QueueAhead,
    /// A per-order TTL elapsed.
    TtlExpired,
    /// The session TTL elapsed.
    SessionExpired,
    /// A partial fill crossed the repost threshold.
    PartialFill,
}

impl RepostReason {
    /// Priority class: high = top-N/drift (and fills, which change
    /// inventory), medium = queue-ahead/session, low = TTL.
    pub fn priority(&self) -> EventPriority {
        match self {
            Self::Requote | Self::PartialFill => EventPriority::High,
            Self::QueueAhead | Self::SessionExpired => EventPriority::Medium,
            Self::TtlExpired => EventPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    reason: RepostReason,
    seq: u64,
}

/// Bounded queue of coalesced repost requests.
#[derive(Debug)]
pub struct RepostQueue {
    cap: usize,
    entries: Vec<Entry>,
    seq: u64,
}

impl RepostQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            entries: Vec::new(),
            seq: 0,
        }
    }

    /// Queue a request. Identical reasons coalesce; when full, the
    /// lowest-priority entry makes room for a higher-priority one.
    pub fn push(&mut self, reason: RepostReason) {
        if self.entries.iter().any(|e| e.reason == reason) {
            return;
        }

        if self.entries.len() >= self.cap {
            let lowest = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| (e.reason.priority(), std::cmp::Reverse(e.seq)))
                .map(|(i, e)| (i, e.reason.priority()));
            match lowest {
                Some((i, prio)) if reason.priority() > prio => {
                    self.entries.remove(i);
                }
                _ => return,
            }
        }

        self.seq += 1;
        self.entries.push(Entry {
            reason,
            seq: self.seq,
        });
    }

    /// Pop the highest-priority request, FIFO within a priority.
    pub fn pop(&mut self) -> Option<RepostReason> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| (e.reason.priority(), std::cmp::Reverse(e.seq)))
            .map(|(i, _)| i)?;
        Some(self.entries.remove(idx).reason)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
