//! Carriers waiting for a receiver
//!
//! The queue is bounded (`max_queued`) and optionally time-limited. Draining
//! takes the whole queue out, runs what it can, and puts the rest back ahead
//! of anything queued while the pass was running.

use crate::{Carrier, ReceptorId};
use receptor_config::{OverflowPolicy, QueueSettings};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One deferred delivery
#[derive(Debug, Clone)]
pub struct QueuedCarrier {
    /// Sender; `None` for system-originated carriers
    pub from: Option<ReceptorId>,
    pub carrier: Arc<Carrier>,
    pub queued_at: Instant,
}

impl QueuedCarrier {
    pub fn new(from: Option<ReceptorId>, carrier: Arc<Carrier>) -> Self {
        Self {
            from,
            carrier,
            queued_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>, now: Instant) -> bool {
        ttl.is_some_and(|ttl| now.duration_since(self.queued_at) > ttl)
    }
}

#[derive(Debug)]
pub struct CarrierQueue {
    entries: VecDeque<QueuedCarrier>,
    max_queued: usize,
    ttl: Option<Duration>,
    overflow: OverflowPolicy,
}

impl CarrierQueue {
    pub fn new(settings: &QueueSettings) -> Self {
        Self {
            entries: VecDeque::new(),
            max_queued: settings.max_queued.max(1),
            ttl: settings.ttl(),
            overflow: settings.overflow,
        }
    }

    /// Queue an entry, returning whatever the overflow policy discarded
    pub fn push(&mut self, entry: QueuedCarrier) -> Option<QueuedCarrier> {
        if self.entries.len() < self.max_queued {
            self.entries.push_back(entry);
            return None;
        }
        match self.overflow {
            OverflowPolicy::DropOldest => {
                let evicted = self.entries.pop_front();
                self.entries.push_back(entry);
                evicted
            }
            OverflowPolicy::RejectNewest => Some(entry),
        }
    }

    /// Remove every entry for a drain pass, separating out expired ones
    pub fn take_all(&mut self) -> (Vec<QueuedCarrier>, Vec<QueuedCarrier>) {
        let now = Instant::now();
        let ttl = self.ttl;
        self.entries
            .drain(..)
            .partition(|entry| !entry.is_expired(ttl, now))
    }

    /// Put back entries a drain pass could not deliver. They go ahead of
    /// entries queued during the pass. Returns entries dropped to stay in
    /// bounds.
    pub fn restore(&mut self, kept: Vec<QueuedCarrier>) -> Vec<QueuedCarrier> {
        let added = std::mem::take(&mut self.entries);
        self.entries.extend(kept);
        self.entries.extend(added);

        let mut dropped = Vec::new();
        while self.entries.len() > self.max_queued {
            let entry = match self.overflow {
                OverflowPolicy::DropOldest => self.entries.pop_front(),
                OverflowPolicy::RejectNewest => self.entries.pop_back(),
            };
            dropped.extend(entry);
        }
        dropped
    }

    /// Drop entries sent by `id`; returns how many were removed
    pub fn purge_from(&mut self, id: ReceptorId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.from != Some(id));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<QueuedCarrier> {
        self.entries.iter().cloned().collect()
    }
}
