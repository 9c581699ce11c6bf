//! Outbound retry queue
//!
//! When the store or bus is unreachable, outbound writes are queued here and
//! drained on the health cadence with exponential backoff. The queue is
//! bounded; overflow drops the oldest entry so ingestion never blocks.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::VecDeque;

/// A write that failed and is awaiting retry
#[derive(Debug, Clone)]
pub enum PendingWrite {
    /// Failed store checkpoint
    Save {
        /// Target key
        key: String,
        /// Snapshot payload
        value: Value,
        /// Retention to apply when the save succeeds
        ttl: std::time::Duration,
    },
    /// Failed bus publication
    Publish {
        /// Target topic
        topic: String,
        /// Message payload
        payload: Value,
    },
}

/// Bounded FIFO of pending writes with exponential backoff
#[derive(Debug)]
pub struct RetryQueue {
    pending: VecDeque<PendingWrite>,
    capacity: usize,
    base_backoff: Duration,
    max_backoff: Duration,
    current_backoff: Duration,
    next_attempt_at: Option<DateTime<Utc>>,
    dropped: u64,
}

impl RetryQueue {
    /// Create a queue with the given capacity and backoff bounds
    pub fn new(capacity: usize, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            base_backoff,
            max_backoff,
            current_backoff: base_backoff,
            next_attempt_at: None,
            dropped: 0,
        }
    }

    /// Enqueue a failed write; drops the oldest entry when full
    pub fn push(&mut self, write: PendingWrite, now: DateTime<Utc>) {
        if self.pending.len() >= self.capacity {
            self.pending.pop_front();
            self.dropped += 1;
            tracing::warn!(
                capacity = self.capacity,
                dropped_total = self.dropped,
                "Retry queue full, dropping oldest pending write"
            );
        }
        self.pending.push_back(write);
        if self.next_attempt_at.is_none() {
            self.next_attempt_at = Some(now + self.current_backoff);
        }
    }

    /// Whether a retry attempt is due
    pub fn ready(&self, now: DateTime<Utc>) -> bool {
        match self.next_attempt_at {
            Some(at) => !self.pending.is_empty() && now >= at,
            None => false,
        }
    }

    /// Take every pending write for an attempt, oldest first
    pub fn drain(&mut self) -> Vec<PendingWrite> {
        self.pending.drain(..).collect()
    }

    /// Put unflushed writes back and extend the backoff
    pub fn requeue(&mut self, failed: Vec<PendingWrite>, now: DateTime<Utc>) {
        for write in failed.into_iter().rev() {
            self.pending.push_front(write);
        }
        while self.pending.len() > self.capacity {
            self.pending.pop_back();
            self.dropped += 1;
        }
        self.current_backoff = (self.current_backoff * 2).min(self.max_backoff);
        self.next_attempt_at = Some(now + self.current_backoff);
    }

    /// Reset the backoff after a fully successful drain
    pub fn mark_flushed(&mut self) {
        self.current_backoff = self.base_backoff;
        self.next_attempt_at = None;
    }

    /// Pending write count
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total writes dropped to overflow
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
