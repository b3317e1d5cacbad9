//! Capacity-bounded multi-level message queue.
//!
//! One FIFO bucket per priority plus an emergency reserve on top of the
//! total cap. Above the cap, a higher-priority arrival may evict the
//! lowest-priority oldest message (expired messages go first); emergency
//! messages may instead consume the reserve. The queue never holds more
//! than `total_cap + emergency_reserve` entries.

use crate::types::{now_ms, MessagePriority};
use std::collections::VecDeque;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueueError {
    #[error("Queue full ({len} entries)")]
    Full { len: usize },
}

#[derive(Clone, Debug)]
pub struct QueuedMessage<T> {
    pub item: T,
    pub priority: MessagePriority,
    pub emergency: bool,
    pub created_at: u64,
    pub ttl_ms: u64,
}

impl<T> QueuedMessage<T> {
    pub fn new(item: T, priority: MessagePriority, ttl_ms: u64) -> Self {
        Self {
            item,
            priority,
            emergency: false,
            created_at: now_ms(),
            ttl_ms,
        }
    }

    pub fn emergency(mut self) -> Self {
        self.emergency = true;
        self
    }

    fn expired_at(&self, now: u64) -> bool {
        self.created_at + self.ttl_ms < now
    }
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub total_cap: usize,
    pub emergency_reserve: usize,
    pub soft_threshold: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            total_cap: 1_000,
            emergency_reserve: 50,
            soft_threshold: 800,
        }
    }
}

pub struct PriorityQueue<T> {
    buckets: [VecDeque<QueuedMessage<T>>; 4],
    config: QueueConfig,
}

impl<T> PriorityQueue<T> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            buckets: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    pub fn enqueue(&mut self, message: QueuedMessage<T>) -> Result<(), QueueError> {
        let len = self.len();

        if len < self.config.total_cap {
            self.buckets[message.priority.rank()].push_back(message);
            return Ok(());
        }

        if message.emergency {
            // Emergency traffic may dip into the reserve even when every
            // regular bucket is saturated
            if len < self.config.total_cap + self.config.emergency_reserve {
                self.buckets[message.priority.rank()].push_back(message);
                return Ok(());
            }
            return Err(QueueError::Full { len });
        }

        if self.evict_for(message.priority) {
            self.buckets[message.priority.rank()].push_back(message);
            Ok(())
        } else {
            Err(QueueError::Full { len })
        }
    }

    /// Drop the lowest-priority, oldest message — expired entries first —
    /// strictly below `incoming`. Returns false when no candidate exists.
    fn evict_for(&mut self, incoming: MessagePriority) -> bool {
        let now = now_ms();

        // Pass 1: any expired message, lowest priority first
        for rank in (0..4).rev() {
            if let Some(pos) = self.buckets[rank].iter().position(|m| m.expired_at(now)) {
                self.buckets[rank].remove(pos);
                return true;
            }
        }

        // Pass 2: oldest entry of the lowest bucket below the incoming
        // priority
        for rank in ((incoming.rank() + 1)..4).rev() {
            if !self.buckets[rank].is_empty() {
                self.buckets[rank].pop_front();
                return true;
            }
        }

        false
    }

    /// Highest non-empty bucket; within it, emergency entries precede
    /// regular ones, then FIFO.
    pub fn dequeue(&mut self) -> Option<QueuedMessage<T>> {
        for bucket in self.buckets.iter_mut() {
            if bucket.is_empty() {
                continue;
            }
            if let Some(pos) = bucket.iter().position(|m| m.emergency) {
                return bucket.remove(pos);
            }
            return bucket.pop_front();
        }
        None
    }

    pub fn remove_expired(&mut self) -> usize {
        let now = now_ms();
        let mut removed = 0;
        for bucket in self.buckets.iter_mut() {
            let before = bucket.len();
            bucket.retain(|m| !m.expired_at(now));
            removed += before - bucket.len();
        }
        removed
    }

    /// 1.0 while under the soft threshold, linearly degrading to 0.0 at the
    /// total cap.
    pub fn health_score(&self) -> f64 {
        let len = self.len() as f64;
        let soft = self.config.soft_threshold as f64;
        let cap = self.config.total_cap as f64;
        if cap <= soft {
            return if len < cap { 1.0 } else { 0.0 };
        }
        1.0 - ((len - soft) / (cap - soft)).max(0.0)
    }
}
