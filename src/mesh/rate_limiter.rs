//! Per-sender quotas for fragment processing.
//!
//! Reassembly state is the cheapest thing for an attacker to inflate: every
//! first fragment of a new message id pins buffers until timeout. Excess
//! traffic is rejected with `RateLimited` and attributed to the sender as
//! spam misbehavior by the caller.

use crate::types::NodeId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct SenderQuota {
    window: Duration,
    fragments_per_window: u32,
    max_sessions_per_sender: usize,
    counters: HashMap<NodeId, (Instant, u32)>,
    sessions: HashMap<NodeId, usize>,
    last_cleanup: Instant,
}

impl SenderQuota {
    pub fn new(fragments_per_minute: u32, max_sessions_per_sender: usize) -> Self {
        Self {
            window: Duration::from_secs(60),
            fragments_per_window: fragments_per_minute,
            max_sessions_per_sender,
            counters: HashMap::new(),
            sessions: HashMap::new(),
            last_cleanup: Instant::now(),
        }
    }

    /// Count one fragment from `sender`. False means the quota is exhausted.
    pub fn allow_fragment(&mut self, sender: &NodeId) -> bool {
        let now = Instant::now();

        // Expired counters pile up one per sender; sweep occasionally
        if now.duration_since(self.last_cleanup) > Duration::from_secs(10) {
            let max_age = self.window * 10;
            self.counters
                .retain(|_, (start, _)| now.duration_since(*start) < max_age);
            self.last_cleanup = now;
        }

        let (start, count) = self.counters.entry(*sender).or_insert((now, 0));
        if now.duration_since(*start) > self.window {
            *start = now;
            *count = 0;
        }

        if *count >= self.fragments_per_window {
            false
        } else {
            *count += 1;
            true
        }
    }

    /// Whether `sender` may open another reassembly session.
    pub fn allow_session(&self, sender: &NodeId) -> bool {
        self.sessions.get(sender).copied().unwrap_or(0) < self.max_sessions_per_sender
    }

    pub fn session_opened(&mut self, sender: &NodeId) {
        *self.sessions.entry(*sender).or_insert(0) += 1;
    }

    pub fn session_closed(&mut self, sender: &NodeId) {
        if let Some(count) = self.sessions.get_mut(sender) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.sessions.remove(sender);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_quota_enforced() {
        let mut quota = SenderQuota::new(3, 2);
        let sender = [1u8; 32];

        assert!(quota.allow_fragment(&sender));
        assert!(quota.allow_fragment(&sender));
        assert!(quota.allow_fragment(&sender));
        assert!(!quota.allow_fragment(&sender));

        // An unrelated sender has its own budget
        assert!(quota.allow_fragment(&[2u8; 32]));
    }

    #[test]
    fn session_quota_tracks_open_close() {
        let mut quota = SenderQuota::new(100, 2);
        let sender = [1u8; 32];

        assert!(quota.allow_session(&sender));
        quota.session_opened(&sender);
        quota.session_opened(&sender);
        assert!(!quota.allow_session(&sender));

        quota.session_closed(&sender);
        assert!(quota.allow_session(&sender));
    }
}
