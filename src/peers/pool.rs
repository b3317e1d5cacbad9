//! Connection pool with score-based admission.
//!
//! The pool tracks live connections only; peer records stay with the
//! manager, which passes each candidate's current score into admission.
//! When full, a sufficiently better newcomer evicts the weakest connection
//! in its direction. Idle connections are closed by the periodic sweep.

use crate::types::NodeId;
use std::collections::HashMap;

/// Score advantage a newcomer needs to evict the weakest pool member.
const EVICTION_MARGIN: f64 = 10.0;
/// Minimum score for automatic outbound dialing.
pub const AUTO_CONNECT_MIN_SCORE: f64 = 30.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Clone, Debug)]
pub struct PooledConnection {
    pub node_id: NodeId,
    pub direction: Direction,
    pub connected_at: u64,
    pub last_activity: u64,
    pub score: f64,
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_outbound: usize,
    pub max_inbound: usize,
    pub stale_after_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_outbound: 8,
            max_inbound: 32,
            stale_after_ms: 300_000,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Admission {
    Admitted,
    /// Admitted after evicting the named weaker connection.
    AdmittedWithEviction(NodeId),
    Rejected,
}

pub struct ConnectionPool {
    config: PoolConfig,
    connections: HashMap<NodeId, PooledConnection>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            connections: HashMap::new(),
        }
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.connections.contains_key(node_id)
    }

    pub fn count(&self, direction: Direction) -> usize {
        self.connections
            .values()
            .filter(|c| c.direction == direction)
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn cap(&self, direction: Direction) -> usize {
        match direction {
            Direction::Outbound => self.config.max_outbound,
            Direction::Inbound => self.config.max_inbound,
        }
    }

    pub fn admit(
        &mut self,
        node_id: NodeId,
        direction: Direction,
        score: f64,
        now: u64,
    ) -> Admission {
        if self.connections.contains_key(&node_id) {
            return Admission::Rejected;
        }

        let connection = PooledConnection {
            node_id,
            direction,
            connected_at: now,
            last_activity: now,
            score,
        };

        if self.count(direction) < self.cap(direction) {
            self.connections.insert(node_id, connection);
            return Admission::Admitted;
        }

        // Full: a clearly better peer displaces the weakest member
        let weakest = self
            .connections
            .values()
            .filter(|c| c.direction == direction)
            .min_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .map(|c| (c.node_id, c.score));

        if let Some((weakest_id, weakest_score)) = weakest {
            if score >= weakest_score + EVICTION_MARGIN {
                self.connections.remove(&weakest_id);
                self.connections.insert(node_id, connection);
                return Admission::AdmittedWithEviction(weakest_id);
            }
        }
        Admission::Rejected
    }

    pub fn touch(&mut self, node_id: &NodeId, now: u64) {
        if let Some(connection) = self.connections.get_mut(node_id) {
            connection.last_activity = now;
        }
    }

    pub fn update_score(&mut self, node_id: &NodeId, score: f64) {
        if let Some(connection) = self.connections.get_mut(node_id) {
            connection.score = score;
        }
    }

    pub fn remove(&mut self, node_id: &NodeId) -> bool {
        self.connections.remove(node_id).is_some()
    }

    /// Close connections idle past the threshold, returning the closed ids.
    pub fn close_stale(&mut self, now: u64) -> Vec<NodeId> {
        let stale: Vec<NodeId> = self
            .connections
            .values()
            .filter(|c| now.saturating_sub(c.last_activity) > self.config.stale_after_ms)
            .map(|c| c.node_id)
            .collect();
        for node_id in &stale {
            self.connections.remove(node_id);
        }
        stale
    }

    pub fn wants_outbound(&self) -> bool {
        self.count(Direction::Outbound) < self.config.max_outbound
    }

    /// Pick auto-connect targets from scored candidates until the outbound
    /// target is met.
    pub fn auto_connect_targets(&self, candidates: &[(NodeId, f64)]) -> Vec<NodeId> {
        let mut open_slots = self
            .config
            .max_outbound
            .saturating_sub(self.count(Direction::Outbound));
        let mut targets = Vec::new();

        let mut sorted: Vec<&(NodeId, f64)> = candidates
            .iter()
            .filter(|(id, score)| *score >= AUTO_CONNECT_MIN_SCORE && !self.contains(id))
            .collect();
        sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        for (node_id, _) in sorted {
            if open_slots == 0 {
                break;
            }
            targets.push(*node_id);
            open_slots -= 1;
        }
        targets
    }
}
