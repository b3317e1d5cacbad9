//! Peer lifecycle: the authoritative peer table.
//!
//! The manager owns every peer record. The connection pool never holds
//! records; it works through the manager's capability surface
//! (`get_peer_score`, `update_connection_state`, `record_success`,
//! `record_failure`). Misbehavior flows into the ban list, and banned
//! peers are refused at `add_peer` until their ban clears.

use crate::events::{EventBus, PeerBanned, PeerDiscovered};
use crate::peers::ban_list::{BanConfig, BanList, Misbehavior};
use crate::peers::discovery::{DiscoveredPeer, DiscoveryMethod};
use crate::peers::pool::{Admission, ConnectionPool, Direction, PoolConfig};
use crate::peers::scoring::{self, PeerObservations, INITIAL_SCORE};
use crate::types::{now_ms, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PeerType {
    Light,
    Full,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
    pub id: NodeId,
    pub address: String,
    pub port: u16,
    pub peer_type: PeerType,
    pub discovery_method: DiscoveryMethod,
    pub discovered_at: u64,
    pub last_seen: u64,
    pub connection_state: ConnectionState,
    pub connection_attempts: u32,
    pub connection_successes: u32,
    pub latency_ms: Option<u64>,
    pub packet_loss: f64,
    pub signal_strength: Option<i16>,
    pub hop_count: Option<u8>,
    pub reputation: f64,
    pub score: f64,
    pub reliability: f64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_invalid: u64,
    pub blocks_propagated: u64,
    pub tx_propagated: u64,
    pub banned: bool,
    pub ban_expires: Option<u64>,
}

impl Peer {
    pub fn new(
        id: NodeId,
        address: &str,
        port: u16,
        peer_type: PeerType,
        method: DiscoveryMethod,
    ) -> Self {
        let now = now_ms();
        Self {
            id,
            address: address.to_string(),
            port,
            peer_type,
            discovery_method: method,
            discovered_at: now,
            last_seen: now,
            connection_state: ConnectionState::Disconnected,
            connection_attempts: 0,
            connection_successes: 0,
            latency_ms: None,
            packet_loss: 0.0,
            signal_strength: None,
            hop_count: None,
            reputation: INITIAL_SCORE,
            score: INITIAL_SCORE,
            reliability: 0.5,
            messages_sent: 0,
            messages_received: 0,
            messages_invalid: 0,
            blocks_propagated: 0,
            tx_propagated: 0,
            banned: false,
            ban_expires: None,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    fn observations(&self, uptime: f64) -> PeerObservations {
        let delivery_rate = if self.messages_sent == 0 {
            0.5
        } else {
            1.0 - self.packet_loss
        };
        let success_rate = if self.connection_attempts == 0 {
            0.5
        } else {
            self.connection_successes as f64 / self.connection_attempts as f64
        };
        PeerObservations {
            uptime,
            connection_success_rate: success_rate,
            message_delivery_rate: delivery_rate.clamp(0.0, 1.0),
            latency_ms: self.latency_ms,
            throughput_score: (self.messages_received as f64 / 1_000.0).min(1.0),
            signal_dbm: self.signal_strength,
            messages_received: self.messages_received,
            messages_invalid: self.messages_invalid,
            propagation_score: ((self.blocks_propagated + self.tx_propagated) as f64 / 100.0)
                .min(1.0),
            compliance_score: if self.messages_invalid == 0 { 1.0 } else { 0.8 },
        }
    }
}

#[derive(Clone, Debug)]
pub struct PeerManagerConfig {
    pub max_discovery_peers: usize,
    pub score_decay_rate: f64,
    pub ban: BanConfig,
    pub pool: PoolConfig,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            max_discovery_peers: 512,
            score_decay_rate: 0.05,
            ban: BanConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

pub struct PeerManager {
    config: PeerManagerConfig,
    peers: HashMap<NodeId, Peer>,
    ban_list: BanList,
    pool: ConnectionPool,
    events: EventBus,
    last_rescore_at: u64,
}

impl PeerManager {
    pub fn new(config: PeerManagerConfig, events: EventBus) -> Self {
        let ban_list = BanList::new(config.ban.clone());
        let pool = ConnectionPool::new(config.pool.clone());
        Self {
            config,
            peers: HashMap::new(),
            ban_list,
            pool,
            events,
            last_rescore_at: now_ms(),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Peer> {
        self.peers.get(node_id)
    }

    pub fn ban_list_mut(&mut self) -> &mut BanList {
        &mut self.ban_list
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Admit a peer into the table. Returns false while the node id or its
    /// address is banned, and refreshes `last_seen` for known peers.
    pub fn add_peer(&mut self, candidate: Peer) -> bool {
        if self.ban_list.is_banned(&candidate.id, &candidate.endpoint()) {
            tracing::debug!(peer = %hex::encode(candidate.id), "Refusing banned peer");
            return false;
        }

        match self.peers.get_mut(&candidate.id) {
            Some(existing) => {
                existing.last_seen = now_ms();
                existing.address = candidate.address;
                existing.port = candidate.port;
            }
            None => {
                if self.peers.len() >= self.config.max_discovery_peers {
                    return false;
                }
                let _ = self.events.peer_discovered.send(PeerDiscovered {
                    node_id: Some(candidate.id),
                    address: candidate.address.clone(),
                    port: candidate.port,
                });
                self.peers.insert(candidate.id, candidate);
            }
        }
        true
    }

    /// Fold a discovery round into the table. Candidates without a known
    /// node id stay in the discovery cache until a handshake reveals one.
    pub fn intake_discovered(&mut self, discovered: &[DiscoveredPeer]) -> usize {
        let mut refreshed = 0;
        for candidate in discovered {
            if let Some(peer) = self
                .peers
                .values_mut()
                .find(|p| p.address == candidate.address && p.port == candidate.port)
            {
                peer.last_seen = now_ms();
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Record misbehavior; a triggered ban disconnects and marks the peer.
    pub fn record_misbehavior(&mut self, node_id: &NodeId, kind: Misbehavior) -> bool {
        let endpoint = self
            .peers
            .get(node_id)
            .map(|p| p.endpoint())
            .unwrap_or_default();

        match self.ban_list.record(node_id, &endpoint, kind) {
            Some(entry) => {
                if let Some(peer) = self.peers.get_mut(node_id) {
                    peer.banned = true;
                    peer.ban_expires = entry.expires_at;
                    peer.connection_state = ConnectionState::Disconnected;
                }
                self.pool.remove(node_id);
                let _ = self.events.peer_banned.send(PeerBanned {
                    node_id: *node_id,
                    address: endpoint,
                    permanent: entry.expires_at.is_none(),
                });
                true
            }
            None => false,
        }
    }

    pub fn unban(&mut self, node_id: &NodeId) -> bool {
        let cleared = self.ban_list.unban(node_id);
        if cleared {
            if let Some(peer) = self.peers.get_mut(node_id) {
                peer.banned = false;
                peer.ban_expires = None;
            }
        }
        cleared
    }

    /// Count an invalid message against a peer whose frame itself decoded
    /// (the envelope was fine, the content was not).
    pub fn note_invalid_message(&mut self, node_id: &NodeId) {
        if let Some(peer) = self.peers.get_mut(node_id) {
            peer.messages_invalid += 1;
        }
    }

    pub fn record_message(&mut self, node_id: &NodeId, valid: bool) {
        if let Some(peer) = self.peers.get_mut(node_id) {
            peer.messages_received += 1;
            peer.last_seen = now_ms();
            if !valid {
                peer.messages_invalid += 1;
            }
        }
        self.pool.touch(node_id, now_ms());
    }

    // --- capability surface used by the connection pool ---

    pub fn get_peer_score(&self, node_id: &NodeId) -> f64 {
        self.peers
            .get(node_id)
            .map(|p| p.score)
            .unwrap_or(INITIAL_SCORE)
    }

    pub fn update_connection_state(&mut self, node_id: &NodeId, state: ConnectionState) {
        if let Some(peer) = self.peers.get_mut(node_id) {
            if state == ConnectionState::Connecting {
                peer.connection_attempts += 1;
            }
            peer.connection_state = state;
        }
    }

    pub fn record_success(&mut self, node_id: &NodeId, latency_ms: u64) {
        if let Some(peer) = self.peers.get_mut(node_id) {
            peer.connection_successes += 1;
            peer.latency_ms = Some(latency_ms);
            peer.last_seen = now_ms();
        }
    }

    pub fn record_failure(&mut self, node_id: &NodeId) {
        if let Some(peer) = self.peers.get_mut(node_id) {
            peer.packet_loss = (peer.packet_loss + 0.1).min(1.0);
            peer.connection_state = ConnectionState::Failed;
        }
    }

    // --- connection pool operations ---

    pub fn try_connect(&mut self, node_id: &NodeId, direction: Direction) -> Admission {
        let score = self.get_peer_score(node_id);
        let admission = self.pool.admit(*node_id, direction, score, now_ms());
        match admission {
            Admission::Admitted => {
                self.update_connection_state(node_id, ConnectionState::Connecting);
            }
            Admission::AdmittedWithEviction(evicted) => {
                self.update_connection_state(node_id, ConnectionState::Connecting);
                self.update_connection_state(&evicted, ConnectionState::Disconnected);
            }
            Admission::Rejected => {}
        }
        admission
    }

    pub fn auto_connect_targets(&self) -> Vec<NodeId> {
        let candidates: Vec<(NodeId, f64)> = self
            .peers
            .values()
            .filter(|p| !p.banned && p.connection_state == ConnectionState::Disconnected)
            .map(|p| (p.id, p.score))
            .collect();
        self.pool.auto_connect_targets(&candidates)
    }

    /// Periodic maintenance: decay + recompute scores, sweep bans, close
    /// idle connections.
    pub fn maintain(&mut self) {
        let now = now_ms();
        let elapsed_days = now.saturating_sub(self.last_rescore_at) as f64 / 86_400_000.0;
        self.last_rescore_at = now;

        for peer in self.peers.values_mut() {
            let age_days = now.saturating_sub(peer.discovered_at) as f64 / 86_400_000.0;
            let uptime = if peer.connection_state == ConnectionState::Connected {
                1.0
            } else {
                (1.0 - age_days / 30.0).clamp(0.0, 0.8)
            };
            let fresh = scoring::overall(&peer.observations(uptime));
            let carried = scoring::decayed(peer.score, self.config.score_decay_rate, elapsed_days);
            // New evidence dominates, decayed history smooths
            peer.score = 0.7 * fresh + 0.3 * carried;
            peer.reliability = scoring::reliability(&peer.observations(uptime));
            self.pool.update_score(&peer.id, peer.score);
        }

        self.ban_list.sweep();
        for closed in self.pool.close_stale(now) {
            if let Some(peer) = self.peers.get_mut(&closed) {
                peer.connection_state = ConnectionState::Disconnected;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PeerManager {
        PeerManager::new(PeerManagerConfig::default(), EventBus::new())
    }

    fn peer(id_byte: u8) -> Peer {
        Peer::new(
            [id_byte; 32],
            "10.0.0.1",
            26100,
            PeerType::Full,
            DiscoveryMethod::DnsSeed,
        )
    }

    #[test]
    fn add_peer_and_refresh() {
        let mut pm = manager();
        assert!(pm.add_peer(peer(1)));
        assert_eq!(pm.peer_count(), 1);

        // Re-adding refreshes rather than duplicating
        assert!(pm.add_peer(peer(1)));
        assert_eq!(pm.peer_count(), 1);
    }

    #[test]
    fn repeated_invalid_messages_ban_and_block_readd() {
        let mut pm = manager();
        assert!(pm.add_peer(peer(1)));

        let mut banned = false;
        for _ in 0..5 {
            banned = pm.record_misbehavior(&[1u8; 32], Misbehavior::InvalidMessage);
        }
        assert!(banned, "fifth invalid message should ban");
        assert!(pm.get(&[1u8; 32]).unwrap().banned);

        // add_peer refuses both the node id and its address
        assert!(!pm.add_peer(peer(1)));
        let mut same_address_peer = peer(2);
        same_address_peer.address = "10.0.0.1".to_string();
        assert!(!pm.add_peer(same_address_peer));

        // unban clears both
        assert!(pm.unban(&[1u8; 32]));
        assert!(pm.add_peer(peer(1)));
    }

    #[test]
    fn ban_event_emitted() {
        let mut pm = manager();
        let mut rx = pm.events.peer_banned.subscribe();
        pm.add_peer(peer(1));
        pm.record_misbehavior(&[1u8; 32], Misbehavior::MaliciousContent);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.node_id, [1u8; 32]);
        assert!(event.permanent);
    }

    #[test]
    fn connection_capability_surface() {
        let mut pm = manager();
        pm.add_peer(peer(1));

        assert_eq!(pm.get_peer_score(&[1u8; 32]), INITIAL_SCORE);
        assert_eq!(pm.try_connect(&[1u8; 32], Direction::Outbound), Admission::Admitted);
        assert_eq!(
            pm.get(&[1u8; 32]).unwrap().connection_state,
            ConnectionState::Connecting
        );

        pm.update_connection_state(&[1u8; 32], ConnectionState::Connected);
        pm.record_success(&[1u8; 32], 45);
        assert_eq!(pm.get(&[1u8; 32]).unwrap().latency_ms, Some(45));
    }

    #[test]
    fn maintain_rescores_peers() {
        let mut pm = manager();
        pm.add_peer(peer(1));
        pm.update_connection_state(&[1u8; 32], ConnectionState::Connecting);
        pm.update_connection_state(&[1u8; 32], ConnectionState::Connected);
        pm.record_success(&[1u8; 32], 40);
        for _ in 0..200 {
            pm.record_message(&[1u8; 32], true);
        }

        pm.maintain();
        let scored = pm.get(&[1u8; 32]).unwrap().score;
        assert!(scored > 0.0);
        assert!(scored <= 100.0);
    }
}
