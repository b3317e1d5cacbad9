//! Misbehavior tracking and banning.
//!
//! Offenses are counted in a sliding window per node. Crossing a threshold
//! earns a temporary ban; protocol violations and malicious content are
//! permanent immediately. Repeat temporary offenders are promoted to
//! permanent. Bans track both the node id and its last known address, and
//! both must clear before the peer is admitted again.

use crate::storage::{keys, KvStore, StorageError};
use crate::types::{now_ms, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Misbehavior {
    InvalidMessage,
    Spam,
    ProtocolViolation,
    MaliciousContent,
}

impl Misbehavior {
    fn is_permanent(self) -> bool {
        matches!(
            self,
            Misbehavior::ProtocolViolation | Misbehavior::MaliciousContent
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BanEntry {
    pub node_id: NodeId,
    pub address: String,
    pub reason: Misbehavior,
    pub banned_at: u64,
    /// None means permanent.
    pub expires_at: Option<u64>,
    pub offense_count: u32,
}

impl BanEntry {
    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(expiry) if now >= expiry)
    }
}

#[derive(Clone, Debug)]
pub struct BanConfig {
    pub invalid_message_threshold: u32,
    pub spam_threshold: u32,
    pub window_ms: u64,
    pub temp_ban_duration_ms: u64,
    /// Temporary bans beyond this promote the next offense to permanent.
    pub max_temp_bans: u32,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            invalid_message_threshold: 5,
            spam_threshold: 10,
            window_ms: 300_000,
            temp_ban_duration_ms: 3_600_000,
            max_temp_bans: 3,
        }
    }
}

pub struct BanList {
    config: BanConfig,
    bans: HashMap<NodeId, BanEntry>,
    banned_addresses: HashMap<String, NodeId>,
    /// Offense timestamps per node and kind, oldest first.
    offenses: HashMap<(NodeId, Misbehavior), VecDeque<u64>>,
    temp_ban_counts: HashMap<NodeId, u32>,
}

impl BanList {
    pub fn new(config: BanConfig) -> Self {
        Self {
            config,
            bans: HashMap::new(),
            banned_addresses: HashMap::new(),
            offenses: HashMap::new(),
            temp_ban_counts: HashMap::new(),
        }
    }

    /// Active ban for a node id or address, auto-unbanning expired entries.
    pub fn is_banned(&mut self, node_id: &NodeId, address: &str) -> bool {
        let now = now_ms();

        if let Some(entry) = self.bans.get(node_id) {
            if entry.is_expired(now) {
                self.clear(node_id);
            } else {
                return true;
            }
        }

        if let Some(owner) = self.banned_addresses.get(address).copied() {
            match self.bans.get(&owner) {
                Some(entry) if !entry.is_expired(now) => return true,
                _ => {
                    self.banned_addresses.remove(address);
                }
            }
        }

        false
    }

    /// Record one offense. Returns the ban applied, if the offense crossed
    /// a threshold.
    pub fn record(
        &mut self,
        node_id: &NodeId,
        address: &str,
        kind: Misbehavior,
    ) -> Option<BanEntry> {
        let now = now_ms();

        if kind.is_permanent() {
            return Some(self.ban(node_id, address, kind, None, now));
        }

        let window = self.config.window_ms;
        let timestamps = self.offenses.entry((*node_id, kind)).or_default();
        timestamps.push_back(now);
        while matches!(timestamps.front(), Some(t) if now.saturating_sub(*t) > window) {
            timestamps.pop_front();
        }

        let threshold = match kind {
            Misbehavior::InvalidMessage => self.config.invalid_message_threshold,
            Misbehavior::Spam => self.config.spam_threshold,
            _ => unreachable!("permanent kinds handled above"),
        };

        if (timestamps.len() as u32) < threshold {
            return None;
        }
        self.offenses.remove(&(*node_id, kind));

        // Repeat temporary offenders graduate to a permanent ban
        let prior_temp_bans = self.temp_ban_counts.get(node_id).copied().unwrap_or(0);
        let expires = if prior_temp_bans >= self.config.max_temp_bans {
            None
        } else {
            self.temp_ban_counts.insert(*node_id, prior_temp_bans + 1);
            Some(now + self.config.temp_ban_duration_ms)
        };

        Some(self.ban(node_id, address, kind, expires, now))
    }

    fn ban(
        &mut self,
        node_id: &NodeId,
        address: &str,
        reason: Misbehavior,
        expires_at: Option<u64>,
        now: u64,
    ) -> BanEntry {
        let offense_count = self
            .bans
            .get(node_id)
            .map(|e| e.offense_count + 1)
            .unwrap_or(1);
        let entry = BanEntry {
            node_id: *node_id,
            address: address.to_string(),
            reason,
            banned_at: now,
            expires_at,
            offense_count,
        };
        tracing::warn!(
            node = %hex::encode(node_id),
            address,
            permanent = expires_at.is_none(),
            ?reason,
            "🚫 Peer banned"
        );
        self.bans.insert(*node_id, entry.clone());
        self.banned_addresses.insert(address.to_string(), *node_id);
        entry
    }

    /// Explicit unban clears both the node-id ban and the address ban.
    pub fn unban(&mut self, node_id: &NodeId) -> bool {
        self.clear(node_id)
    }

    fn clear(&mut self, node_id: &NodeId) -> bool {
        match self.bans.remove(node_id) {
            Some(entry) => {
                self.banned_addresses.remove(&entry.address);
                true
            }
            None => false,
        }
    }

    /// Drop expired temporary bans (periodic task).
    pub fn sweep(&mut self) -> usize {
        let now = now_ms();
        let expired: Vec<NodeId> = self
            .bans
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.node_id)
            .collect();
        for node_id in &expired {
            self.clear(node_id);
        }
        expired.len()
    }

    pub fn active_bans(&self) -> usize {
        self.bans.len()
    }

    /// Persist active bans to the `ban/` key space for restart survival.
    pub async fn persist(&self, store: &dyn KvStore) -> Result<usize, StorageError> {
        let mut written = 0;
        for entry in self.bans.values() {
            store
                .put(keys::ban(&entry.node_id), bincode::serialize(entry)?)
                .await?;
            written += 1;
        }
        Ok(written)
    }

    pub async fn restore(&mut self, store: &dyn KvStore) -> Result<usize, StorageError> {
        let now = now_ms();
        let mut restored = 0;
        for (_, value) in store.scan_prefix(keys::BAN_PREFIX).await? {
            if let Ok(entry) = bincode::deserialize::<BanEntry>(&value) {
                if !entry.is_expired(now) {
                    self.banned_addresses
                        .insert(entry.address.clone(), entry.node_id);
                    self.bans.insert(entry.node_id, entry);
                    restored += 1;
                }
            }
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ban_list() -> BanList {
        BanList::new(BanConfig::default())
    }

    #[test]
    fn threshold_in_window_triggers_temp_ban() {
        let mut bans = ban_list();
        let node = [1u8; 32];

        for _ in 0..4 {
            assert!(bans.record(&node, "10.0.0.1:26100", Misbehavior::InvalidMessage).is_none());
        }
        let entry = bans
            .record(&node, "10.0.0.1:26100", Misbehavior::InvalidMessage)
            .expect("fifth invalid message should ban");
        assert!(entry.expires_at.is_some());
        assert!(bans.is_banned(&node, "10.0.0.1:26100"));
    }

    #[test]
    fn address_ban_blocks_other_node_ids() {
        let mut bans = ban_list();
        let node = [1u8; 32];

        for _ in 0..5 {
            bans.record(&node, "10.0.0.1:26100", Misbehavior::InvalidMessage);
        }

        // Same address, fresh node id: still banned
        assert!(bans.is_banned(&[2u8; 32], "10.0.0.1:26100"));
        // Different address and id: fine
        assert!(!bans.is_banned(&[2u8; 32], "10.0.0.2:26100"));
    }

    #[test]
    fn protocol_violation_is_immediately_permanent() {
        let mut bans = ban_list();
        let node = [1u8; 32];

        let entry = bans
            .record(&node, "10.0.0.1:26100", Misbehavior::ProtocolViolation)
            .unwrap();
        assert!(entry.expires_at.is_none());
    }

    #[test]
    fn repeat_offender_promoted_to_permanent() {
        let mut bans = BanList::new(BanConfig {
            max_temp_bans: 1,
            ..BanConfig::default()
        });
        let node = [1u8; 32];

        for _ in 0..5 {
            bans.record(&node, "a:1", Misbehavior::InvalidMessage);
        }
        assert!(bans.bans.get(&node).unwrap().expires_at.is_some());
        bans.unban(&node);

        // Second round of offenses: permanent
        for _ in 0..5 {
            bans.record(&node, "a:1", Misbehavior::InvalidMessage);
        }
        assert!(bans.bans.get(&node).unwrap().expires_at.is_none());
    }

    #[test]
    fn expired_temp_ban_auto_unbans() {
        let mut bans = ban_list();
        let node = [1u8; 32];

        for _ in 0..5 {
            bans.record(&node, "a:1", Misbehavior::InvalidMessage);
        }
        // Force expiry
        bans.bans.get_mut(&node).unwrap().expires_at = Some(0);
        assert!(!bans.is_banned(&node, "a:1"));
        assert_eq!(bans.active_bans(), 0);
    }

    #[test]
    fn unban_clears_node_and_address() {
        let mut bans = ban_list();
        let node = [1u8; 32];

        bans.record(&node, "a:1", Misbehavior::MaliciousContent);
        assert!(bans.is_banned(&node, "a:1"));

        assert!(bans.unban(&node));
        assert!(!bans.is_banned(&node, "a:1"));
        assert!(!bans.is_banned(&[2u8; 32], "a:1"));
    }

    #[tokio::test]
    async fn persistence_round_trip() {
        use crate::storage::MemoryStore;

        let store = MemoryStore::new();
        let mut bans = ban_list();
        let node = [1u8; 32];
        bans.record(&node, "a:1", Misbehavior::MaliciousContent);

        assert_eq!(bans.persist(&store).await.unwrap(), 1);

        let mut restored = ban_list();
        assert_eq!(restored.restore(&store).await.unwrap(), 1);
        assert!(restored.is_banned(&node, "a:1"));
    }
}
