//! Controlled flooding with duplicate suppression.
//!
//! Flood payloads are signed by their originator; TTL and the path vector
//! mutate in flight and stay outside the signature. The cache remembers
//! `(originator, sequence_no)` pairs in a bounded LRU so the same flood is
//! never forwarded twice within the cache age.

use crate::crypto::{sha256, verify_signature, NodeIdentity};
use crate::error::{NodeError, NodeResult};
use crate::types::{NodeId, PayloadKind};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FloodMessage {
    pub originator: NodeId,
    pub sequence_no: u64,
    pub ttl: u8,
    pub payload_kind: PayloadKind,
    /// Node ids this flood already traversed, newest last.
    pub path: Vec<NodeId>,
    pub signature: Vec<u8>,
    pub payload: Vec<u8>,
}

impl FloodMessage {
    fn signed_region(
        originator: &NodeId,
        sequence_no: u64,
        payload_kind: PayloadKind,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut region = Vec::with_capacity(32 + 8 + 1 + 32);
        region.extend_from_slice(originator);
        region.extend_from_slice(&sequence_no.to_be_bytes());
        region.push(payload_kind.flood_priority());
        region.extend_from_slice(&sha256(payload));
        region
    }

    pub fn originate(
        identity: &NodeIdentity,
        sequence_no: u64,
        ttl: u8,
        payload_kind: PayloadKind,
        payload: Vec<u8>,
    ) -> Self {
        let originator = identity.node_id();
        let signature = identity.sign(&Self::signed_region(
            &originator,
            sequence_no,
            payload_kind,
            &payload,
        ));
        Self {
            originator,
            sequence_no,
            ttl,
            payload_kind,
            path: vec![originator],
            signature,
            payload,
        }
    }

    pub fn verify(&self) -> NodeResult<()> {
        verify_signature(
            &self.originator,
            &Self::signed_region(
                &self.originator,
                self.sequence_no,
                self.payload_kind,
                &self.payload,
            ),
            &self.signature,
        )
        .map_err(|_| {
            NodeError::protocol(
                Some(&hex::encode(self.originator)),
                "flood signature invalid",
            )
        })
    }
}

#[derive(Debug, PartialEq)]
pub enum FloodDecision {
    /// Admit and relay; the message's TTL has been decremented and this
    /// node appended to the path.
    Forward,
    DropDuplicate,
    DropTtlExpired,
}

struct CacheEntry {
    first_seen: u64,
    #[allow(dead_code)]
    payload_kind: PayloadKind,
    processed: bool,
}

pub struct FloodCache {
    entries: LruCache<(NodeId, u64), CacheEntry>,
    cache_age_ms: u64,
}

impl FloodCache {
    pub fn new(capacity: usize, cache_age_ms: u64) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
            cache_age_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_duplicate(&mut self, key: &(NodeId, u64), now: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) => now.saturating_sub(entry.first_seen) <= self.cache_age_ms,
            None => false,
        }
    }

    /// Admission check for a flood arriving at `self_id`. Bad signatures are
    /// protocol violations; duplicates and dead TTLs are silent drops. On
    /// admission the TTL is decremented, the node joins the path vector and
    /// the LRU evicts its oldest entry if at capacity.
    pub fn should_forward(
        &mut self,
        message: &mut FloodMessage,
        self_id: &NodeId,
        now: u64,
    ) -> NodeResult<FloodDecision> {
        message.verify()?;

        let key = (message.originator, message.sequence_no);
        if self.is_duplicate(&key, now) {
            return Ok(FloodDecision::DropDuplicate);
        }

        if message.ttl == 0 {
            return Ok(FloodDecision::DropTtlExpired);
        }

        self.entries.put(
            key,
            CacheEntry {
                first_seen: now,
                payload_kind: message.payload_kind,
                processed: true,
            },
        );

        message.ttl -= 1;
        message.path.push(*self_id);
        Ok(FloodDecision::Forward)
    }

    pub fn mark_processed(&mut self, originator: &NodeId, sequence_no: u64) {
        if let Some(entry) = self.entries.get_mut(&(*originator, sequence_no)) {
            entry.processed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_type::NetworkType;
    use crate::types::now_ms;

    fn flood(identity: &NodeIdentity, seq: u64, ttl: u8) -> FloodMessage {
        FloodMessage::originate(
            identity,
            seq,
            ttl,
            PayloadKind::UtxoTransaction,
            vec![1, 2, 3],
        )
    }

    #[test]
    fn forward_once_then_duplicate() {
        let origin = NodeIdentity::generate(NetworkType::Testnet);
        let relay = [9u8; 32];
        let mut cache = FloodCache::new(16, 60_000);
        let now = now_ms();

        let mut msg = flood(&origin, 1, 5);
        assert_eq!(
            cache.should_forward(&mut msg, &relay, now).unwrap(),
            FloodDecision::Forward
        );
        assert_eq!(msg.ttl, 4);
        assert_eq!(msg.path.last(), Some(&relay));

        let mut again = flood(&origin, 1, 5);
        assert_eq!(
            cache.should_forward(&mut again, &relay, now + 10).unwrap(),
            FloodDecision::DropDuplicate
        );

        // A different sequence number is a fresh flood
        let mut next = flood(&origin, 2, 5);
        assert_eq!(
            cache.should_forward(&mut next, &relay, now + 10).unwrap(),
            FloodDecision::Forward
        );
    }

    #[test]
    fn dead_ttl_dropped() {
        let origin = NodeIdentity::generate(NetworkType::Testnet);
        let mut cache = FloodCache::new(16, 60_000);

        let mut msg = flood(&origin, 1, 0);
        assert_eq!(
            cache.should_forward(&mut msg, &[9u8; 32], now_ms()).unwrap(),
            FloodDecision::DropTtlExpired
        );
    }

    #[test]
    fn tampered_flood_rejected() {
        let origin = NodeIdentity::generate(NetworkType::Testnet);
        let mut cache = FloodCache::new(16, 60_000);

        let mut msg = flood(&origin, 1, 5);
        msg.payload.push(0xFF);
        assert!(cache.should_forward(&mut msg, &[9u8; 32], now_ms()).is_err());

        // TTL and path are free to mutate in flight
        let mut relayed = flood(&origin, 2, 5);
        relayed.ttl = 3;
        relayed.path.push([7u8; 32]);
        assert!(cache
            .should_forward(&mut relayed, &[9u8; 32], now_ms())
            .is_ok());
    }

    #[test]
    fn cache_age_expires_entries() {
        let origin = NodeIdentity::generate(NetworkType::Testnet);
        let mut cache = FloodCache::new(16, 1_000);
        let now = now_ms();

        let mut msg = flood(&origin, 1, 5);
        cache.should_forward(&mut msg, &[9u8; 32], now).unwrap();

        // Past the cache age the same flood may circulate again
        let mut again = flood(&origin, 1, 5);
        assert_eq!(
            cache.should_forward(&mut again, &[9u8; 32], now + 2_000).unwrap(),
            FloodDecision::Forward
        );
    }

    #[test]
    fn capacity_evicts_oldest() {
        let origin = NodeIdentity::generate(NetworkType::Testnet);
        let mut cache = FloodCache::new(2, 60_000);
        let now = now_ms();

        for seq in 1..=3u64 {
            let mut msg = flood(&origin, seq, 5);
            cache.should_forward(&mut msg, &[9u8; 32], now).unwrap();
        }
        assert_eq!(cache.len(), 2);

        // Sequence 1 was evicted, so it floods again
        let mut replay = flood(&origin, 1, 5);
        assert_eq!(
            cache.should_forward(&mut replay, &[9u8; 32], now).unwrap(),
            FloodDecision::Forward
        );
    }
}
