//! Blockchain-aware route table with loop prevention.
//!
//! Routes are advertised by their destination node, signed, and scored by
//! node class, UTXO completeness, freshness, link quality, hop count and
//! chain height. Sequence numbers guard against replayed or stale
//! advertisements; poisoned destinations sit out a hold-down interval.

use crate::crypto::{verify_signature, NodeIdentity};
use crate::error::{NodeError, NodeResult};
use crate::types::{NodeClass, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteEntry {
    pub destination: NodeId,
    pub next_hop: NodeId,
    pub hop_count: u8,
    pub node_class: NodeClass,
    pub blockchain_height: u64,
    pub utxo_completeness: f64,
    pub link_quality: f64,
    pub last_sync_at: u64,
    pub sequence_no: u64,
    /// Destination's signature over the fields it controls; next_hop,
    /// hop_count and link_quality are local observations.
    pub signature: Vec<u8>,
    pub active: bool,
}

impl RouteEntry {
    fn signed_region(
        destination: &NodeId,
        sequence_no: u64,
        node_class: NodeClass,
        blockchain_height: u64,
        utxo_completeness: f64,
    ) -> Vec<u8> {
        let class_byte = match node_class {
            NodeClass::Light => 0u8,
            NodeClass::Full => 1,
            NodeClass::Mining => 2,
        };
        let mut region = Vec::with_capacity(32 + 8 + 1 + 8 + 8);
        region.extend_from_slice(destination);
        region.extend_from_slice(&sequence_no.to_be_bytes());
        region.push(class_byte);
        region.extend_from_slice(&blockchain_height.to_be_bytes());
        region.extend_from_slice(&utxo_completeness.to_bits().to_be_bytes());
        region
    }

    /// Signature bytes a node attaches to its beacons so receivers can
    /// admit a route entry derived from them.
    pub fn sign_advertisement(
        identity: &NodeIdentity,
        sequence_no: u64,
        node_class: NodeClass,
        blockchain_height: u64,
        utxo_completeness: f64,
    ) -> Vec<u8> {
        identity.sign(&Self::signed_region(
            &identity.node_id(),
            sequence_no,
            node_class,
            blockchain_height,
            utxo_completeness,
        ))
    }

    /// Route entry observed through a beacon relayed by `next_hop`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_beacon(
        destination: NodeId,
        next_hop: NodeId,
        hop_count: u8,
        node_class: NodeClass,
        blockchain_height: u64,
        utxo_completeness: f64,
        link_quality: f64,
        sequence_no: u64,
        signature: Vec<u8>,
        now: u64,
    ) -> Self {
        Self {
            destination,
            next_hop,
            hop_count,
            node_class,
            blockchain_height,
            utxo_completeness,
            link_quality,
            last_sync_at: now,
            sequence_no,
            signature,
            active: true,
        }
    }

    /// Build a self-advertisement (hop 0, perfect link) for broadcast.
    pub fn advertise(
        identity: &NodeIdentity,
        sequence_no: u64,
        node_class: NodeClass,
        blockchain_height: u64,
        utxo_completeness: f64,
        now: u64,
    ) -> Self {
        let destination = identity.node_id();
        let signature = identity.sign(&Self::signed_region(
            &destination,
            sequence_no,
            node_class,
            blockchain_height,
            utxo_completeness,
        ));
        Self {
            destination,
            next_hop: destination,
            hop_count: 0,
            node_class,
            blockchain_height,
            utxo_completeness,
            link_quality: 1.0,
            last_sync_at: now,
            sequence_no,
            signature,
            active: true,
        }
    }

    pub fn verify(&self) -> NodeResult<()> {
        verify_signature(
            &self.destination,
            &Self::signed_region(
                &self.destination,
                self.sequence_no,
                self.node_class,
                self.blockchain_height,
                self.utxo_completeness,
            ),
            &self.signature,
        )
        .map_err(|_| {
            NodeError::protocol(
                Some(&hex::encode(self.destination)),
                "route signature invalid",
            )
        })
    }

    fn recency_bonus(&self, now: u64) -> f64 {
        match now.saturating_sub(self.last_sync_at) / 1_000 {
            0..=60 => 10.0,
            61..=300 => 5.0,
            301..=900 => 2.0,
            _ => 0.0,
        }
    }

    pub fn score(&self, now: u64) -> f64 {
        self.node_class.route_score_base()
            + 50.0 * self.utxo_completeness
            + self.recency_bonus(now)
            + 20.0 * self.link_quality
            - 5.0 * self.hop_count as f64
            + ((self.blockchain_height / 1_000) as f64).min(20.0)
    }
}

/// Outcome of a loop check on a proposed path vector.
#[derive(Debug, PartialEq)]
pub enum PathCheck {
    Clean,
    RepeatedNode,
    ContainsSelf,
    TooLong,
}

/// A path loops if any node repeats, our own id already appears, or the
/// path exceeds the permitted length.
pub fn check_path(path: &[NodeId], self_id: &NodeId, max_path_length: usize) -> PathCheck {
    if path.len() > max_path_length {
        return PathCheck::TooLong;
    }
    if path.contains(self_id) {
        return PathCheck::ContainsSelf;
    }
    let mut seen = std::collections::HashSet::with_capacity(path.len());
    for node in path {
        if !seen.insert(node) {
            return PathCheck::RepeatedNode;
        }
    }
    PathCheck::Clean
}

#[derive(Clone, Debug)]
pub struct RoutingConfig {
    pub max_routes_per_destination: usize,
    pub route_expiry_ms: u64,
    pub hold_down_ms: u64,
    pub max_path_length: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_routes_per_destination: 4,
            route_expiry_ms: 600_000,
            hold_down_ms: 120_000,
            max_path_length: 16,
        }
    }
}

pub struct RouteTable {
    config: RoutingConfig,
    routes: HashMap<NodeId, Vec<RouteEntry>>,
    /// Highest sequence number admitted per destination.
    sequences: HashMap<NodeId, u64>,
    /// Poisoned destinations and their hold-down expiry.
    poisoned: HashMap<NodeId, u64>,
}

#[derive(Debug, PartialEq)]
pub enum RouteAdmission {
    Inserted,
    Updated,
    IgnoredStale,
    RefusedHoldDown,
}

impl RouteTable {
    pub fn new(config: RoutingConfig) -> Self {
        Self {
            config,
            routes: HashMap::new(),
            sequences: HashMap::new(),
            poisoned: HashMap::new(),
        }
    }

    pub fn route_count(&self) -> usize {
        self.routes.values().map(|v| v.len()).sum()
    }

    /// Verify and admit a route advertisement.
    pub fn add_route(&mut self, entry: RouteEntry, now: u64) -> NodeResult<RouteAdmission> {
        entry.verify()?;

        if let Some(expiry) = self.poisoned.get(&entry.destination) {
            if now < *expiry {
                return Ok(RouteAdmission::RefusedHoldDown);
            }
            self.poisoned.remove(&entry.destination);
        }

        let known_seq = self
            .sequences
            .get(&entry.destination)
            .copied()
            .unwrap_or(0);
        let routes = self.routes.entry(entry.destination).or_default();
        let existing = routes
            .iter_mut()
            .find(|r| r.next_hop == entry.next_hop);

        let admission = match existing {
            Some(current) => {
                let newer = entry.sequence_no > current.sequence_no
                    || (entry.sequence_no == current.sequence_no
                        && entry.hop_count < current.hop_count);
                if !newer {
                    return Ok(RouteAdmission::IgnoredStale);
                }
                *current = entry.clone();
                RouteAdmission::Updated
            }
            None => {
                if entry.sequence_no < known_seq {
                    return Ok(RouteAdmission::IgnoredStale);
                }
                routes.push(entry.clone());
                RouteAdmission::Inserted
            }
        };

        // Keep the strongest routes only
        routes.sort_by(|a, b| {
            b.score(now)
                .partial_cmp(&a.score(now))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        routes.truncate(self.config.max_routes_per_destination);

        self.sequences
            .entry(entry.destination)
            .and_modify(|s| *s = (*s).max(entry.sequence_no))
            .or_insert(entry.sequence_no);

        Ok(admission)
    }

    pub fn best_route_for(&self, destination: &NodeId, now: u64) -> Option<&RouteEntry> {
        self.routes
            .get(destination)?
            .iter()
            .filter(|r| r.active)
            .max_by(|a, b| {
                a.score(now)
                    .partial_cmp(&b.score(now))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Best route toward any full or mining node, for ledger queries a light
    /// node cannot answer locally.
    pub fn best_full_node_route(&self, now: u64) -> Option<&RouteEntry> {
        self.routes
            .values()
            .flatten()
            .filter(|r| r.active && matches!(r.node_class, NodeClass::Full | NodeClass::Mining))
            .max_by(|a, b| {
                a.score(now)
                    .partial_cmp(&b.score(now))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Drop routes unrefreshed past the expiry.
    pub fn prune_stale(&mut self, now: u64) -> usize {
        let expiry = self.config.route_expiry_ms;
        let mut removed = 0;
        self.routes.retain(|_, routes| {
            let before = routes.len();
            routes.retain(|r| now.saturating_sub(r.last_sync_at) <= expiry);
            removed += before - routes.len();
            !routes.is_empty()
        });
        removed
    }

    /// Remove a destination and refuse new routes to it for the hold-down
    /// interval.
    pub fn poison(&mut self, destination: &NodeId, now: u64) {
        self.routes.remove(destination);
        self.poisoned
            .insert(*destination, now + self.config.hold_down_ms);
        tracing::warn!(
            destination = %hex::encode(destination),
            hold_down_ms = self.config.hold_down_ms,
            "☠️  Route poisoned"
        );
    }

    pub fn is_poisoned(&self, destination: &NodeId, now: u64) -> bool {
        matches!(self.poisoned.get(destination), Some(expiry) if now < *expiry)
    }

    pub fn check_path(&self, path: &[NodeId], self_id: &NodeId) -> PathCheck {
        check_path(path, self_id, self.config.max_path_length)
    }
}
