//! Peer discovery across four concurrent modes.
//!
//! DNS seed resolution, local mDNS announcements, mesh beacon intake and
//! peer exchange all feed one candidate cache. The cache is persisted at
//! shutdown so a restarted node does not begin from an empty address book.

use crate::storage::{KvStore, StorageError};
use crate::types::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::net::lookup_host;

const CACHE_KEY: &[u8] = b"peers/discovered";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DiscoveryMethod {
    DnsSeed,
    Mdns,
    MeshAnnouncement,
    PeerExchange,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredPeer {
    pub address: String,
    pub port: u16,
    pub method: DiscoveryMethod,
    pub discovered_at: u64,
    pub last_seen: u64,
}

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    pub dns_seeds: Vec<String>,
    pub default_port: u16,
    pub max_discovery_peers: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            dns_seeds: vec![],
            default_port: 26100,
            max_discovery_peers: 512,
        }
    }
}

pub struct PeerDiscovery {
    config: DiscoveryConfig,
    cache: HashMap<(String, u16), DiscoveredPeer>,
}

impl PeerDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
        }
    }

    pub fn known(&self) -> usize {
        self.cache.len()
    }

    pub fn candidates(&self) -> Vec<DiscoveredPeer> {
        let mut peers: Vec<DiscoveredPeer> = self.cache.values().cloned().collect();
        peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        peers
    }

    fn is_unusable(address: &str) -> bool {
        address.is_empty()
            || address == "0.0.0.0"
            || address == "127.0.0.1"
            || address.starts_with("127.")
            || address == "localhost"
    }

    /// Insert or refresh a candidate, respecting the cache cap. Refreshes
    /// always land; new entries are dropped once the cap is hit.
    pub fn note(&mut self, address: &str, port: u16, method: DiscoveryMethod) -> bool {
        if Self::is_unusable(address) {
            return false;
        }
        let now = now_ms();
        let key = (address.to_string(), port);

        if let Some(existing) = self.cache.get_mut(&key) {
            existing.last_seen = now;
            return true;
        }
        if self.cache.len() >= self.config.max_discovery_peers {
            return false;
        }
        self.cache.insert(
            key,
            DiscoveredPeer {
                address: address.to_string(),
                port,
                method,
                discovered_at: now,
                last_seen: now,
            },
        );
        true
    }

    /// Resolve the configured DNS seeds into candidates.
    pub async fn dns_round(&mut self) -> usize {
        let mut found = 0;
        let seeds = self.config.dns_seeds.clone();
        let default_port = self.config.default_port;

        for seed in seeds {
            let target = if seed.contains(':') {
                seed.clone()
            } else {
                format!("{seed}:{default_port}")
            };
            match lookup_host(target).await {
                Ok(addrs) => {
                    for addr in addrs {
                        if self.note(&addr.ip().to_string(), addr.port(), DiscoveryMethod::DnsSeed)
                        {
                            found += 1;
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(seed = %seed, "DNS seed lookup failed: {e}");
                }
            }
        }
        if found > 0 {
            tracing::info!(found, "🌱 DNS seed round complete");
        }
        found
    }

    /// Candidates advertised by an mDNS responder on the local segment.
    pub fn mdns_observed(&mut self, address: &str, port: u16) -> bool {
        self.note(address, port, DiscoveryMethod::Mdns)
    }

    /// Candidates learned from a mesh beacon or capability announce.
    pub fn mesh_announced(&mut self, address: &str, port: u16) -> bool {
        self.note(address, port, DiscoveryMethod::MeshAnnouncement)
    }

    /// Addresses shared by a connected peer.
    pub fn peer_exchange(&mut self, shared: &[String]) -> usize {
        let default_port = self.config.default_port;
        let mut accepted = 0;
        for entry in shared {
            let (address, port) = match entry.rsplit_once(':') {
                Some((host, port_str)) => match port_str.parse::<u16>() {
                    Ok(port) => (host.to_string(), port),
                    Err(_) => (entry.clone(), default_port),
                },
                None => (entry.clone(), default_port),
            };
            if self.note(&address, port, DiscoveryMethod::PeerExchange) {
                accepted += 1;
            }
        }
        accepted
    }

    pub async fn persist(&self, store: &dyn KvStore) -> Result<(), StorageError> {
        let peers: Vec<&DiscoveredPeer> = self.cache.values().collect();
        store
            .put(CACHE_KEY.to_vec(), bincode::serialize(&peers)?)
            .await
    }

    pub async fn restore(&mut self, store: &dyn KvStore) -> Result<usize, StorageError> {
        let Some(raw) = store.get(CACHE_KEY).await? else {
            return Ok(0);
        };
        let peers: Vec<DiscoveredPeer> = bincode::deserialize(&raw)?;
        let restored = peers.len();
        for peer in peers {
            self.cache
                .insert((peer.address.clone(), peer.port), peer);
        }
        Ok(restored)
    }
}
