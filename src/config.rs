//! Configuration management for the Lorachain daemon.
//!
//! Note: Some items appear as "dead code" in library checks because they're
//! only used by the binary (main.rs): config file load/save and the data
//! directory helpers.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::network_type::NetworkType;

/// Platform data directory for the daemon.
#[allow(dead_code)]
pub fn get_data_dir() -> PathBuf {
    if cfg!(windows) {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lorachain")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lorachain")
    }
}

#[allow(dead_code)]
pub fn get_network_data_dir(network: &NetworkType) -> PathBuf {
    let base = get_data_dir();
    match network {
        NetworkType::Mainnet => base,
        NetworkType::Testnet => base.join("testnet"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub mesh: MeshConfig,
    pub queue: QueueSection,
    pub routing: RoutingSection,
    pub peers: PeersSection,
    pub storage: StorageSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_name")]
    pub name: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
    #[serde(default = "default_node_class")]
    pub node_class: String,
}

fn default_node_name() -> String {
    "lorad".to_string()
}

fn default_network() -> String {
    "testnet".to_string()
}

fn default_chain_id() -> String {
    "lorachain-main".to_string()
}

fn default_node_class() -> String {
    "full".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            network: default_network(),
            chain_id: default_chain_id(),
            node_class: default_node_class(),
        }
    }
}

impl NodeConfig {
    #[allow(dead_code)]
    pub fn network_type(&self) -> NetworkType {
        match self.network.to_lowercase().as_str() {
            "mainnet" => NetworkType::Mainnet,
            _ => NetworkType::Testnet,
        }
    }

    pub fn node_class(&self) -> crate::types::NodeClass {
        match self.node_class.to_lowercase().as_str() {
            "mining" => crate::types::NodeClass::Mining,
            "light" => crate::types::NodeClass::Light,
            _ => crate::types::NodeClass::Full,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_effective_bps")]
    pub effective_bps: u32,
    #[serde(default = "default_max_sessions")]
    pub max_reassembly_sessions: usize,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_fragments_per_minute")]
    pub fragments_per_minute: u32,
    #[serde(default = "default_sessions_per_sender")]
    pub max_sessions_per_sender: usize,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_region() -> String {
    "EU868".to_string()
}

fn default_effective_bps() -> u32 {
    crate::mesh::duty_cycle::DEFAULT_EFFECTIVE_BPS
}

fn default_max_sessions() -> usize {
    256
}

fn default_session_timeout_ms() -> u64 {
    120_000
}

fn default_fragments_per_minute() -> u32 {
    600
}

fn default_sessions_per_sender() -> usize {
    16
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            region: default_region(),
            effective_bps: default_effective_bps(),
            max_reassembly_sessions: default_max_sessions(),
            session_timeout_ms: default_session_timeout_ms(),
            fragments_per_minute: default_fragments_per_minute(),
            max_sessions_per_sender: default_sessions_per_sender(),
        }
    }
}

impl MeshConfig {
    pub fn region(&self) -> crate::mesh::duty_cycle::Region {
        match self.region.to_uppercase().as_str() {
            "US915" => crate::mesh::duty_cycle::Region::Us915,
            "EU868" => crate::mesh::duty_cycle::Region::Eu868,
            _ => crate::mesh::duty_cycle::Region::Other,
        }
    }

    pub fn fragmenter_config(&self) -> crate::mesh::fragment::FragmenterConfig {
        crate::mesh::fragment::FragmenterConfig {
            max_sessions: self.max_reassembly_sessions,
            session_timeout_ms: self.session_timeout_ms,
            fragments_per_minute: self.fragments_per_minute,
            max_sessions_per_sender: self.max_sessions_per_sender,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_queue_cap")]
    pub total_cap: usize,
    #[serde(default = "default_emergency_reserve")]
    pub emergency_reserve: usize,
    #[serde(default = "default_soft_threshold")]
    pub soft_threshold: usize,
}

fn default_queue_cap() -> usize {
    1_000
}

fn default_emergency_reserve() -> usize {
    50
}

fn default_soft_threshold() -> usize {
    800
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            total_cap: default_queue_cap(),
            emergency_reserve: default_emergency_reserve(),
            soft_threshold: default_soft_threshold(),
        }
    }
}

impl QueueSection {
    pub fn queue_config(&self) -> crate::mesh::priority_queue::QueueConfig {
        crate::mesh::priority_queue::QueueConfig {
            total_cap: self.total_cap,
            emergency_reserve: self.emergency_reserve,
            soft_threshold: self.soft_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSection {
    #[serde(default = "default_max_routes")]
    pub max_routes_per_destination: usize,
    #[serde(default = "default_route_expiry_ms")]
    pub route_expiry_ms: u64,
    #[serde(default = "default_hold_down_ms")]
    pub hold_down_ms: u64,
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,
}

fn default_max_routes() -> usize {
    4
}

fn default_route_expiry_ms() -> u64 {
    600_000
}

fn default_hold_down_ms() -> u64 {
    120_000
}

fn default_max_path_length() -> usize {
    16
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            max_routes_per_destination: default_max_routes(),
            route_expiry_ms: default_route_expiry_ms(),
            hold_down_ms: default_hold_down_ms(),
            max_path_length: default_max_path_length(),
        }
    }
}

impl RoutingSection {
    pub fn routing_config(&self) -> crate::mesh::routing::RoutingConfig {
        crate::mesh::routing::RoutingConfig {
            max_routes_per_destination: self.max_routes_per_destination,
            route_expiry_ms: self.route_expiry_ms,
            hold_down_ms: self.hold_down_ms,
            max_path_length: self.max_path_length,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersSection {
    #[serde(default)]
    pub dns_seeds: Vec<String>,
    #[serde(default = "default_max_outbound")]
    pub max_outbound: usize,
    #[serde(default = "default_max_inbound")]
    pub max_inbound: usize,
    #[serde(default = "default_max_discovery_peers")]
    pub max_discovery_peers: usize,
}

fn default_max_outbound() -> usize {
    8
}

fn default_max_inbound() -> usize {
    32
}

fn default_max_discovery_peers() -> usize {
    512
}

impl Default for PeersSection {
    fn default() -> Self {
        Self {
            dns_seeds: vec![],
            max_outbound: default_max_outbound(),
            max_inbound: default_max_inbound(),
            max_discovery_peers: default_max_discovery_peers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "lorachain.db".to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    #[allow(dead_code)]
    pub fn load_from_file(path: &str) -> Result<Self, String> {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read {path}: {e}"))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse {path}: {e}"))
    }

    #[allow(dead_code)]
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize: {e}"))?;
        fs::write(path, content).map_err(|e| format!("Failed to write {path}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.node.network_type(), NetworkType::Testnet);
        assert_eq!(config.mesh.region(), crate::mesh::duty_cycle::Region::Eu868);
        assert_eq!(config.queue.total_cap, 1_000);
    }

    #[test]
    fn toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.node.chain_id, config.node.chain_id);
        assert_eq!(parsed.mesh.effective_bps, config.mesh.effective_bps);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [node]
            network = "mainnet"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.node.network_type(), NetworkType::Mainnet);
        assert_eq!(parsed.queue.total_cap, 1_000);
    }
}
