//! Network type definitions for Lorachain.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, Copy, PartialEq, Eq, Hash)]
pub enum NetworkType {
    Mainnet,
    Testnet,
}

impl NetworkType {
    #[allow(dead_code)]
    pub fn magic_bytes(&self) -> [u8; 4] {
        match self {
            NetworkType::Mainnet => [0x4C, 0x4F, 0x52, 0x41], // "LORA" in ASCII
            NetworkType::Testnet => [0x4C, 0x54, 0x53, 0x54], // "LTST"
        }
    }

    pub fn default_p2p_port(&self) -> u16 {
        match self {
            NetworkType::Mainnet => 26000,
            NetworkType::Testnet => 26100,
        }
    }

    /// Network digit embedded after the address prefix.
    pub fn address_digit(&self) -> char {
        match self {
            NetworkType::Testnet => '0',
            NetworkType::Mainnet => '1',
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Mainnet => write!(f, "Mainnet"),
            NetworkType::Testnet => write!(f, "Testnet"),
        }
    }
}
