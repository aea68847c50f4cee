//! Network definitions.
//!
//! This module defines the closed x402 network enumeration shared between payment
//! requirements and payment payloads, and the Stellar-specific constants (passphrases,
//! network ids) needed to hash and verify transactions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Network passphrase for Stellar mainnet
pub const STELLAR_MAINNET_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";
/// Network passphrase for Stellar testnet
pub const STELLAR_TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

/// Networks known to the x402 protocol.
///
/// Identifiers are matched exactly (case-sensitive). Knowing a network does not mean the
/// facilitator supports it: only Stellar networks with a configured ledger client are accepted.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    #[serde(rename = "abstract")]
    Abstract,
    #[serde(rename = "abstract-testnet")]
    AbstractTestnet,
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "avalanche-fuji")]
    AvalancheFuji,
    #[serde(rename = "avalanche")]
    Avalanche,
    #[serde(rename = "iotex")]
    Iotex,
    #[serde(rename = "solana-devnet")]
    SolanaDevnet,
    #[serde(rename = "solana")]
    Solana,
    #[serde(rename = "sei")]
    Sei,
    #[serde(rename = "sei-testnet")]
    SeiTestnet,
    #[serde(rename = "polygon")]
    Polygon,
    #[serde(rename = "polygon-amoy")]
    PolygonAmoy,
    #[serde(rename = "peaq")]
    Peaq,
    #[serde(rename = "story")]
    Story,
    #[serde(rename = "skale-base-sepolia")]
    SkaleBaseSepolia,
    /// Stellar testnet.
    #[serde(rename = "stellar-testnet")]
    StellarTestnet,
    /// Stellar public network.
    #[serde(rename = "stellar-mainnet")]
    StellarMainnet,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::variants()
            .iter()
            .copied()
            .find(|network| network.as_str() == s)
            .ok_or_else(|| UnknownNetwork(s.to_string()))
    }
}

/// Address and signature family a network belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFamily {
    Evm,
    Solana,
    Stellar,
}

impl From<Network> for NetworkFamily {
    fn from(value: Network) -> Self {
        match value {
            Network::SolanaDevnet | Network::Solana => NetworkFamily::Solana,
            Network::StellarTestnet | Network::StellarMainnet => NetworkFamily::Stellar,
            Network::Abstract
            | Network::AbstractTestnet
            | Network::BaseSepolia
            | Network::Base
            | Network::AvalancheFuji
            | Network::Avalanche
            | Network::Iotex
            | Network::Sei
            | Network::SeiTestnet
            | Network::Polygon
            | Network::PolygonAmoy
            | Network::Peaq
            | Network::Story
            | Network::SkaleBaseSepolia => NetworkFamily::Evm,
        }
    }
}

impl Network {
    /// Return all known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Abstract,
            Network::AbstractTestnet,
            Network::BaseSepolia,
            Network::Base,
            Network::AvalancheFuji,
            Network::Avalanche,
            Network::Iotex,
            Network::SolanaDevnet,
            Network::Solana,
            Network::Sei,
            Network::SeiTestnet,
            Network::Polygon,
            Network::PolygonAmoy,
            Network::Peaq,
            Network::Story,
            Network::SkaleBaseSepolia,
            Network::StellarTestnet,
            Network::StellarMainnet,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Abstract => "abstract",
            Network::AbstractTestnet => "abstract-testnet",
            Network::BaseSepolia => "base-sepolia",
            Network::Base => "base",
            Network::AvalancheFuji => "avalanche-fuji",
            Network::Avalanche => "avalanche",
            Network::Iotex => "iotex",
            Network::SolanaDevnet => "solana-devnet",
            Network::Solana => "solana",
            Network::Sei => "sei",
            Network::SeiTestnet => "sei-testnet",
            Network::Polygon => "polygon",
            Network::PolygonAmoy => "polygon-amoy",
            Network::Peaq => "peaq",
            Network::Story => "story",
            Network::SkaleBaseSepolia => "skale-base-sepolia",
            Network::StellarTestnet => "stellar-testnet",
            Network::StellarMainnet => "stellar-mainnet",
        }
    }

    pub fn family(&self) -> NetworkFamily {
        NetworkFamily::from(*self)
    }

    /// Stellar network passphrase, `None` for other families.
    pub fn stellar_passphrase(&self) -> Option<&'static str> {
        match self {
            Network::StellarMainnet => Some(STELLAR_MAINNET_PASSPHRASE),
            Network::StellarTestnet => Some(STELLAR_TESTNET_PASSPHRASE),
            _ => None,
        }
    }

    /// Stellar network id: SHA-256 of the passphrase.
    pub fn stellar_network_id(&self) -> Option<[u8; 32]> {
        self.stellar_passphrase()
            .map(|passphrase| Sha256::digest(passphrase.as_bytes()).into())
    }

    /// Returns true if this network is a testnet environment.
    pub fn is_testnet(&self) -> bool {
        matches!(
            self,
            Network::AbstractTestnet
                | Network::BaseSepolia
                | Network::AvalancheFuji
                | Network::SolanaDevnet
                | Network::SeiTestnet
                | Network::PolygonAmoy
                | Network::SkaleBaseSepolia
                | Network::StellarTestnet
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde() {
        for network in Network::variants() {
            let json = serde_json::to_string(network).unwrap();
            assert_eq!(json, format!("\"{}\"", network));
            assert_eq!(Network::from_str(network.as_str()).unwrap(), *network);
        }
    }

    #[test]
    fn test_identifiers_are_case_sensitive() {
        assert!(Network::from_str("Stellar-Testnet").is_err());
        assert!(serde_json::from_str::<Network>("\"STELLAR-MAINNET\"").is_err());
    }

    #[test]
    fn test_stellar_passphrases() {
        assert_eq!(
            Network::StellarTestnet.stellar_passphrase(),
            Some(STELLAR_TESTNET_PASSPHRASE)
        );
        assert_eq!(
            Network::StellarMainnet.stellar_passphrase(),
            Some(STELLAR_MAINNET_PASSPHRASE)
        );
        assert_eq!(Network::Base.stellar_passphrase(), None);
        assert_ne!(
            Network::StellarTestnet.stellar_network_id(),
            Network::StellarMainnet.stellar_network_id()
        );
    }

    #[test]
    fn test_families() {
        assert_eq!(Network::StellarTestnet.family(), NetworkFamily::Stellar);
        assert_eq!(Network::Solana.family(), NetworkFamily::Solana);
        assert_eq!(Network::Peaq.family(), NetworkFamily::Evm);
    }
}
