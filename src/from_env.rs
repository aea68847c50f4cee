//! Facilitator configuration read from environment variables.
//!
//! `.env` is loaded by the binary before [`FacilitatorConfig::from_env`] runs. Every value
//! has a default; a value that is present but unparsable is a startup error.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::backoff::Backoff;
use crate::network::{Network, NetworkFamily, UnknownNetwork};
use crate::settlement::SettlementConfig;

pub const ENV_HOST: &str = "HOST";
pub const ENV_PORT: &str = "PORT";
pub const ENV_STELLAR_NETWORKS: &str = "STELLAR_NETWORKS";

// Soroban RPC URLs
pub const ENV_RPC_STELLAR: &str = "RPC_URL_STELLAR";
pub const ENV_RPC_STELLAR_TESTNET: &str = "RPC_URL_STELLAR_TESTNET";

pub const ENV_SETTLE_POLL_INTERVAL_MS: &str = "SETTLE_POLL_INTERVAL_MS";
pub const ENV_LEDGER_RETRY_INITIAL_MS: &str = "LEDGER_RETRY_INITIAL_MS";
pub const ENV_LEDGER_RETRY_MAX_MS: &str = "LEDGER_RETRY_MAX_MS";
pub const ENV_DEFAULT_TIMEOUT_SECONDS: &str = "DEFAULT_TIMEOUT_SECONDS";
pub const ENV_SETTLEMENT_CACHE_TTL_SECONDS: &str = "SETTLEMENT_CACHE_TTL_SECONDS";

const DEFAULT_PORT: u16 = 8080;

pub fn rpc_env_name_from_network(network: Network) -> Option<&'static str> {
    match network {
        Network::StellarMainnet => Some(ENV_RPC_STELLAR),
        Network::StellarTestnet => Some(ENV_RPC_STELLAR_TESTNET),
        _ => None,
    }
}

/// Public Soroban RPC endpoint used when no URL is configured.
pub fn default_rpc_url(network: Network) -> Option<&'static str> {
    match network {
        Network::StellarMainnet => Some("https://soroban-rpc.mainnet.stellar.gateway.fm"),
        Network::StellarTestnet => Some("https://soroban-testnet.stellar.org"),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("env {name}: cannot parse {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    UnknownNetwork(#[from] UnknownNetwork),
    #[error("env STELLAR_NETWORKS: {0} is not a Stellar network")]
    NotStellar(Network),
    #[error("env STELLAR_NETWORKS lists no networks")]
    NoNetworks,
}

/// Ledger endpoint for one served network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEndpoint {
    pub network: Network,
    pub rpc_url: Url,
}

#[derive(Debug, Clone)]
pub struct FacilitatorConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Served networks, in configuration order. The first one is the default.
    pub networks: Vec<NetworkEndpoint>,
    pub settlement: SettlementConfig,
}

impl FacilitatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let host = parse_or(&var, ENV_HOST, IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port = parse_or(&var, ENV_PORT, DEFAULT_PORT)?;

        let mut networks = Vec::new();
        let listed = var(ENV_STELLAR_NETWORKS).unwrap_or_else(|| Network::StellarTestnet.to_string());
        for entry in listed.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let network = Network::from_str(entry)?;
            if network.family() != NetworkFamily::Stellar {
                return Err(ConfigError::NotStellar(network));
            }
            if networks.iter().any(|endpoint: &NetworkEndpoint| endpoint.network == network) {
                continue;
            }
            let (name, default_url) = match (rpc_env_name_from_network(network), default_rpc_url(network)) {
                (Some(name), Some(default_url)) => (name, default_url),
                _ => return Err(ConfigError::NotStellar(network)),
            };
            let raw_url = var(name).unwrap_or_else(|| default_url.to_string());
            let rpc_url = Url::parse(&raw_url).map_err(|e| ConfigError::Invalid {
                name,
                value: raw_url.clone(),
                reason: e.to_string(),
            })?;
            networks.push(NetworkEndpoint { network, rpc_url });
        }
        if networks.is_empty() {
            return Err(ConfigError::NoNetworks);
        }

        let defaults = SettlementConfig::default();
        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            parse_or(&var, name, default.as_millis() as u64).map(Duration::from_millis)
        };
        let seconds = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            parse_or(&var, name, default.as_secs()).map(Duration::from_secs)
        };
        let settlement = SettlementConfig {
            poll_interval: millis(ENV_SETTLE_POLL_INTERVAL_MS, defaults.poll_interval)?,
            backoff: Backoff::new(
                millis(ENV_LEDGER_RETRY_INITIAL_MS, defaults.backoff.initial)?,
                millis(ENV_LEDGER_RETRY_MAX_MS, defaults.backoff.max)?,
            ),
            default_timeout: seconds(ENV_DEFAULT_TIMEOUT_SECONDS, defaults.default_timeout)?,
            cache_ttl: seconds(ENV_SETTLEMENT_CACHE_TTL_SECONDS, defaults.cache_ttl)?,
        };

        Ok(Self {
            host,
            port,
            networks,
            settlement,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value,
            reason: e.to_string(),
        }),
    }
}
