//! Ledger client cache and initialization logic.
//!
//! Holds one [`LedgerClient`] per served Stellar network. The set of networks in the
//! cache is exactly the set the facilitator accepts; payments on any other network are
//! rejected with `invalid_network`.
//!
//! Example usage:
//! ```ignore
//! let config = FacilitatorConfig::from_env()?;
//! let provider_cache = ProviderCache::from_config(&config)?;
//! let client = provider_cache.by_network(Network::StellarTestnet);
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::sync::Arc;

use crate::chain::soroban_rpc::SorobanRpcClient;
use crate::chain::{LedgerClient, LedgerError};
use crate::from_env::FacilitatorConfig;
use crate::network::Network;

/// A cache of [`LedgerClient`] instances keyed by network.
///
/// Insertion order is kept: the first network is the default one, used when a request is
/// too malformed to name its own.
#[derive(Clone, Default)]
pub struct ProviderCache {
    providers: HashMap<Network, Arc<dyn LedgerClient>>,
    networks: Vec<Network>,
}

impl std::fmt::Debug for ProviderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCache")
            .field("networks", &self.networks)
            .finish()
    }
}

impl ProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a Soroban RPC client for every network in `config`.
    pub fn from_config(config: &FacilitatorConfig) -> Result<Self, LedgerError> {
        let mut cache = Self::new();
        for endpoint in &config.networks {
            let client = SorobanRpcClient::new(endpoint.network, endpoint.rpc_url.clone())?;
            cache.insert(Arc::new(client));
            tracing::info!(
                "Initialized ledger client for {} ({}) at {}",
                endpoint.network,
                if endpoint.network.is_testnet() { "testnet" } else { "mainnet" },
                endpoint.rpc_url
            );
        }
        Ok(cache)
    }

    /// Registers `client` under its own network, replacing any previous one.
    pub fn insert(&mut self, client: Arc<dyn LedgerClient>) {
        let network = client.network();
        if self.providers.insert(network, client).is_none() {
            self.networks.push(network);
        }
    }

    pub fn with(mut self, client: Arc<dyn LedgerClient>) -> Self {
        self.insert(client);
        self
    }

    pub fn by_network<N: Borrow<Network>>(&self, network: N) -> Option<&Arc<dyn LedgerClient>> {
        self.providers.get(network.borrow())
    }

    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    pub fn default_network(&self) -> Option<Network> {
        self.networks.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

/// Access to the [`ProviderCache`] behind a facilitator.
pub trait HasProviderMap {
    fn provider_map(&self) -> &ProviderCache;
}

impl<T: HasProviderMap> HasProviderMap for Arc<T> {
    fn provider_map(&self) -> &ProviderCache {
        self.as_ref().provider_map()
    }
}
