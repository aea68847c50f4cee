//! Participant address checks per network family.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::chain::stellar::StellarAddress;
use crate::network::{Network, NetworkFamily};

static EVM_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static pattern"));

static SOLANA_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("static pattern")
});

/// Whether `value` is a well-formed account or contract address on `network`.
///
/// Stellar accepts both `G...` account and `C...` contract strkeys, checksum included.
/// EVM and Solana networks only get a shape check. Requirement validation rejects
/// networks this facilitator does not serve before it looks at addresses, so those
/// branches answer direct callers only.
pub fn is_valid_address(value: &str, network: Network) -> bool {
    match network.family() {
        NetworkFamily::Stellar => StellarAddress::new(value).is_valid(),
        NetworkFamily::Evm => EVM_ADDRESS.is_match(value),
        NetworkFamily::Solana => SOLANA_ADDRESS.is_match(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCOUNT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";
    const CONTRACT: &str = "CAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAHK3M";

    #[test]
    fn test_stellar_addresses() {
        assert!(is_valid_address(ACCOUNT, Network::StellarTestnet));
        assert!(is_valid_address(CONTRACT, Network::StellarMainnet));
        assert!(!is_valid_address("", Network::StellarTestnet));
        assert!(!is_valid_address(&ACCOUNT.to_lowercase(), Network::StellarTestnet));
        assert!(!is_valid_address(
            "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            Network::StellarTestnet
        ));
    }

    #[test]
    fn test_other_families() {
        assert!(is_valid_address(
            "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            Network::BaseSepolia
        ));
        assert!(!is_valid_address(ACCOUNT, Network::Base));
        assert!(is_valid_address(
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            Network::Solana
        ));
        assert!(!is_valid_address("0OIl", Network::SolanaDevnet));
    }
}
