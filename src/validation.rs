//! Request-level checks that need no ledger access.
//!
//! Each check returns the specific [`ErrorReason`] of its first failure so callers can
//! tell resource-server misconfiguration apart from a bad client payload.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::address::is_valid_address;
use crate::network::Network;
use crate::types::{ErrorReason, ExactStellarPayload, PaymentRequirements, Scheme};

static HEX_SIGNATURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{128}$").expect("static pattern"));

static BASE64_STANDARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").expect("static pattern"));

/// Parses a decimal-integer amount: ASCII digits only, within `i128`.
pub fn parse_amount(value: &str) -> Option<i128> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse::<i128>().ok()
}

/// Checks payment requirements against the networks this facilitator serves.
///
/// Order: network, scheme, amount, addresses, then the Stellar `extra` fields.
pub fn validate_requirements(
    requirements: &PaymentRequirements,
    supported: &[Network],
) -> Result<(), ErrorReason> {
    let network = requirements.network;
    if !supported.contains(&network) {
        return Err(ErrorReason::InvalidNetwork);
    }
    if requirements.scheme != Scheme::Exact {
        return Err(ErrorReason::UnsupportedScheme);
    }
    if parse_amount(&requirements.max_amount_required).is_none() {
        return Err(ErrorReason::InvalidPaymentRequirements);
    }
    if !is_valid_address(&requirements.pay_to, network)
        || !is_valid_address(&requirements.asset, network)
    {
        return Err(ErrorReason::InvalidPaymentRequirements);
    }

    if let Some(extra) = requirements.extra() {
        if let Some(source) = &extra.transaction_source_account {
            if !is_valid_address(source, network) {
                return Err(ErrorReason::InvalidPaymentRequirements);
            }
        }
        if let Some(passphrase) = &extra.network_passphrase {
            let matches_network = network.stellar_passphrase() == Some(passphrase.as_str())
                || network.as_str() == passphrase;
            if !matches_network {
                return Err(ErrorReason::InvalidPaymentRequirements);
            }
        }
        if let Some(mux_id) = &extra.mux_account_id {
            if mux_id.parse::<u64>().is_err() {
                return Err(ErrorReason::InvalidPaymentRequirements);
            }
        }
    }
    Ok(())
}

/// Fixed-shape checks on the authorization: 128 hex signature, padded base64 envelope.
pub fn validate_payload_shape(payload: &ExactStellarPayload) -> Result<(), ErrorReason> {
    if !HEX_SIGNATURE.is_match(&payload.signature) {
        return Err(ErrorReason::InvalidPayload);
    }
    let envelope = payload.invoke_host_op_xdr.as_str();
    if envelope.len() % 4 != 0 || !BASE64_STANDARD.is_match(envelope) {
        return Err(ErrorReason::InvalidPayload);
    }
    Ok(())
}
