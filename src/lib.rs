//! x402 payment facilitator for the Stellar network.
//!
//! Verifies signed Soroban payment envelopes against x402 payment requirements and
//! settles them on the ledger at most once per envelope. The HTTP surface lives in
//! [`handlers`]; the binary in `main.rs` wires it to the environment configuration.

pub mod address;
pub mod backoff;
pub mod chain;
pub mod facilitator;
pub mod facilitator_local;
pub mod from_env;
pub mod handlers;
pub mod network;
pub mod provider_cache;
pub mod settlement;
pub mod settlement_store;
pub mod sig_down;
pub mod telemetry;
pub mod types;
pub mod validation;
pub mod verifier;
