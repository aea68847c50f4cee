//! Ledger access for verification and settlement.
//!
//! The core never talks to a network directly: it goes through [`LedgerClient`], a
//! capability interface over one ledger. Envelope decoding and signature checks are pure
//! and come with default implementations; everything else is network I/O.

use async_trait::async_trait;

use crate::network::Network;

pub mod soroban_rpc;
pub mod stellar;

pub use stellar::DecodedTransaction;

/// Ledger-level failures.
///
/// Every variant is either *transient* (safe to retry inside the timeout budget) or
/// *terminal* (retrying cannot change the outcome). See [`LedgerError::is_transient`].
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid XDR encoding: {0}")]
    InvalidXdr(String),

    #[error("Unsupported envelope: {0}")]
    UnsupportedEnvelope(&'static str),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Network {0} is not a Stellar network")]
    UnsupportedNetwork(Network),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {status} from ledger endpoint")]
    Http { status: u16 },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Ledger asked to try again later")]
    TryAgainLater,

    #[error("Transaction rejected by ledger: {0}")]
    Rejected(String),

    #[error("Malformed ledger response: {0}")]
    MalformedResponse(String),
}

impl LedgerError {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Transport(_) | LedgerError::TryAgainLater => true,
            LedgerError::Http { status } => *status >= 500 || *status == 429,
            // JSON-RPC internal error and implementation-defined server errors
            LedgerError::Rpc { code, .. } => *code == -32603 || (-32099..=-32000).contains(code),
            LedgerError::InvalidXdr(_)
            | LedgerError::UnsupportedEnvelope(_)
            | LedgerError::InvalidSignature(_)
            | LedgerError::UnsupportedNetwork(_)
            | LedgerError::Rejected(_)
            | LedgerError::MalformedResponse(_) => false,
        }
    }
}

/// Snapshot of the ledger head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerState {
    pub sequence: u32,
}

/// Ledger acknowledgement of a submitted envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
    /// Hex transaction hash.
    pub hash: String,
    /// The ledger had already seen this envelope.
    pub duplicate: bool,
}

/// Inclusion status of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Success { ledger: Option<u32> },
    Failed { result_xdr: Option<String> },
    NotFound,
}

/// Capability interface over one ledger network.
///
/// Implementations must be cheap to share behind an `Arc` and safe to call concurrently.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// The network this client talks to.
    fn network(&self) -> Network;

    /// Decodes a base64 XDR envelope, hashing it with this network's passphrase.
    fn decode(&self, envelope_xdr: &str) -> Result<DecodedTransaction, LedgerError> {
        stellar::decode_envelope(envelope_xdr, self.network())
    }

    /// Verifies every decorated signature over the transaction signing payload.
    ///
    /// Returns the addresses of the accounts whose signatures verified.
    fn verify_signatures(&self, transaction: &DecodedTransaction) -> Result<Vec<String>, LedgerError> {
        stellar::verify_signatures(transaction)
    }

    async fn current_ledger_state(&self) -> Result<LedgerState, LedgerError>;

    /// Submits the envelope. Must not be retried by the caller on terminal errors.
    async fn submit(&self, transaction: &DecodedTransaction) -> Result<SubmittedTransaction, LedgerError>;

    async fn transaction_status(&self, hash: &str) -> Result<TransactionStatus, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LedgerError::Transport("connection reset".into()).is_transient());
        assert!(LedgerError::Http { status: 503 }.is_transient());
        assert!(LedgerError::Http { status: 429 }.is_transient());
        assert!(!LedgerError::Http { status: 404 }.is_transient());
        assert!(LedgerError::Rpc { code: -32603, message: "internal".into() }.is_transient());
        assert!(LedgerError::Rpc { code: -32001, message: "busy".into() }.is_transient());
        assert!(!LedgerError::Rpc { code: -32602, message: "bad params".into() }.is_transient());
        assert!(!LedgerError::Rejected("txBadSeq".into()).is_transient());
        assert!(!LedgerError::InvalidSignature("G...".into()).is_transient());
    }
}
