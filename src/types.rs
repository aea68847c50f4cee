//! Wire types for the x402 facilitator protocol.
//!
//! All types serialize to the camelCase JSON shapes used by x402 clients and resource
//! servers. Records are immutable once received: the facilitator never persists them.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use url::Url;

use crate::network::Network;

/// Protocol version carried by payment payloads.
///
/// Kept as a plain integer on the wire so that an unsupported version is reported as
/// `invalid_x402_version` rather than failing deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct X402Version(pub u32);

impl X402Version {
    pub const V1: X402Version = X402Version(1);

    pub fn is_supported(&self) -> bool {
        *self == Self::V1
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payment scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
    /// Any scheme string this facilitator does not implement.
    #[serde(other)]
    Unknown,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
            Scheme::Unknown => write!(f, "unknown"),
        }
    }
}

/// Closed set of reasons reported in `invalidReason` / `errorReason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorReason {
    #[serde(rename = "invalid_network")]
    InvalidNetwork,
    #[serde(rename = "invalid_payload")]
    InvalidPayload,
    #[serde(rename = "invalid_payment_requirements")]
    InvalidPaymentRequirements,
    #[serde(rename = "invalid_scheme")]
    InvalidScheme,
    #[serde(rename = "invalid_payment")]
    InvalidPayment,
    #[serde(rename = "payment_expired")]
    PaymentExpired,
    #[serde(rename = "unsupported_scheme")]
    UnsupportedScheme,
    #[serde(rename = "invalid_x402_version")]
    InvalidX402Version,
    #[serde(rename = "invalid_transaction_state")]
    InvalidTransactionState,
    #[serde(rename = "unexpected_verify_error")]
    UnexpectedVerifyError,
    #[serde(rename = "unexpected_settle_error")]
    UnexpectedSettleError,
    #[serde(rename = "invalid_transaction")]
    InvalidTransaction,
    #[serde(rename = "submission_failed")]
    SubmissionFailed,
    #[serde(rename = "unexpected_error")]
    UnexpectedError,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::InvalidNetwork => "invalid_network",
            ErrorReason::InvalidPayload => "invalid_payload",
            ErrorReason::InvalidPaymentRequirements => "invalid_payment_requirements",
            ErrorReason::InvalidScheme => "invalid_scheme",
            ErrorReason::InvalidPayment => "invalid_payment",
            ErrorReason::PaymentExpired => "payment_expired",
            ErrorReason::UnsupportedScheme => "unsupported_scheme",
            ErrorReason::InvalidX402Version => "invalid_x402_version",
            ErrorReason::InvalidTransactionState => "invalid_transaction_state",
            ErrorReason::UnexpectedVerifyError => "unexpected_verify_error",
            ErrorReason::UnexpectedSettleError => "unexpected_settle_error",
            ErrorReason::InvalidTransaction => "invalid_transaction",
            ErrorReason::SubmissionFailed => "submission_failed",
            ErrorReason::UnexpectedError => "unexpected_error",
        }
    }

    /// Reasons detected from the request alone, before any ledger interaction.
    /// These map to HTTP 400.
    pub fn is_request_shape(&self) -> bool {
        matches!(
            self,
            ErrorReason::InvalidNetwork
                | ErrorReason::InvalidPayload
                | ErrorReason::InvalidPaymentRequirements
                | ErrorReason::InvalidScheme
                | ErrorReason::UnsupportedScheme
                | ErrorReason::InvalidX402Version
        )
    }

    /// Reasons produced by unanticipated internal failures. These map to HTTP 500.
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            ErrorReason::UnexpectedVerifyError
                | ErrorReason::UnexpectedSettleError
                | ErrorReason::UnexpectedError
        )
    }
}

impl Display for ErrorReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network-specific fields of [`PaymentRequirements`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirementsExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_source_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux_account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ledger: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_sponsor: Option<bool>,
}

/// Price, asset, recipient and network declared by the resource server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub resource: Url,
    pub description: String,
    pub mime_type: String,
    pub max_timeout_seconds: u64,
    /// Decimal integer string in the asset's smallest unit.
    pub max_amount_required: String,
    pub pay_to: String,
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<PaymentRequirementsExtra>,
}

impl PaymentRequirements {
    pub fn extra(&self) -> Option<&PaymentRequirementsExtra> {
        self.extra.as_ref()
    }
}

/// Signed authorization for the `exact` scheme on Stellar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactStellarPayload {
    /// Hex-encoded ed25519 signature (128 hex characters).
    pub signature: String,
    /// Base64 XDR `TransactionEnvelope` carrying the payment.
    #[serde(rename = "invokeHostOpXDR")]
    pub invoke_host_op_xdr: String,
}

/// Payment authorization presented by the paying client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: ExactStellarPayload,
}

/// Body of `POST /verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// Body of `POST /settle`. Same shape as [`VerifyRequest`].
pub type SettleRequest = VerifyRequest;

impl VerifyRequest {
    pub fn network(&self) -> Network {
        self.payment_payload.network
    }
}

/// Result of `verify`.
///
/// `invalidReason` is present iff the payment is invalid; `payer` is present iff valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl VerifyResponse {
    pub fn valid(payer: String) -> Self {
        VerifyResponse {
            is_valid: true,
            invalid_reason: None,
            payer: Some(payer),
        }
    }

    pub fn invalid(reason: ErrorReason) -> Self {
        VerifyResponse {
            is_valid: false,
            invalid_reason: Some(reason),
            payer: None,
        }
    }
}

/// Result of `settle`.
///
/// `transaction` is always serialized, as an empty string when nothing was submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    pub transaction: String,
    pub network: Network,
}

impl SettleResponse {
    pub fn settled(payer: String, transaction: String, network: Network) -> Self {
        SettleResponse {
            success: true,
            error_reason: None,
            payer: Some(payer),
            transaction,
            network,
        }
    }

    pub fn failed(reason: ErrorReason, transaction: String, network: Network) -> Self {
        SettleResponse {
            success: false,
            error_reason: Some(reason),
            payer: None,
            transaction,
            network,
        }
    }

    pub fn rejected(reason: ErrorReason, network: Network) -> Self {
        Self::failed(reason, String::new(), network)
    }
}

/// One `(version, scheme, network)` combination accepted by the facilitator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<SupportedPaymentKindExtra>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKindExtra {
    pub network_passphrase: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedPaymentKindsResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}
