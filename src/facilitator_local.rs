//! Facilitator implementation for x402 payments on Stellar.
//!
//! [`FacilitatorLocal`] wires the [`PayloadVerifier`] and the [`SettlementCoordinator`]
//! to the ledger clients in a [`ProviderCache`]. Payment-level rejections are returned as
//! regular responses; only ledger failures that prevented an answer become
//! [`FacilitatorLocalError`].

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

use crate::backoff::deadline_after;
use crate::chain::LedgerError;
use crate::facilitator::Facilitator;
use crate::network::Network;
use crate::provider_cache::{HasProviderMap, ProviderCache};
use crate::settlement::{SettlementConfig, SettlementCoordinator};
use crate::settlement_store::SettlementStore;
use crate::types::{
    PaymentRequirements, Scheme, SettleRequest, SettleResponse, SupportedPaymentKind,
    SupportedPaymentKindExtra, SupportedPaymentKindsResponse, VerifyRequest, VerifyResponse,
    X402Version,
};
use crate::verifier::{PayloadVerifier, VerificationError};

/// Failures that kept the facilitator from producing a verify or settle result.
///
/// Rendered as HTTP 500 without exposing the underlying cause.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorLocalError {
    #[error("verification on {network} failed: {source}")]
    Verification {
        network: Network,
        #[source]
        source: LedgerError,
    },
    #[error("verification on {0} timed out")]
    VerificationTimeout(Network),
    #[error("settlement on {network} failed before submission: {source}")]
    Settlement {
        network: Network,
        #[source]
        source: LedgerError,
    },
}

impl FacilitatorLocalError {
    pub fn network(&self) -> Network {
        match self {
            FacilitatorLocalError::Verification { network, .. }
            | FacilitatorLocalError::VerificationTimeout(network)
            | FacilitatorLocalError::Settlement { network, .. } => *network,
        }
    }
}

pub struct FacilitatorLocal {
    verifier: Arc<PayloadVerifier>,
    coordinator: SettlementCoordinator,
    default_timeout: Duration,
}

impl FacilitatorLocal {
    pub fn new(providers: ProviderCache, config: SettlementConfig) -> Self {
        let verifier = Arc::new(PayloadVerifier::new(providers, config.backoff));
        let store = SettlementStore::new(config.cache_ttl);
        let coordinator = SettlementCoordinator::new(Arc::clone(&verifier), store, config);
        FacilitatorLocal {
            verifier,
            coordinator,
            default_timeout: config.default_timeout,
        }
    }

    pub fn settlement_store(&self) -> &SettlementStore {
        self.coordinator.store()
    }

    pub fn default_network(&self) -> Option<Network> {
        self.verifier.default_network()
    }

    fn deadline(&self, requirements: &PaymentRequirements) -> Instant {
        let budget = match requirements.max_timeout_seconds {
            0 => self.default_timeout,
            seconds => Duration::from_secs(seconds),
        };
        deadline_after(budget)
    }
}

impl HasProviderMap for FacilitatorLocal {
    fn provider_map(&self) -> &ProviderCache {
        self.verifier.providers()
    }
}

impl Facilitator for FacilitatorLocal {
    type Error = FacilitatorLocalError;

    /// Runs every verification step against the payload.
    ///
    /// Ledger calls share the `maxTimeoutSeconds` budget of the requirements.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorLocalError`] when the ledger could not be consulted in time.
    #[instrument(skip_all, err, fields(network = %request.payment_payload.network))]
    async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let network = request.network();
        let deadline = self.deadline(&request.payment_requirements);
        let outcome = tokio::time::timeout_at(deadline, self.verifier.verify(request, deadline))
            .await
            .map_err(|_| FacilitatorLocalError::VerificationTimeout(network))?;

        match outcome {
            Ok(verified) => {
                tracing::debug!(payer = %verified.payer, "Verification complete: valid");
                Ok(VerifyResponse::valid(verified.payer))
            }
            Err(VerificationError::Invalid(reason)) => {
                tracing::debug!(reason = %reason, "Verification complete: invalid");
                Ok(VerifyResponse::invalid(reason))
            }
            Err(VerificationError::Ledger(source)) => {
                Err(FacilitatorLocalError::Verification { network, source })
            }
        }
    }

    /// Re-verifies and submits the payment, at most once per envelope.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorLocalError`] when a ledger failure happened before submission.
    /// Nothing is cached in that case.
    #[instrument(skip_all, err, fields(network = %request.payment_payload.network))]
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, Self::Error> {
        let network = request.network();
        let response = self
            .coordinator
            .settle(request)
            .await
            .map_err(|source| FacilitatorLocalError::Settlement { network, source })?;
        tracing::debug!(
            success = response.success,
            error_reason = ?response.error_reason,
            "Settlement complete"
        );
        Ok(response)
    }

    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        let kinds = self
            .verifier
            .supported_networks()
            .iter()
            .map(|network| SupportedPaymentKind {
                x402_version: X402Version::V1,
                scheme: Scheme::Exact,
                network: *network,
                extra: network
                    .stellar_passphrase()
                    .map(|passphrase| SupportedPaymentKindExtra {
                        network_passphrase: passphrase.to_string(),
                    }),
            })
            .collect();
        Ok(SupportedPaymentKindsResponse { kinds })
    }
}
