//! Payment payload verification.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. payment requirements (network, scheme, amount, addresses)
//! 2. protocol version
//! 3. scheme
//! 4. network match between payload and requirements
//! 5. signature and envelope shape
//! 6. envelope decoding
//! 7. signatures over the transaction hash
//! 8. validity window against the current ledger
//! 9. source account and the payment itself
//!
//! Steps 1 to 6 need no ledger access and are exposed separately through
//! [`PayloadVerifier::check_request`].

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::chain::{DecodedTransaction, LedgerClient, LedgerError};
use crate::network::Network;
use crate::provider_cache::ProviderCache;
use crate::types::{ErrorReason, PaymentRequirements, Scheme, VerifyRequest};
use crate::validation::{parse_amount, validate_payload_shape, validate_requirements};

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// The payment is invalid for the given reason.
    #[error("payment rejected: {0}")]
    Invalid(ErrorReason),
    /// The ledger could not be consulted. Safe to retry.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<ErrorReason> for VerificationError {
    fn from(reason: ErrorReason) -> Self {
        VerificationError::Invalid(reason)
    }
}

/// A request that passed every local check, with its decoded envelope.
pub struct CheckedRequest {
    pub client: Arc<dyn LedgerClient>,
    pub transaction: DecodedTransaction,
}

#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    /// Account that authorized the payment.
    pub payer: String,
    pub transaction: DecodedTransaction,
}

#[derive(Debug, Clone)]
pub struct PayloadVerifier {
    providers: ProviderCache,
    backoff: Backoff,
}

impl PayloadVerifier {
    pub fn new(providers: ProviderCache, backoff: Backoff) -> Self {
        Self { providers, backoff }
    }

    pub fn providers(&self) -> &ProviderCache {
        &self.providers
    }

    pub fn supported_networks(&self) -> &[Network] {
        self.providers.networks()
    }

    pub fn default_network(&self) -> Option<Network> {
        self.providers.default_network()
    }

    /// Steps 1 to 6. No I/O.
    pub fn check_request(&self, request: &VerifyRequest) -> Result<CheckedRequest, ErrorReason> {
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;

        validate_requirements(requirements, self.providers.networks())?;
        if !payload.x402_version.is_supported() {
            return Err(ErrorReason::InvalidX402Version);
        }
        if payload.scheme != Scheme::Exact || payload.scheme != requirements.scheme {
            return Err(ErrorReason::UnsupportedScheme);
        }
        if payload.network != requirements.network {
            return Err(ErrorReason::InvalidNetwork);
        }
        validate_payload_shape(&payload.payload)?;

        let client = self
            .providers
            .by_network(requirements.network)
            .ok_or(ErrorReason::InvalidNetwork)?;
        let transaction = client
            .decode(&payload.payload.invoke_host_op_xdr)
            .map_err(|e| {
                tracing::debug!(error = %e, "Envelope rejected");
                ErrorReason::InvalidPayload
            })?;

        Ok(CheckedRequest {
            client: Arc::clone(client),
            transaction,
        })
    }

    /// Full verification. Ledger calls are retried on transient errors until `deadline`.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
        deadline: Instant,
    ) -> Result<VerifiedPayment, VerificationError> {
        let checked = self.check_request(request)?;
        self.verify_checked(request, &checked, deadline).await
    }

    /// Steps 7 to 9 for a request that already passed [`PayloadVerifier::check_request`].
    pub async fn verify_checked(
        &self,
        request: &VerifyRequest,
        checked: &CheckedRequest,
        deadline: Instant,
    ) -> Result<VerifiedPayment, VerificationError> {
        let requirements = &request.payment_requirements;
        let transaction = &checked.transaction;

        let signers = verify_signers(request, checked)?;
        self.check_validity_window(&checked.client, transaction, requirements, deadline)
            .await?;

        let payer = match_payment(transaction, requirements, &signers)?;
        tracing::debug!(payer = %payer, tx_hash = %transaction.hash_hex(), "Payment verified");
        Ok(VerifiedPayment {
            payer,
            transaction: transaction.clone(),
        })
    }

    /// Steps 7 and 9 only: whether the envelope pays these requirements, regardless of
    /// the current ledger. Returns the payer.
    pub fn check_authorization(
        &self,
        request: &VerifyRequest,
        checked: &CheckedRequest,
    ) -> Result<String, ErrorReason> {
        let signers = verify_signers(request, checked)?;
        match_payment(&checked.transaction, &request.payment_requirements, &signers)
    }

    async fn check_validity_window(
        &self,
        client: &Arc<dyn LedgerClient>,
        transaction: &DecodedTransaction,
        requirements: &PaymentRequirements,
        deadline: Instant,
    ) -> Result<(), VerificationError> {
        if let Some(max_time) = transaction.expiration_time() {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or_default();
            if max_time < now {
                tracing::debug!(max_time, now, "Transaction time bounds elapsed");
                return Err(ErrorReason::PaymentExpired.into());
            }
        }

        // Inclusive: the last ledger at which the payment is still acceptable
        let last_valid = [
            transaction.expiration_ledger(),
            requirements.extra().and_then(|extra| extra.max_ledger),
        ]
        .into_iter()
        .flatten()
        .min();
        let max_ledger = transaction.max_ledger();
        if last_valid.is_none() && max_ledger.is_none() {
            return Ok(());
        }

        let state = self
            .backoff
            .retry(deadline, "current_ledger_state", move || {
                client.current_ledger_state()
            })
            .await?;
        // The transaction lands in the next ledger, which must be below maxLedger
        if let Some(max_ledger) = max_ledger {
            if state.sequence.saturating_add(1) >= max_ledger {
                tracing::debug!(current = state.sequence, max_ledger, "Ledger bounds elapsed");
                return Err(ErrorReason::PaymentExpired.into());
            }
        }
        if let Some(last_valid) = last_valid {
            if state.sequence > last_valid {
                tracing::debug!(current = state.sequence, last_valid, "Validity window elapsed");
                return Err(ErrorReason::PaymentExpired.into());
            }
        }
        Ok(())
    }
}

/// Step 7: the detached signature belongs to the envelope and every envelope signature
/// verifies. Returns the signing accounts.
fn verify_signers(request: &VerifyRequest, checked: &CheckedRequest) -> Result<Vec<String>, ErrorReason> {
    let signature = request.payment_payload.payload.signature.to_ascii_lowercase();
    if !checked.transaction.signature_hexes().contains(&signature) {
        tracing::debug!("Detached signature not present in envelope");
        return Err(ErrorReason::InvalidPayment);
    }
    checked
        .client
        .verify_signatures(&checked.transaction)
        .map_err(|e| {
            tracing::debug!(error = %e, "Signature verification failed");
            ErrorReason::InvalidPayment
        })
}

/// Step 9: source account constraints and a payment of at least the required amount of
/// `asset` to `payTo`, authorized by one of `signers`. Returns the payer.
fn match_payment(
    transaction: &DecodedTransaction,
    requirements: &PaymentRequirements,
    signers: &[String],
) -> Result<String, ErrorReason> {
    let extra = requirements.extra();

    if let Some(mux_id) = extra.and_then(|extra| extra.mux_account_id.as_deref()) {
        let expected = mux_id
            .parse::<u64>()
            .map_err(|_| ErrorReason::InvalidPaymentRequirements)?;
        if transaction.source_mux_id() != Some(expected) {
            return Err(ErrorReason::InvalidPayment);
        }
    }
    if let Some(source) = extra.and_then(|extra| extra.transaction_source_account.as_deref()) {
        if transaction.source_account() != source {
            tracing::debug!(expected = %source, actual = %transaction.source_account(), "Source account mismatch");
            return Err(ErrorReason::InvalidPayment);
        }
    }

    let required = parse_amount(&requirements.max_amount_required)
        .ok_or(ErrorReason::InvalidPaymentRequirements)?;
    let payment = transaction
        .payments()
        .into_iter()
        .find(|payment| {
            payment.asset == requirements.asset
                && payment.pay_to == requirements.pay_to
                && payment.amount >= required
        })
        .ok_or_else(|| {
            tracing::debug!(required, "No operation pays the required amount");
            ErrorReason::InvalidPayment
        })?;

    if !signers.contains(&payment.payer) {
        tracing::debug!(payer = %payment.payer, "Payer did not sign the transaction");
        return Err(ErrorReason::InvalidPayment);
    }
    Ok(payment.payer)
}
