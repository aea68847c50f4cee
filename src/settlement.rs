//! Settlement coordination.
//!
//! A settlement moves through these phases, keyed by the envelope fingerprint:
//!
//! ```text
//! RECEIVED ──verify fails──────────────▶ REJECTED
//!    │
//!    ▼
//! SUBMITTING ──rejected / send fails───▶ FAILED
//!    │
//!    ▼
//! SUBMITTED ──included, failing code───▶ FAILED
//!    │       ──timeout─────────────────▶ FAILED
//!    ▼
//! CONFIRMED
//! ```
//!
//! Phases reached after submission are recorded in the [`SettlementStore`], so a
//! fingerprint is submitted at most once and repeated calls observe the same result.
//! Rejections before submission depend on the requirements presented, not only on the
//! envelope, and are never recorded. A recorded result is only returned to requests
//! whose requirements the envelope actually pays.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{instrument, Instrument};

use crate::backoff::{deadline_after, Backoff};
use crate::chain::{LedgerError, TransactionStatus};
use crate::settlement_store::{Claim, Fingerprint, SettlementStore};
use crate::types::{ErrorReason, SettleRequest, SettleResponse};
use crate::verifier::{CheckedRequest, PayloadVerifier, VerificationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementConfig {
    /// Delay between inclusion checks while the transaction is not found.
    pub poll_interval: Duration,
    pub backoff: Backoff,
    /// Budget used when the requirements carry `maxTimeoutSeconds: 0`.
    pub default_timeout: Duration,
    /// How long terminal results stay cached.
    pub cache_ttl: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            backoff: Backoff::default(),
            default_timeout: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementPhase {
    Received,
    Submitting,
    Submitted,
    Confirmed,
    Rejected,
    Failed,
}

impl Display for SettlementPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            SettlementPhase::Received => "received",
            SettlementPhase::Submitting => "submitting",
            SettlementPhase::Submitted => "submitted",
            SettlementPhase::Confirmed => "confirmed",
            SettlementPhase::Rejected => "rejected",
            SettlementPhase::Failed => "failed",
        };
        f.write_str(phase)
    }
}

/// How one settlement attempt ended.
#[derive(Debug)]
enum Outcome {
    /// Reached after submission. Recorded against the fingerprint.
    Final(SettleResponse),
    /// Rejected before submission. Not recorded.
    Rejected(SettleResponse),
}

impl Outcome {
    fn into_response(self) -> SettleResponse {
        match self {
            Outcome::Final(response) | Outcome::Rejected(response) => response,
        }
    }
}

#[derive(Clone)]
pub struct SettlementCoordinator {
    verifier: Arc<PayloadVerifier>,
    store: SettlementStore,
    config: SettlementConfig,
}

impl SettlementCoordinator {
    pub fn new(verifier: Arc<PayloadVerifier>, store: SettlementStore, config: SettlementConfig) -> Self {
        Self {
            verifier,
            store,
            config,
        }
    }

    pub fn store(&self) -> &SettlementStore {
        &self.store
    }

    fn budget(&self, request: &SettleRequest) -> Duration {
        match request.payment_requirements.max_timeout_seconds {
            0 => self.config.default_timeout,
            seconds => Duration::from_secs(seconds),
        }
    }

    /// Settles the payment carried by `request` at most once.
    ///
    /// Returns `Err` only for ledger failures that happened before submission. Nothing
    /// is cached in that case and the caller may retry.
    ///
    /// The claimed settlement runs in its own task, so dropping this future after the
    /// claim does not abandon a submission.
    pub async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, LedgerError> {
        let network = request.payment_payload.network;
        let checked = match self.verifier.check_request(request) {
            Ok(checked) => checked,
            Err(reason) => {
                tracing::debug!(reason = %reason, "Settlement request rejected before claim");
                return Ok(SettleResponse::rejected(reason, network));
            }
        };
        let budget = self.budget(request);
        let deadline = deadline_after(budget);

        // Requirements this envelope does not pay never see a recorded result
        if let Err(reason) = self.verifier.check_authorization(request, &checked) {
            return self.reject(request, &checked, deadline, reason).await;
        }
        let fingerprint = Fingerprint::of(&request.payment_payload.payload.invoke_host_op_xdr);

        loop {
            match self.store.claim(fingerprint) {
                Claim::Settled(response) => {
                    tracing::debug!(%fingerprint, "Returning cached settlement result");
                    return Ok(response);
                }
                Claim::InFlight(in_flight) => {
                    tracing::debug!(%fingerprint, "Settlement in flight, waiting");
                    if let Some(response) = in_flight.wait().await {
                        return Ok(response);
                    }
                }
                Claim::Acquired(guard) => {
                    let coordinator = self.clone();
                    let request = request.clone();
                    let settlement = tokio::spawn(
                        async move {
                            let outcome = coordinator
                                .run(&request, &checked, fingerprint, deadline, budget)
                                .await;
                            if let Ok(Outcome::Final(response)) = &outcome {
                                guard.complete(response.clone());
                            }
                            outcome
                        }
                        .instrument(tracing::Span::current()),
                    );
                    return match settlement.await {
                        Ok(outcome) => outcome.map(Outcome::into_response),
                        Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
                        Err(error) => Err(LedgerError::Transport(error.to_string())),
                    };
                }
            }
        }
    }

    /// Answers a request whose requirements the envelope does not satisfy, reporting
    /// the same reason verification would.
    async fn reject(
        &self,
        request: &SettleRequest,
        checked: &CheckedRequest,
        deadline: Instant,
        reason: ErrorReason,
    ) -> Result<SettleResponse, LedgerError> {
        let network = checked.transaction.network;
        let verified =
            tokio::time::timeout_at(deadline, self.verifier.verify_checked(request, checked, deadline)).await;
        let reason = match verified {
            Ok(Err(VerificationError::Invalid(first))) => first,
            Ok(Err(VerificationError::Ledger(error))) => return Err(error),
            Ok(Ok(_)) | Err(_) => reason,
        };
        tracing::info!(phase = %SettlementPhase::Rejected, reason = %reason, "Payment rejected");
        Ok(SettleResponse::rejected(reason, network))
    }

    #[instrument(skip_all, err, fields(fingerprint = %fingerprint, network = %checked.transaction.network))]
    async fn run(
        &self,
        request: &SettleRequest,
        checked: &CheckedRequest,
        fingerprint: Fingerprint,
        deadline: Instant,
        budget: Duration,
    ) -> Result<Outcome, LedgerError> {
        let submitted = AtomicBool::new(false);

        match tokio::time::timeout_at(deadline, self.drive(request, checked, deadline, &submitted)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    phase = %SettlementPhase::Failed,
                    timeout_secs = budget.as_secs(),
                    "Settlement timed out"
                );
                let network = checked.transaction.network;
                if submitted.load(Ordering::SeqCst) {
                    Ok(Outcome::Final(SettleResponse::failed(
                        ErrorReason::InvalidTransactionState,
                        checked.transaction.envelope_xdr.clone(),
                        network,
                    )))
                } else {
                    Ok(Outcome::Rejected(SettleResponse::rejected(
                        ErrorReason::InvalidTransactionState,
                        network,
                    )))
                }
            }
        }
    }

    async fn drive(
        &self,
        request: &SettleRequest,
        checked: &CheckedRequest,
        deadline: Instant,
        submitted: &AtomicBool,
    ) -> Result<Outcome, LedgerError> {
        let network = checked.transaction.network;
        let envelope = checked.transaction.envelope_xdr.clone();
        let client = &checked.client;
        let transaction = &checked.transaction;

        tracing::debug!(phase = %SettlementPhase::Received, "Verifying payment before submission");
        let payer = match self.verifier.verify_checked(request, checked, deadline).await {
            Ok(verified) => verified.payer,
            Err(VerificationError::Invalid(reason)) => {
                tracing::info!(phase = %SettlementPhase::Rejected, reason = %reason, "Payment rejected");
                return Ok(Outcome::Rejected(SettleResponse::rejected(reason, network)));
            }
            Err(VerificationError::Ledger(error)) => return Err(error),
        };

        tracing::info!(
            phase = %SettlementPhase::Submitting,
            payer = %payer,
            tx_hash = %transaction.hash_hex(),
            "Submitting transaction"
        );
        submitted.store(true, Ordering::SeqCst);
        let accepted = match self
            .config
            .backoff
            .retry(deadline, "submit", move || client.submit(transaction))
            .await
        {
            Ok(accepted) => accepted,
            Err(LedgerError::Rejected(result)) => {
                tracing::warn!(phase = %SettlementPhase::Failed, result = %result, "Ledger rejected transaction");
                return Ok(Outcome::Final(SettleResponse::failed(
                    ErrorReason::InvalidTransaction,
                    envelope,
                    network,
                )));
            }
            Err(error) => {
                tracing::error!(phase = %SettlementPhase::Failed, error = %error, "Transaction submission failed");
                return Ok(Outcome::Final(SettleResponse::failed(
                    ErrorReason::SubmissionFailed,
                    envelope,
                    network,
                )));
            }
        };
        tracing::info!(
            phase = %SettlementPhase::Submitted,
            tx_hash = %accepted.hash,
            duplicate = accepted.duplicate,
            "Transaction accepted by ledger"
        );

        let hash = accepted.hash.as_str();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let status = self
                .config
                .backoff
                .retry(deadline, "transaction_status", move || client.transaction_status(hash))
                .await;
            match status {
                Ok(TransactionStatus::Success { ledger }) => {
                    tracing::info!(
                        phase = %SettlementPhase::Confirmed,
                        tx_hash = %hash,
                        ledger = ?ledger,
                        "Stellar transaction confirmed"
                    );
                    return Ok(Outcome::Final(SettleResponse::settled(payer, envelope, network)));
                }
                Ok(TransactionStatus::Failed { result_xdr }) => {
                    tracing::warn!(
                        phase = %SettlementPhase::Failed,
                        tx_hash = %hash,
                        result_xdr = ?result_xdr,
                        "Stellar transaction failed"
                    );
                    return Ok(Outcome::Final(SettleResponse::failed(
                        ErrorReason::InvalidTransactionState,
                        envelope,
                        network,
                    )));
                }
                Ok(TransactionStatus::NotFound) => {
                    tracing::debug!(tx_hash = %hash, attempt, "Transaction not yet confirmed, polling...");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(error) => {
                    tracing::error!(
                        phase = %SettlementPhase::Failed,
                        tx_hash = %hash,
                        error = %error,
                        "Could not confirm transaction"
                    );
                    return Ok(Outcome::Final(SettleResponse::failed(
                        ErrorReason::InvalidTransactionState,
                        envelope,
                        network,
                    )));
                }
            }
        }
    }
}
