//! Shared fixtures: a deterministic in-memory ledger and signed envelope builders.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stellar_xdr::curr::{
    AccountId, DecoratedSignature, Hash, HostFunction, Int128Parts, InvokeContractArgs,
    InvokeHostFunctionOp, LedgerBounds, Limits, Memo, MuxedAccount, MuxedAccountMed25519,
    Operation, OperationBody, Preconditions, PreconditionsV2, PublicKey, ScAddress, ScSymbol,
    ScVal, SequenceNumber, SignatureHint, TimeBounds, TimePoint, Transaction,
    TransactionEnvelope, TransactionExt, TransactionV1Envelope, Uint256, VecM, WriteXdr,
};
use url::Url;

use x402_stellar_facilitator::backoff::Backoff;
use x402_stellar_facilitator::chain::stellar::{account_address, contract_address, transaction_hash};
use x402_stellar_facilitator::chain::{
    DecodedTransaction, LedgerClient, LedgerError, LedgerState, SubmittedTransaction,
    TransactionStatus,
};
use x402_stellar_facilitator::facilitator_local::FacilitatorLocal;
use x402_stellar_facilitator::network::Network;
use x402_stellar_facilitator::provider_cache::ProviderCache;
use x402_stellar_facilitator::settlement::SettlementConfig;
use x402_stellar_facilitator::types::{
    ExactStellarPayload, PaymentPayload, PaymentRequirements, PaymentRequirementsExtra, Scheme,
    VerifyRequest, X402Version,
};

pub const TOKEN_CONTRACT: [u8; 32] = [7u8; 32];

// =============================================================================
// Fake ledger
// =============================================================================

/// In-memory [`LedgerClient`] with scripted answers and call counters.
pub struct FakeLedger {
    network: Network,
    sequence: AtomicU32,
    /// Transient failures left before `current_ledger_state` answers.
    transient_state_failures: AtomicU32,
    unavailable: AtomicBool,
    malformed: AtomicBool,
    rejection: Mutex<Option<String>>,
    submit_delay: Mutex<Duration>,
    statuses: Mutex<VecDeque<TransactionStatus>>,
    final_status: Mutex<TransactionStatus>,
    pub state_calls: AtomicUsize,
    pub submissions: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl FakeLedger {
    pub fn new(network: Network) -> Arc<Self> {
        Arc::new(FakeLedger {
            network,
            sequence: AtomicU32::new(100),
            transient_state_failures: AtomicU32::new(0),
            unavailable: AtomicBool::new(false),
            malformed: AtomicBool::new(false),
            rejection: Mutex::new(None),
            submit_delay: Mutex::new(Duration::ZERO),
            statuses: Mutex::new(VecDeque::new()),
            final_status: Mutex::new(TransactionStatus::Success { ledger: Some(101) }),
            state_calls: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_sequence(&self, sequence: u32) {
        self.sequence.store(sequence, Ordering::SeqCst);
    }

    pub fn fail_state_transiently(&self, times: u32) {
        self.transient_state_failures.store(times, Ordering::SeqCst);
    }

    /// Every ledger call fails with a transport error until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// `current_ledger_state` answers with garbage until cleared. Not retried.
    pub fn set_malformed(&self, malformed: bool) {
        self.malformed.store(malformed, Ordering::SeqCst);
    }

    pub fn reject_submissions(&self, result_xdr: &str) {
        *self.rejection.lock().unwrap() = Some(result_xdr.to_string());
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    /// Statuses returned, in order, before falling back to the final one.
    pub fn push_status(&self, status: TransactionStatus) {
        self.statuses.lock().unwrap().push_back(status);
    }

    pub fn set_final_status(&self, status: TransactionStatus) {
        *self.final_status.lock().unwrap() = status;
    }

    pub fn ledger_calls(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
            + self.submissions.load(Ordering::SeqCst)
            + self.status_calls.load(Ordering::SeqCst)
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn transport_error(&self) -> Option<LedgerError> {
        self.unavailable
            .load(Ordering::SeqCst)
            .then(|| LedgerError::Transport("connection refused".to_string()))
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    fn network(&self) -> Network {
        self.network
    }

    async fn current_ledger_state(&self) -> Result<LedgerState, LedgerError> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.transport_error() {
            return Err(error);
        }
        if self.malformed.load(Ordering::SeqCst) {
            return Err(LedgerError::MalformedResponse("missing sequence".to_string()));
        }
        let remaining = self.transient_state_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_state_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LedgerError::Http { status: 503 });
        }
        Ok(LedgerState {
            sequence: self.sequence.load(Ordering::SeqCst),
        })
    }

    async fn submit(&self, transaction: &DecodedTransaction) -> Result<SubmittedTransaction, LedgerError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let delay = *self.submit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.transport_error() {
            return Err(error);
        }
        if let Some(result_xdr) = self.rejection.lock().unwrap().clone() {
            return Err(LedgerError::Rejected(result_xdr));
        }
        Ok(SubmittedTransaction {
            hash: transaction.hash_hex(),
            duplicate: false,
        })
    }

    async fn transaction_status(&self, _hash: &str) -> Result<TransactionStatus, LedgerError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.transport_error() {
            return Err(error);
        }
        let next = self.statuses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.final_status.lock().unwrap().clone()))
    }
}

// =============================================================================
// Facilitator
// =============================================================================

pub fn fast_config() -> SettlementConfig {
    SettlementConfig {
        poll_interval: Duration::from_millis(10),
        backoff: Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
        default_timeout: Duration::from_secs(5),
        cache_ttl: Duration::from_secs(60),
    }
}

pub fn facilitator(ledger: &Arc<FakeLedger>) -> FacilitatorLocal {
    let client: Arc<dyn LedgerClient> = ledger.clone();
    FacilitatorLocal::new(ProviderCache::new().with(client), fast_config())
}

// =============================================================================
// Envelopes
// =============================================================================

pub fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn address(signing_key: &SigningKey) -> String {
    account_address(&signing_key.verifying_key().to_bytes())
}

pub fn token() -> String {
    contract_address(&TOKEN_CONTRACT)
}

fn account_id(signing_key: &SigningKey) -> AccountId {
    AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(
        signing_key.verifying_key().to_bytes(),
    )))
}

/// Soroban `transfer(from, to, amount)` on [`TOKEN_CONTRACT`].
pub fn transfer_op(from: &SigningKey, to: &SigningKey, amount: i128) -> Operation {
    let args: VecM<ScVal> = vec![
        ScVal::Address(ScAddress::Account(account_id(from))),
        ScVal::Address(ScAddress::Account(account_id(to))),
        ScVal::I128(Int128Parts {
            hi: (amount >> 64) as i64,
            lo: amount as u64,
        }),
    ]
    .try_into()
    .unwrap();
    Operation {
        source_account: None,
        body: OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
            host_function: HostFunction::InvokeContract(InvokeContractArgs {
                contract_address: ScAddress::Contract(Hash(TOKEN_CONTRACT)),
                function_name: ScSymbol("transfer".try_into().unwrap()),
                args,
            }),
            auth: VecM::default(),
        }),
    }
}

pub fn max_ledger(max_ledger: u32) -> Preconditions {
    Preconditions::V2(PreconditionsV2 {
        time_bounds: None,
        ledger_bounds: Some(LedgerBounds {
            min_ledger: 0,
            max_ledger,
        }),
        min_seq_num: None,
        min_seq_age: stellar_xdr::curr::Duration(0),
        min_seq_ledger_gap: 0,
        extra_signers: VecM::default(),
    })
}

/// A signed envelope and its detached hex signature.
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    pub xdr: String,
    pub signature: String,
}

pub fn time_bounds(max_time: u64) -> Preconditions {
    Preconditions::Time(TimeBounds {
        min_time: TimePoint(0),
        max_time: TimePoint(max_time),
    })
}

pub fn plain_account(signing_key: &SigningKey) -> MuxedAccount {
    MuxedAccount::Ed25519(Uint256(signing_key.verifying_key().to_bytes()))
}

pub fn muxed_account(signing_key: &SigningKey, id: u64) -> MuxedAccount {
    MuxedAccount::MuxedEd25519(MuxedAccountMed25519 {
        id,
        ed25519: Uint256(signing_key.verifying_key().to_bytes()),
    })
}

pub fn signed_transfer(
    payer: &SigningKey,
    signer: &SigningKey,
    pay_to: &SigningKey,
    amount: i128,
    cond: Preconditions,
    network: Network,
) -> SignedEnvelope {
    signed_transfer_from(plain_account(payer), payer, signer, pay_to, amount, cond, network)
}

/// Like [`signed_transfer`] with an explicit transaction source account.
pub fn signed_transfer_from(
    source: MuxedAccount,
    payer: &SigningKey,
    signer: &SigningKey,
    pay_to: &SigningKey,
    amount: i128,
    cond: Preconditions,
    network: Network,
) -> SignedEnvelope {
    let tx = Transaction {
        source_account: source,
        fee: 100,
        seq_num: SequenceNumber(7),
        cond,
        memo: Memo::None,
        operations: vec![transfer_op(payer, pay_to, amount)].try_into().unwrap(),
        ext: TransactionExt::V0,
    };
    let hash = transaction_hash(&tx, &network.stellar_network_id().unwrap()).unwrap();
    let signature = signer.sign(&hash).to_bytes();
    let public_key = signer.verifying_key().to_bytes();
    let decorated = DecoratedSignature {
        hint: SignatureHint(public_key[28..32].try_into().unwrap()),
        signature: stellar_xdr::curr::Signature(signature.to_vec().try_into().unwrap()),
    };
    let envelope = TransactionEnvelope::Tx(TransactionV1Envelope {
        tx,
        signatures: vec![decorated].try_into().unwrap(),
    });
    SignedEnvelope {
        xdr: BASE64.encode(envelope.to_xdr(Limits::none()).unwrap()),
        signature: hex::encode(signature),
    }
}

// =============================================================================
// Requests
// =============================================================================

pub fn requirements(pay_to: &SigningKey, amount: &str) -> PaymentRequirements {
    PaymentRequirements {
        scheme: Scheme::Exact,
        network: Network::StellarTestnet,
        resource: Url::parse("https://api.example.com/weather").unwrap(),
        description: "Weather report".to_string(),
        mime_type: "application/json".to_string(),
        max_timeout_seconds: 5,
        max_amount_required: amount.to_string(),
        pay_to: address(pay_to),
        asset: token(),
        extra: None,
    }
}

pub fn with_max_ledger(requirements: PaymentRequirements, max_ledger: u32) -> PaymentRequirements {
    with_extra(
        requirements,
        PaymentRequirementsExtra {
            max_ledger: Some(max_ledger),
            ..PaymentRequirementsExtra::default()
        },
    )
}

pub fn with_extra(mut requirements: PaymentRequirements, extra: PaymentRequirementsExtra) -> PaymentRequirements {
    requirements.extra = Some(extra);
    requirements
}

pub fn request(envelope: &SignedEnvelope, requirements: PaymentRequirements) -> VerifyRequest {
    VerifyRequest {
        payment_payload: PaymentPayload {
            x402_version: X402Version::V1,
            scheme: Scheme::Exact,
            network: requirements.network,
            payload: ExactStellarPayload {
                signature: envelope.signature.clone(),
                invoke_host_op_xdr: envelope.xdr.clone(),
            },
        },
        payment_requirements: requirements,
    }
}

/// Payer 1 pays recipient 2 `amount` of the token on testnet, signed by the payer.
pub fn valid_request(amount: i128, required: &str) -> VerifyRequest {
    let payer = key(1);
    let recipient = key(2);
    let envelope = signed_transfer(
        &payer,
        &payer,
        &recipient,
        amount,
        Preconditions::None,
        Network::StellarTestnet,
    );
    request(&envelope, requirements(&recipient, required))
}
