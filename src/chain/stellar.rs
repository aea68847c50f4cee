//! Stellar envelope inspection.
//!
//! Clients pay by handing the facilitator a fully signed transaction envelope (base64 XDR).
//! This module decodes that envelope, computes its network-bound hash, checks the
//! decorated signatures and extracts the payments it would perform:
//!
//! 1. Soroban `InvokeHostFunction` calling `transfer(from, to, amount)` on a token contract
//! 2. Classic `Payment` of a credit asset identified by its issuer
//!
//! Nothing here performs I/O.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use stellar_strkey::{ed25519::PublicKey as StellarPublicKey, Contract};
use stellar_xdr::curr::{
    AccountId, Asset, DecoratedSignature, HostFunction, Limits, MuxedAccount, Operation,
    OperationBody, Preconditions, PublicKey, ReadXdr, ScAddress, ScVal, SorobanCredentials,
    Transaction, TransactionEnvelope, WriteXdr,
};

use crate::chain::LedgerError;
use crate::network::Network;

/// ENVELOPE_TYPE_TX from the Stellar XDR definitions.
const ENVELOPE_TYPE_TX: u32 = 2;

/// Nesting limit applied when decoding untrusted XDR.
const MAX_XDR_DEPTH: u32 = 500;

// =============================================================================
// Address Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StellarAddressKind {
    /// `G...` ed25519 account.
    Account,
    /// `C...` contract.
    Contract,
}

/// Stellar account or contract address in strkey form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StellarAddress {
    pub address: String,
}

impl StellarAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn kind(&self) -> Option<StellarAddressKind> {
        if StellarPublicKey::from_string(&self.address).is_ok() {
            Some(StellarAddressKind::Account)
        } else if Contract::from_string(&self.address).is_ok() {
            Some(StellarAddressKind::Contract)
        } else {
            None
        }
    }

    /// Check if this is a valid Stellar address (G... for accounts, C... for contracts)
    pub fn is_valid(&self) -> bool {
        self.kind().is_some()
    }

    /// Get the raw 32-byte public key if this is a G... address
    pub fn public_key_bytes(&self) -> Option<[u8; 32]> {
        StellarPublicKey::from_string(&self.address)
            .ok()
            .map(|pk| pk.0)
    }
}

pub fn account_address(key: &[u8; 32]) -> String {
    StellarPublicKey(*key).to_string()
}

pub fn contract_address(id: &[u8; 32]) -> String {
    Contract(*id).to_string()
}

fn account_id_key(account: &AccountId) -> [u8; 32] {
    match &account.0 {
        PublicKey::PublicKeyTypeEd25519(key) => key.0,
    }
}

fn muxed_account_key(account: &MuxedAccount) -> [u8; 32] {
    match account {
        MuxedAccount::Ed25519(key) => key.0,
        MuxedAccount::MuxedEd25519(muxed) => muxed.ed25519.0,
    }
}

fn sc_address_string(address: &ScAddress) -> String {
    match address {
        ScAddress::Account(account) => account_address(&account_id_key(account)),
        ScAddress::Contract(hash) => contract_address(&hash.0),
    }
}

// =============================================================================
// Decoded Envelope
// =============================================================================

/// A payment found in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    /// Account whose funds move.
    pub payer: String,
    pub pay_to: String,
    /// Token contract (`C...`) or credit asset issuer (`G...`).
    pub asset: String,
    /// Amount in the asset's smallest unit.
    pub amount: i128,
}

/// A v1 transaction envelope decoded for a specific network.
#[derive(Debug, Clone)]
pub struct DecodedTransaction {
    pub network: Network,
    /// The base64 envelope exactly as received.
    pub envelope_xdr: String,
    pub transaction: Transaction,
    pub signatures: Vec<DecoratedSignature>,
    /// SHA-256 of the transaction signature payload.
    pub hash: [u8; 32],
}

impl DecodedTransaction {
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Transaction source as a `G...` address (muxed ids stripped).
    pub fn source_account(&self) -> String {
        account_address(&muxed_account_key(&self.transaction.source_account))
    }

    /// Multiplexed id of the transaction source, if it is an `M...` account.
    pub fn source_mux_id(&self) -> Option<u64> {
        match &self.transaction.source_account {
            MuxedAccount::MuxedEd25519(muxed) => Some(muxed.id),
            MuxedAccount::Ed25519(_) => None,
        }
    }

    /// Hex encodings of the decorated signatures, lowercase.
    pub fn signature_hexes(&self) -> Vec<String> {
        self.signatures
            .iter()
            .map(|decorated| hex::encode(decorated.signature.0.as_slice()))
            .collect()
    }

    fn operation_source(&self, operation: &Operation) -> [u8; 32] {
        operation
            .source_account
            .as_ref()
            .map(muxed_account_key)
            .unwrap_or_else(|| muxed_account_key(&self.transaction.source_account))
    }

    /// `ledgerBounds.maxLedger`, if set. Exclusive: the transaction must close in an
    /// earlier ledger.
    pub fn max_ledger(&self) -> Option<u32> {
        match &self.transaction.cond {
            Preconditions::V2(conditions) => conditions
                .ledger_bounds
                .as_ref()
                .map(|bounds| bounds.max_ledger)
                .filter(|max_ledger| *max_ledger != 0),
            Preconditions::None | Preconditions::Time(_) => None,
        }
    }

    /// Last ledger at which every Soroban address authorization remains valid.
    pub fn expiration_ledger(&self) -> Option<u32> {
        self
            .transaction
            .operations
            .iter()
            .filter_map(|operation| match &operation.body {
                OperationBody::InvokeHostFunction(invoke) => Some(invoke.auth.iter()),
                _ => None,
            })
            .flatten()
            .filter_map(|entry| match &entry.credentials {
                SorobanCredentials::Address(credentials) => {
                    Some(credentials.signature_expiration_ledger)
                }
                SorobanCredentials::SourceAccount => None,
            })
            .min()
    }

    /// Upper time bound (unix seconds), if the transaction sets one.
    pub fn expiration_time(&self) -> Option<u64> {
        let time_bounds = match &self.transaction.cond {
            Preconditions::Time(bounds) => Some(bounds),
            Preconditions::V2(conditions) => conditions.time_bounds.as_ref(),
            Preconditions::None => None,
        };
        time_bounds
            .map(|bounds| bounds.max_time.0)
            .filter(|max_time| *max_time != 0)
    }

    /// Every payment the transaction would perform, in operation order.
    pub fn payments(&self) -> Vec<PaymentIntent> {
        self.transaction
            .operations
            .iter()
            .filter_map(|operation| self.payment_intent(operation))
            .collect()
    }

    fn payment_intent(&self, operation: &Operation) -> Option<PaymentIntent> {
        match &operation.body {
            OperationBody::InvokeHostFunction(invoke) => {
                let HostFunction::InvokeContract(call) = &invoke.host_function else {
                    return None;
                };
                if call.function_name.0.as_slice() != b"transfer" {
                    return None;
                }
                match call.args.as_slice() {
                    [ScVal::Address(from), ScVal::Address(to), ScVal::I128(amount)] => {
                        Some(PaymentIntent {
                            payer: sc_address_string(from),
                            pay_to: sc_address_string(to),
                            asset: sc_address_string(&call.contract_address),
                            amount: ((amount.hi as i128) << 64) | (amount.lo as i128),
                        })
                    }
                    _ => None,
                }
            }
            OperationBody::Payment(payment) => {
                let issuer = match &payment.asset {
                    Asset::CreditAlphanum4(asset) => &asset.issuer,
                    Asset::CreditAlphanum12(asset) => &asset.issuer,
                    Asset::Native => return None,
                };
                Some(PaymentIntent {
                    payer: account_address(&self.operation_source(operation)),
                    pay_to: account_address(&muxed_account_key(&payment.destination)),
                    asset: account_address(&account_id_key(issuer)),
                    amount: payment.amount as i128,
                })
            }
            _ => None,
        }
    }

    /// Keys that may legitimately have signed this transaction.
    fn candidate_signers(&self) -> Vec<[u8; 32]> {
        let mut candidates = vec![muxed_account_key(&self.transaction.source_account)];
        for operation in self.transaction.operations.iter() {
            candidates.push(self.operation_source(operation));
        }
        for payment in self.payments() {
            if let Some(key) = StellarAddress::new(payment.payer).public_key_bytes() {
                candidates.push(key);
            }
        }
        candidates.sort_unstable();
        candidates.dedup();
        candidates
    }
}

// =============================================================================
// Decoding, Hashing, Signatures
// =============================================================================

/// Decodes a base64 XDR envelope and hashes it for `network`.
///
/// Only v1 (`Tx`) envelopes are accepted.
pub fn decode_envelope(
    envelope_xdr: &str,
    network: Network,
) -> Result<DecodedTransaction, LedgerError> {
    let network_id = network
        .stellar_network_id()
        .ok_or(LedgerError::UnsupportedNetwork(network))?;

    let xdr_bytes = BASE64
        .decode(envelope_xdr)
        .map_err(|e| LedgerError::InvalidXdr(format!("Base64 decode failed: {}", e)))?;
    let limits = Limits {
        depth: MAX_XDR_DEPTH,
        len: xdr_bytes.len(),
    };
    let envelope = TransactionEnvelope::from_xdr(&xdr_bytes, limits)
        .map_err(|e| LedgerError::InvalidXdr(format!("XDR decode failed: {}", e)))?;

    let envelope = match envelope {
        TransactionEnvelope::Tx(envelope) => envelope,
        TransactionEnvelope::TxV0(_) => {
            return Err(LedgerError::UnsupportedEnvelope("legacy v0 envelope"))
        }
        TransactionEnvelope::TxFeeBump(_) => {
            return Err(LedgerError::UnsupportedEnvelope("fee-bump envelope"))
        }
    };

    let hash = transaction_hash(&envelope.tx, &network_id)?;
    let signatures = envelope.signatures.to_vec();
    Ok(DecodedTransaction {
        network,
        envelope_xdr: envelope_xdr.to_string(),
        transaction: envelope.tx,
        signatures,
        hash,
    })
}

/// Transaction hash = SHA256(network_id + ENVELOPE_TYPE_TX + transaction_xdr)
pub fn transaction_hash(tx: &Transaction, network_id: &[u8; 32]) -> Result<[u8; 32], LedgerError> {
    let mut preimage = Vec::new();
    preimage.extend_from_slice(network_id);
    preimage.extend_from_slice(&ENVELOPE_TYPE_TX.to_be_bytes());
    let tx_xdr = tx
        .to_xdr(Limits::none())
        .map_err(|e| LedgerError::InvalidXdr(format!("Failed to encode transaction: {}", e)))?;
    preimage.extend_from_slice(&tx_xdr);
    Ok(Sha256::digest(&preimage).into())
}

/// Checks that the envelope is signed and that every decorated signature verifies
/// against a hint-matching candidate signer.
///
/// Returns the `G...` addresses of the verified signers, in signature order.
pub fn verify_signatures(transaction: &DecodedTransaction) -> Result<Vec<String>, LedgerError> {
    if transaction.signatures.is_empty() {
        return Err(LedgerError::InvalidSignature(
            "envelope carries no signatures".to_string(),
        ));
    }

    let candidates = transaction.candidate_signers();
    let mut signers = Vec::with_capacity(transaction.signatures.len());
    for decorated in &transaction.signatures {
        let hint = hex::encode(decorated.hint.0);
        let signature = Signature::from_slice(decorated.signature.0.as_slice()).map_err(|_| {
            LedgerError::InvalidSignature(format!("malformed signature with hint {}", hint))
        })?;
        let signer = candidates
            .iter()
            .filter(|key| key[28..] == decorated.hint.0[..])
            .find(|key| {
                VerifyingKey::from_bytes(key)
                    .map(|verifying_key| {
                        verifying_key
                            .verify_strict(&transaction.hash, &signature)
                            .is_ok()
                    })
                    .unwrap_or(false)
            });
        match signer {
            Some(key) => signers.push(account_address(key)),
            None => {
                return Err(LedgerError::InvalidSignature(format!(
                    "no signer verifies signature with hint {}",
                    hint
                )))
            }
        }
    }
    Ok(signers)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use stellar_xdr::curr::{
        AlphaNum4, AssetCode4, Hash, Int128Parts, InvokeContractArgs, InvokeHostFunctionOp,
        LedgerBounds, Memo, PaymentOp, PreconditionsV2, ScSymbol, SequenceNumber, SignatureHint,
        TransactionExt, TransactionV1Envelope, Uint256, VecM,
    };

    const CONTRACT: [u8; 32] = [9u8; 32];

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn account(signing_key: &SigningKey) -> AccountId {
        AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(
            signing_key.verifying_key().to_bytes(),
        )))
    }

    fn transfer_op(from: &SigningKey, to: &SigningKey, amount: i128) -> Operation {
        let args: VecM<ScVal> = vec![
            ScVal::Address(ScAddress::Account(account(from))),
            ScVal::Address(ScAddress::Account(account(to))),
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
                    contract_address: ScAddress::Contract(Hash(CONTRACT)),
                    function_name: ScSymbol("transfer".try_into().unwrap()),
                    args,
                }),
                auth: VecM::default(),
            }),
        }
    }

    fn transaction(source: &SigningKey, operation: Operation, cond: Preconditions) -> Transaction {
        Transaction {
            source_account: MuxedAccount::Ed25519(Uint256(source.verifying_key().to_bytes())),
            fee: 100,
            seq_num: SequenceNumber(42),
            cond,
            memo: Memo::None,
            operations: vec![operation].try_into().unwrap(),
            ext: TransactionExt::V0,
        }
    }

    fn envelope(tx: Transaction, signer: &SigningKey, network: Network) -> String {
        let hash = transaction_hash(&tx, &network.stellar_network_id().unwrap()).unwrap();
        let public_key = signer.verifying_key().to_bytes();
        let decorated = DecoratedSignature {
            hint: SignatureHint(public_key[28..32].try_into().unwrap()),
            signature: stellar_xdr::curr::Signature(
                signer.sign(&hash).to_bytes().to_vec().try_into().unwrap(),
            ),
        };
        let envelope = TransactionEnvelope::Tx(TransactionV1Envelope {
            tx,
            signatures: vec![decorated].try_into().unwrap(),
        });
        BASE64.encode(envelope.to_xdr(Limits::none()).unwrap())
    }

    #[test]
    fn test_stellar_address_validation() {
        let valid_g =
            StellarAddress::new("GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF");
        assert_eq!(valid_g.kind(), Some(StellarAddressKind::Account));

        let valid_c =
            StellarAddress::new("CAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAHK3M");
        assert_eq!(valid_c.kind(), Some(StellarAddressKind::Contract));
        assert!(valid_c.public_key_bytes().is_none());

        assert!(!StellarAddress::new("invalid").is_valid());
        // Checksum mismatch
        assert!(!StellarAddress::new("GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHG").is_valid());
    }

    #[test]
    fn test_decode_and_verify_transfer() {
        let payer = key(1);
        let recipient = key(2);
        let tx = transaction(&payer, transfer_op(&payer, &recipient, 5_000), Preconditions::None);
        let xdr = envelope(tx, &payer, Network::StellarTestnet);

        let decoded = decode_envelope(&xdr, Network::StellarTestnet).unwrap();
        assert_eq!(decoded.source_account(), account_address(&payer.verifying_key().to_bytes()));
        assert_eq!(decoded.source_mux_id(), None);
        assert_eq!(decoded.signature_hexes().len(), 1);

        let signers = verify_signatures(&decoded).unwrap();
        assert_eq!(signers, vec![decoded.source_account()]);

        let payments = decoded.payments();
        assert_eq!(
            payments,
            vec![PaymentIntent {
                payer: decoded.source_account(),
                pay_to: account_address(&recipient.verifying_key().to_bytes()),
                asset: contract_address(&CONTRACT),
                amount: 5_000,
            }]
        );
    }

    #[test]
    fn test_signature_is_bound_to_network() {
        let payer = key(3);
        let tx = transaction(&payer, transfer_op(&payer, &key(4), 1), Preconditions::None);
        let xdr = envelope(tx, &payer, Network::StellarTestnet);

        let on_mainnet = decode_envelope(&xdr, Network::StellarMainnet).unwrap();
        assert!(matches!(
            verify_signatures(&on_mainnet),
            Err(LedgerError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_signature_from_stranger_is_rejected() {
        let payer = key(5);
        let stranger = key(6);
        let tx = transaction(&payer, transfer_op(&payer, &key(7), 1), Preconditions::None);
        let xdr = envelope(tx, &stranger, Network::StellarTestnet);

        let decoded = decode_envelope(&xdr, Network::StellarTestnet).unwrap();
        assert!(verify_signatures(&decoded).is_err());
    }

    #[test]
    fn test_unsigned_envelope_is_rejected() {
        let payer = key(8);
        let tx = transaction(&payer, transfer_op(&payer, &key(9), 1), Preconditions::None);
        let unsigned = TransactionEnvelope::Tx(TransactionV1Envelope {
            tx,
            signatures: VecM::default(),
        });
        let xdr = BASE64.encode(unsigned.to_xdr(Limits::none()).unwrap());

        let decoded = decode_envelope(&xdr, Network::StellarTestnet).unwrap();
        assert!(matches!(
            verify_signatures(&decoded),
            Err(LedgerError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_envelope("AAAA", Network::StellarTestnet),
            Err(LedgerError::InvalidXdr(_))
        ));
        assert!(matches!(
            decode_envelope("not base64!", Network::StellarTestnet),
            Err(LedgerError::InvalidXdr(_))
        ));
        assert!(matches!(
            decode_envelope("AAAA", Network::Base),
            Err(LedgerError::UnsupportedNetwork(Network::Base))
        ));
    }

    #[test]
    fn test_ledger_bounds_are_read_from_preconditions() {
        let payer = key(10);
        let cond = Preconditions::V2(PreconditionsV2 {
            time_bounds: None,
            ledger_bounds: Some(LedgerBounds {
                min_ledger: 0,
                max_ledger: 900,
            }),
            min_seq_num: None,
            min_seq_age: stellar_xdr::curr::Duration(0),
            min_seq_ledger_gap: 0,
            extra_signers: VecM::default(),
        });
        let tx = transaction(&payer, transfer_op(&payer, &key(11), 1), cond);
        let decoded = decode_envelope(&envelope(tx, &payer, Network::StellarTestnet), Network::StellarTestnet).unwrap();
        assert_eq!(decoded.max_ledger(), Some(900));
        // no address credentials on the transfer
        assert_eq!(decoded.expiration_ledger(), None);
        assert_eq!(decoded.expiration_time(), None);
    }

    #[test]
    fn test_classic_payment_intent() {
        let payer = key(12);
        let recipient = key(13);
        let issuer = key(14);
        let operation = Operation {
            source_account: None,
            body: OperationBody::Payment(PaymentOp {
                destination: MuxedAccount::Ed25519(Uint256(recipient.verifying_key().to_bytes())),
                asset: Asset::CreditAlphanum4(AlphaNum4 {
                    asset_code: AssetCode4(*b"USDC"),
                    issuer: account(&issuer),
                }),
                amount: 2_500,
            }),
        };
        let tx = transaction(&payer, operation, Preconditions::None);
        let decoded = decode_envelope(&envelope(tx, &payer, Network::StellarTestnet), Network::StellarTestnet).unwrap();

        let payments = decoded.payments();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].payer, decoded.source_account());
        assert_eq!(payments[0].asset, account_address(&issuer.verifying_key().to_bytes()));
        assert_eq!(payments[0].amount, 2_500);
    }
}
