//! [`LedgerClient`] over Soroban JSON-RPC.
//!
//! Uses `getLatestLedger`, `sendTransaction` and `getTransaction`. Retries are the
//! caller's business: every call here is a single request and failures come back
//! classified through [`LedgerError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::chain::{
    DecodedTransaction, LedgerClient, LedgerError, LedgerState, SubmittedTransaction,
    TransactionStatus,
};
use crate::network::Network;

/// Soroban RPC request wrapper (with params)
#[derive(Debug, Serialize)]
struct RpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<T>,
}

/// Soroban RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct GetLatestLedgerResult {
    sequence: u32,
}

#[derive(Debug, Serialize)]
struct SendTransactionParams<'a> {
    transaction: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendTransactionResult {
    status: String,
    hash: String,
    error_result_xdr: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetTransactionParams<'a> {
    hash: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetTransactionResult {
    status: String,
    ledger: Option<u32>,
    result_xdr: Option<String>,
}

/// Soroban RPC client bound to one Stellar network.
#[derive(Debug, Clone)]
pub struct SorobanRpcClient {
    http_client: reqwest::Client,
    rpc_url: Url,
    network: Network,
}

impl SorobanRpcClient {
    pub fn new(network: Network, rpc_url: Url) -> Result<Self, LedgerError> {
        if network.stellar_passphrase().is_none() {
            return Err(LedgerError::UnsupportedNetwork(network));
        }
        tracing::info!(network = %network, rpc_url = %rpc_url, "Initialized Soroban RPC client");
        Ok(Self {
            http_client: reqwest::Client::new(),
            rpc_url,
            network,
        })
    }

    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    async fn rpc_request<P: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        method: &'static str,
        params: Option<P>,
    ) -> Result<R, LedgerError> {
        // getLatestLedger rejects an empty params object, so absent params are omitted
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .http_client
            .post(self.rpc_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Http {
                status: status.as_u16(),
            });
        }

        let rpc_response: RpcResponse<R> = response
            .json()
            .await
            .map_err(|e| LedgerError::MalformedResponse(format!("{}: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        rpc_response
            .result
            .ok_or_else(|| LedgerError::MalformedResponse(format!("{}: empty result", method)))
    }
}

#[async_trait]
impl LedgerClient for SorobanRpcClient {
    fn network(&self) -> Network {
        self.network
    }

    async fn current_ledger_state(&self) -> Result<LedgerState, LedgerError> {
        let result: GetLatestLedgerResult = self
            .rpc_request::<(), _>("getLatestLedger", None)
            .await?;
        Ok(LedgerState {
            sequence: result.sequence,
        })
    }

    async fn submit(
        &self,
        transaction: &DecodedTransaction,
    ) -> Result<SubmittedTransaction, LedgerError> {
        let result: SendTransactionResult = self
            .rpc_request(
                "sendTransaction",
                Some(SendTransactionParams {
                    transaction: &transaction.envelope_xdr,
                }),
            )
            .await?;
        submission_outcome(result)
    }

    async fn transaction_status(&self, hash: &str) -> Result<TransactionStatus, LedgerError> {
        let result: GetTransactionResult = self
            .rpc_request("getTransaction", Some(GetTransactionParams { hash }))
            .await?;
        inclusion_status(result)
    }
}

fn submission_outcome(result: SendTransactionResult) -> Result<SubmittedTransaction, LedgerError> {
    match result.status.as_str() {
        "PENDING" => Ok(SubmittedTransaction {
            hash: result.hash,
            duplicate: false,
        }),
        "DUPLICATE" => Ok(SubmittedTransaction {
            hash: result.hash,
            duplicate: true,
        }),
        "TRY_AGAIN_LATER" => Err(LedgerError::TryAgainLater),
        "ERROR" => Err(LedgerError::Rejected(
            result
                .error_result_xdr
                .unwrap_or_else(|| "Unknown error".to_string()),
        )),
        other => Err(LedgerError::MalformedResponse(format!(
            "sendTransaction: unexpected status {}",
            other
        ))),
    }
}

fn inclusion_status(result: GetTransactionResult) -> Result<TransactionStatus, LedgerError> {
    match result.status.as_str() {
        "SUCCESS" => Ok(TransactionStatus::Success {
            ledger: result.ledger,
        }),
        "FAILED" => Ok(TransactionStatus::Failed {
            result_xdr: result.result_xdr,
        }),
        "NOT_FOUND" => Ok(TransactionStatus::NotFound),
        other => Err(LedgerError::MalformedResponse(format!(
            "getTransaction: unexpected status {}",
            other
        ))),
    }
}
