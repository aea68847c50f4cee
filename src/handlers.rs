//! HTTP endpoints implemented by the x402 **facilitator**.
//!
//! Protocol endpoints (`/verify`, `/settle`) take the raw body and parse it themselves, so
//! a malformed request is answered with the protocol's own error shape instead of axum's
//! extractor rejection.
//!
//! Status codes follow the reason carried in the body:
//! - request-shape reasons (`invalid_payload`, `invalid_network`, ...) → `400`
//! - unexpected internal failures → `500`
//! - everything else, including rejected payments and failed settlements → `200`

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{response::IntoResponse, Json, Router};
use serde_json::json;
use tracing::{instrument, warn};

use crate::facilitator::Facilitator;
use crate::facilitator_local::FacilitatorLocalError;
use crate::network::Network;
use crate::provider_cache::HasProviderMap;
use crate::types::{ErrorReason, SettleRequest, SettleResponse, VerifyRequest, VerifyResponse};

/// Longest request body excerpt written to logs.
const LOGGED_BODY_CHARS: usize = 2000;

/// `GET /verify`: Returns a machine-readable description of the `/verify` endpoint.
#[instrument(skip_all)]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: Returns a machine-readable description of the `/settle` endpoint.
#[instrument(skip_all)]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

pub fn routes<A>() -> Router<A>
where
    A: Facilitator + HasProviderMap + Clone + Send + Sync + 'static,
    A::Error: IntoResponse,
{
    Router::new()
        .route("/verify", get(get_verify_info))
        .route("/verify", post(post_verify::<A>))
        .route("/settle", get(get_settle_info))
        .route("/settle", post(post_settle::<A>))
        .route("/health", get(get_health))
        .route("/version", get(get_version))
        .route("/supported", get(get_supported::<A>))
}

/// `GET /supported`: Lists the `(version, scheme, network)` combinations accepted here.
#[instrument(skip_all)]
pub async fn get_supported<A>(State(facilitator): State<A>) -> impl IntoResponse
where
    A: Facilitator,
    A::Error: IntoResponse,
{
    match facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(supported)).into_response(),
        Err(error) => error.into_response(),
    }
}

/// `GET /health`: Liveness only. Does not touch the ledger.
#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "stellar-facilitator"
    }))
}

/// `GET /version`: Returns the current version of the facilitator.
#[instrument(skip_all)]
pub async fn get_version() -> impl IntoResponse {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `POST /verify`: Facilitator-side verification of a proposed x402 payment.
///
/// Responds with a [`VerifyResponse`]; `payer` is the account that authorized the
/// transaction when the payment is valid.
#[instrument(skip_all)]
pub async fn post_verify<A>(State(facilitator): State<A>, raw_body: Bytes) -> Response
where
    A: Facilitator,
    A::Error: IntoResponse,
{
    let request: VerifyRequest = match serde_json::from_slice(&raw_body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, body = %logged_body(&raw_body), "Failed to deserialize VerifyRequest");
            return (
                StatusCode::BAD_REQUEST,
                Json(VerifyResponse::invalid(ErrorReason::InvalidPayload)),
            )
                .into_response();
        }
    };

    tracing::info!(
        network = %request.payment_payload.network,
        scheme = %request.payment_payload.scheme,
        "Verifying payment"
    );

    match facilitator.verify(&request).await {
        Ok(response) => {
            let status = status_for(response.invalid_reason);
            (status, Json(response)).into_response()
        }
        Err(error) => {
            warn!(error = %error, "Verification failed");
            error.into_response()
        }
    }
}

/// `POST /settle`: Submits an accepted payment to the ledger and waits for the outcome.
///
/// Repeated calls carrying the same envelope return the first terminal result.
#[instrument(skip_all)]
pub async fn post_settle<A>(State(facilitator): State<A>, raw_body: Bytes) -> Response
where
    A: Facilitator + HasProviderMap,
    A::Error: IntoResponse,
{
    let request: SettleRequest = match serde_json::from_slice(&raw_body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, body = %logged_body(&raw_body), "Failed to deserialize SettleRequest");
            let network = network_hint(&raw_body)
                .or_else(|| facilitator.provider_map().default_network())
                .unwrap_or(Network::StellarTestnet);
            return (
                StatusCode::BAD_REQUEST,
                Json(SettleResponse::rejected(ErrorReason::InvalidPayload, network)),
            )
                .into_response();
        }
    };

    tracing::info!(
        network = %request.payment_payload.network,
        scheme = %request.payment_payload.scheme,
        "Settling payment"
    );

    match facilitator.settle(&request).await {
        Ok(response) => {
            let status = status_for(response.error_reason);
            (status, Json(response)).into_response()
        }
        Err(error) => {
            warn!(error = %error, "Settlement failed");
            error.into_response()
        }
    }
}

fn status_for(reason: Option<ErrorReason>) -> StatusCode {
    match reason {
        Some(reason) if reason.is_request_shape() => StatusCode::BAD_REQUEST,
        Some(reason) if reason.is_unexpected() => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}

/// Network named by a body that failed to deserialize, if it names a known one.
fn network_hint(raw_body: &[u8]) -> Option<Network> {
    let body: serde_json::Value = serde_json::from_slice(raw_body).ok()?;
    ["paymentPayload", "paymentRequirements"]
        .iter()
        .filter_map(|section| body.get(section)?.get("network").cloned())
        .find_map(|network| serde_json::from_value::<Network>(network).ok())
}

fn logged_body(raw_body: &[u8]) -> String {
    let body = String::from_utf8_lossy(raw_body);
    if body.chars().count() > LOGGED_BODY_CHARS {
        let head: String = body.chars().take(LOGGED_BODY_CHARS).collect();
        format!("{head}... (truncated)")
    } else {
        body.into_owned()
    }
}

impl IntoResponse for FacilitatorLocalError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Facilitator error");
        match self {
            FacilitatorLocalError::Verification { .. }
            | FacilitatorLocalError::VerificationTimeout(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(VerifyResponse::invalid(ErrorReason::UnexpectedVerifyError)),
            )
                .into_response(),
            FacilitatorLocalError::Settlement { network, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SettleResponse::rejected(
                    ErrorReason::UnexpectedSettleError,
                    network,
                )),
            )
                .into_response(),
        }
    }
}
