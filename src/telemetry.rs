//! Log output and HTTP request spans.
//!
//! Logs go to stdout through `tracing-subscriber`. The filter is read from `RUST_LOG` and
//! defaults to `info`, e.g. `RUST_LOG=x402_stellar_facilitator=debug,tower_http=info`.

use axum::body::Body;
use axum::http::{Request, Response};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{MakeSpan, OnResponse, TraceLayer};
use tracing::Span;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    name: Option<&'static str>,
    version: Option<&'static str>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = Some(version);
        self
    }

    /// Installs the global subscriber. A second call is a no-op.
    pub fn register(self) -> Self {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        let installed = tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init()
            .is_ok();
        if installed {
            tracing::info!(
                service = self.name.unwrap_or("unknown"),
                version = self.version.unwrap_or("unknown"),
                "Logging initialized"
            );
        }
        self
    }

    /// Request span per HTTP call, closed with status and latency.
    pub fn http_tracing(
        &self,
    ) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, HttpMakeSpan, (), HttpOnResponse>
    {
        TraceLayer::new_for_http()
            .make_span_with(HttpMakeSpan)
            .on_request(())
            .on_response(HttpOnResponse)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HttpMakeSpan;

impl MakeSpan<Body> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<Body>) -> Span {
        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            status = tracing::field::Empty,
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HttpOnResponse;

impl<B> OnResponse<B> for HttpOnResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        span.record("status", response.status().as_u16());
        tracing::info!(
            status = response.status().as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Request completed"
        );
    }
}
