//! Core trait defining the verification and settlement interface for x402 facilitators.
//!
//! Implementors validate incoming payment payloads against payment requirements
//! ([`Facilitator::verify`]) and submit the authorized transaction to the ledger
//! ([`Facilitator::settle`]).

use crate::types::{
    SettleRequest, SettleResponse, SupportedPaymentKindsResponse, VerifyRequest, VerifyResponse,
};
use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::Arc;

/// Trait defining the asynchronous interface for x402 payment facilitators.
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Verifies a proposed x402 payment payload against a [`VerifyRequest`].
    ///
    /// An invalid payment is a successful call returning an invalid [`VerifyResponse`].
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] only when verification could not be carried out.
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    /// Submits the payment carried by a [`SettleRequest`] and waits for the ledger outcome.
    ///
    /// The payment is re-verified first. Repeated calls for the same transaction envelope
    /// return the first terminal result without submitting again.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] when settlement could not be attempted.
    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;

    fn supported(
        &self,
    ) -> impl Future<Output = Result<SupportedPaymentKindsResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<SupportedPaymentKindsResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
