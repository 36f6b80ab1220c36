//! The auto-paying HTTP client.
//!
//! [`X402Client`] wraps a [`reqwest::Client`] and drives the payment flow
//! end to end: request, intercept a 402, settle the demand on-chain within
//! the configured spending ceiling, and retry once with the authorization
//! header. [`PaymentFlow`] tracks where an attempt is in that lifecycle.

use crate::chain::PaymentSender;
use crate::config::ClientConfig;
use crate::error::{X402Error, X402Result};
use crate::types::{PaymentAuthorization, PaymentRequest};
#[cfg(test)]
use crate::util::MoneyAmount;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Where a payment attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No request in flight.
    Idle,
    /// The initial request has been sent.
    Requested,
    /// The server answered 402 with a payable demand.
    PaymentRequired,
    /// The demand is being settled on-chain.
    Paying,
    /// The request has been re-sent with an authorization header.
    Retried,
    /// The resource was served.
    Fulfilled,
    /// The attempt ended in an error.
    Failed,
}

/// A single request's progression through the payment lifecycle.
#[derive(Debug)]
pub struct PaymentFlow {
    state: FlowState,
}

impl PaymentFlow {
    pub fn new() -> Self {
        PaymentFlow {
            state: FlowState::Idle,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    fn advance(&mut self, next: FlowState) {
        debug!(from = ?self.state, to = ?next, "payment flow");
        self.state = next;
    }
}

impl Default for PaymentFlow {
    fn default() -> Self {
        Self::new()
    }
}

/// An HTTP client that settles 402 demands automatically.
#[derive(Clone)]
pub struct X402Client<S: PaymentSender> {
    http: reqwest::Client,
    sender: Arc<S>,
    config: ClientConfig,
}

impl<S: PaymentSender> X402Client<S> {
    pub fn new(sender: Arc<S>, config: ClientConfig) -> Self {
        X402Client {
            http: reqwest::Client::new(),
            sender,
            config,
        }
    }

    /// Reuses an existing [`reqwest::Client`] (connection pools, proxies).
    pub fn with_http(http: reqwest::Client, sender: Arc<S>, config: ClientConfig) -> Self {
        X402Client {
            http,
            sender,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// GET `url`, paying a 402 demand if one comes back.
    pub async fn get(&self, url: &str) -> X402Result<reqwest::Response> {
        self.request(Method::GET, url, None).await
    }

    /// POST `body` to `url`, paying a 402 demand if one comes back.
    pub async fn post(&self, url: &str, body: serde_json::Value) -> X402Result<reqwest::Response> {
        self.request(Method::POST, url, Some(body)).await
    }

    /// Sends a request, settling at most one payment for it.
    ///
    /// A second 402 (or a 403) after paying is terminal: the payment was
    /// made but refused, and retrying would double-spend nothing while
    /// still burning requests.
    #[instrument(skip(self, body), fields(%method, url))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> X402Result<reqwest::Response> {
        let mut flow = PaymentFlow::new();
        flow.advance(FlowState::Requested);
        let response = self.send(method.clone(), url, body.clone(), None).await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            flow.advance(FlowState::Fulfilled);
            return Ok(response);
        }

        flow.advance(FlowState::PaymentRequired);
        let request = Self::parse_payment_request(response).await?;
        debug!(
            payment_id = %request.payment_id,
            amount = %request.max_amount_required,
            "payment demanded"
        );

        flow.advance(FlowState::Paying);
        let authorization = match self.pay(&request).await {
            Ok(authorization) => authorization,
            Err(e) => {
                flow.advance(FlowState::Failed);
                return Err(e);
            }
        };

        flow.advance(FlowState::Retried);
        let retried = self
            .send(method, url, body, Some(&authorization))
            .await?;
        match retried.status() {
            StatusCode::PAYMENT_REQUIRED | StatusCode::FORBIDDEN => {
                flow.advance(FlowState::Failed);
                let body = retried.text().await.unwrap_or_default();
                warn!(payment_id = %request.payment_id, "payment was refused after settlement");
                Err(X402Error::PaymentVerificationFailed {
                    reason: format!(
                        "server refused the settled payment for {}: {body}",
                        request.payment_id
                    ),
                })
            }
            _ => {
                flow.advance(FlowState::Fulfilled);
                Ok(retried)
            }
        }
    }

    /// GET with a pre-built authorization, no automatic payment.
    pub async fn get_with_authorization(
        &self,
        url: &str,
        authorization: &PaymentAuthorization,
    ) -> X402Result<reqwest::Response> {
        self.send(Method::GET, url, None, Some(authorization)).await
    }

    /// POST with a pre-built authorization, no automatic payment.
    pub async fn post_with_authorization(
        &self,
        url: &str,
        body: serde_json::Value,
        authorization: &PaymentAuthorization,
    ) -> X402Result<reqwest::Response> {
        self.send(Method::POST, url, Some(body), Some(authorization))
            .await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
        authorization: Option<&PaymentAuthorization>,
    ) -> X402Result<reqwest::Response> {
        let mut builder = self.http.request(method, url);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        if let Some(authorization) = authorization {
            builder = builder.header(PaymentAuthorization::HEADER, authorization.to_header_value()?);
        }
        builder
            .send()
            .await
            .map_err(|e| X402Error::TransactionBroadcastFailed {
                reason: format!("http request failed: {e}"),
            })
    }

    /// Extracts the payment demand from a 402 response.
    pub async fn parse_payment_request(response: reqwest::Response) -> X402Result<PaymentRequest> {
        let body = response
            .bytes()
            .await
            .map_err(|e| X402Error::InvalidPaymentRequest {
                reason: format!("could not read 402 body: {e}"),
            })?;
        PaymentRequest::from_json_slice(&body)
    }

    /// Settles `request` on-chain and returns the authorization to retry
    /// with.
    ///
    /// Safety checks run strictly before any chain interaction: a demand
    /// above the spending ceiling or beyond the payer's balance produces
    /// an error without a single broadcast. Broadcasts themselves are
    /// retried with doubling backoff, but only for transient failures.
    #[instrument(skip(self, request), fields(payment_id = %request.payment_id))]
    pub async fn pay(&self, request: &PaymentRequest) -> X402Result<PaymentAuthorization> {
        if request.is_expired() {
            return Err(X402Error::PaymentExpired {
                request: Box::new(request.clone()),
            });
        }

        let amount = request.max_amount_required.clone();
        if amount > self.config.max_payment {
            return Err(X402Error::PaymentRequired {
                request: Box::new(request.clone()),
                reason: format!(
                    "demand of {amount} exceeds the spending ceiling of {}",
                    self.config.max_payment
                ),
            });
        }

        let available = self.sender.balance(&request.asset_address).await?;
        if available < amount {
            return Err(X402Error::InsufficientFunds {
                required: amount,
                available,
            });
        }

        let mut backoff = Duration::from_millis(self.config.broadcast_backoff_ms);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sender.send_payment(request, &amount).await {
                Ok(signature) => {
                    debug!(%signature, attempt, "payment settled");
                    return Ok(PaymentAuthorization::for_broadcast(
                        request,
                        amount,
                        self.sender.address(),
                        &signature,
                    ));
                }
                Err(e @ X402Error::TransactionBroadcastFailed { .. })
                    if attempt < self.config.max_broadcast_attempts =>
                {
                    warn!(attempt, error = %e, "broadcast failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
