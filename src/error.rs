//! The shared error taxonomy for payment flows.
//!
//! Every failure a caller can observe maps onto one of the six variants of
//! [`X402Error`]. Clients, wallets, verifiers, and server gates all speak
//! this vocabulary, so a ceiling breach looks the same whether it was
//! raised client-side or reported by a server.

use crate::types::PaymentRequest;
use crate::util::MoneyAmount;

/// Result alias used throughout the crate.
pub type X402Result<T> = Result<T, X402Error>;

/// Errors raised by payment flows.
#[derive(Debug, thiserror::Error)]
pub enum X402Error {
    /// A payment is required before the resource can be served, or an
    /// offered payment was refused before any funds moved (for example
    /// because it exceeds the client's spending ceiling).
    #[error("Payment required: {reason}")]
    PaymentRequired {
        /// The demand the server issued.
        request: Box<PaymentRequest>,
        reason: String,
    },

    /// The payment request's expiry window has passed.
    ///
    /// Retryable: the caller may fetch a fresh request and pay again.
    #[error("Payment request {} has expired", request.payment_id)]
    PaymentExpired { request: Box<PaymentRequest> },

    /// The payer's balance cannot cover the demanded amount.
    ///
    /// Raised before any transaction is broadcast.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: MoneyAmount,
        available: MoneyAmount,
    },

    /// A presented payment could not be verified on-chain.
    #[error("Payment verification failed: {reason}")]
    PaymentVerificationFailed { reason: String },

    /// A transaction could not be broadcast or confirmed.
    ///
    /// Retryable: the failure is transient (network, timeout) rather than a
    /// judgement on the payment itself.
    #[error("Transaction broadcast failed: {reason}")]
    TransactionBroadcastFailed { reason: String },

    /// A payment request or authorization was malformed.
    #[error("Invalid payment request: {reason}")]
    InvalidPaymentRequest { reason: String },
}

impl X402Error {
    /// A stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            X402Error::PaymentRequired { .. } => "PAYMENT_REQUIRED",
            X402Error::PaymentExpired { .. } => "PAYMENT_EXPIRED",
            X402Error::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            X402Error::PaymentVerificationFailed { .. } => "PAYMENT_VERIFICATION_FAILED",
            X402Error::TransactionBroadcastFailed { .. } => "TRANSACTION_BROADCAST_FAILED",
            X402Error::InvalidPaymentRequest { .. } => "INVALID_PAYMENT_REQUEST",
        }
    }

    /// Whether retrying the operation can plausibly succeed.
    ///
    /// Expired requests can be re-fetched and broadcast failures are
    /// transient. Everything else is terminal for the attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            X402Error::PaymentExpired { .. } | X402Error::TransactionBroadcastFailed { .. }
        )
    }

    /// The HTTP status a server should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            X402Error::PaymentRequired { .. } | X402Error::PaymentExpired { .. } => 402,
            X402Error::InsufficientFunds { .. } | X402Error::PaymentVerificationFailed { .. } => {
                403
            }
            X402Error::TransactionBroadcastFailed { .. } => 500,
            X402Error::InvalidPaymentRequest { .. } => 400,
        }
    }
}
