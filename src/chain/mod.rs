//! On-chain settlement: addresses, verification and payment seams.
//!
//! The traits here are the boundary between the protocol engine and the
//! Solana RPC layer. [`TransferVerifier`] is what a server gate needs to
//! check a presented payment, and [`PaymentSender`] is what a client needs
//! to make one. The concrete RPC-backed implementations live in
//! [`solana`].

pub mod solana;

use crate::error::X402Result;
use crate::types::PaymentRequest;
use crate::util::MoneyAmount;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use solana_sdk::pubkey::Pubkey;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub use solana::{SolanaChainProvider, SolanaWallet};

/// A Solana account address, serialized as base58.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SolanaAddress(pub Pubkey);

impl SolanaAddress {
    /// The underlying public key.
    pub fn pubkey(&self) -> Pubkey {
        self.0
    }
}

impl From<Pubkey> for SolanaAddress {
    fn from(value: Pubkey) -> Self {
        Self(value)
    }
}

impl From<SolanaAddress> for Pubkey {
    fn from(value: SolanaAddress) -> Self {
        value.0
    }
}

impl FromStr for SolanaAddress {
    type Err = solana_sdk::pubkey::ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pubkey::from_str(s).map(SolanaAddress)
    }
}

impl Display for SolanaAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SolanaAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for SolanaAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SolanaAddress::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// What an on-chain transfer must look like to settle a payment.
#[derive(Debug, Clone)]
pub struct TransferExpectation {
    /// The recipient's owner address (not the token account).
    pub pay_to: SolanaAddress,
    /// The SPL token mint the payment must use.
    pub asset: SolanaAddress,
    /// The amount demanded, in human-denominated units.
    pub amount: MoneyAmount,
}

/// Whether `actual` satisfies `expected` under the settlement tolerance.
///
/// Transfers within 1% below the demanded amount are accepted, absorbing
/// rounding drift between decimal amounts and integer token units.
pub fn amount_within_tolerance(actual: &MoneyAmount, expected: &MoneyAmount) -> bool {
    actual.inner() >= expected.inner() * Decimal::new(99, 2)
}

/// Checks that a referenced transaction settles an expected transfer.
#[async_trait]
pub trait TransferVerifier: Send + Sync {
    /// Verifies the transaction named by `transaction_ref` against
    /// `expected`.
    ///
    /// Returns `Ok(true)` when the transaction is confirmed and carries a
    /// matching transfer, and `Ok(false)` when the transaction is not yet
    /// visible on-chain (the caller may retry later). A confirmed
    /// transaction that does not match `expected` is an error, not a
    /// retryable miss.
    async fn verify_transfer(
        &self,
        transaction_ref: &str,
        expected: &TransferExpectation,
    ) -> X402Result<bool>;
}

/// A funded identity that can settle payment requests on-chain.
#[async_trait]
pub trait PaymentSender: Send + Sync {
    /// The payer's address.
    fn address(&self) -> SolanaAddress;

    /// The payer's balance of the given mint, in human-denominated units.
    async fn balance(&self, mint: &SolanaAddress) -> X402Result<MoneyAmount>;

    /// Pays `amount` toward `request` and returns the transaction
    /// signature once the transfer is confirmed.
    async fn send_payment(&self, request: &PaymentRequest, amount: &MoneyAmount)
        -> X402Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> MoneyAmount {
        MoneyAmount::parse(s).unwrap()
    }

    #[test]
    fn tolerance_accepts_one_percent_shortfall() {
        let expected = money("0.10");
        assert!(amount_within_tolerance(&money("0.10"), &expected));
        assert!(amount_within_tolerance(&money("0.099"), &expected));
        assert!(amount_within_tolerance(&money("0.25"), &expected));
    }

    #[test]
    fn tolerance_rejects_larger_shortfall() {
        let expected = money("0.10");
        assert!(!amount_within_tolerance(&money("0.098"), &expected));
        assert!(!amount_within_tolerance(&money("0.05"), &expected));
        assert!(!amount_within_tolerance(&MoneyAmount::ZERO, &expected));
    }

    #[test]
    fn address_serde_base58() {
        let address: SolanaAddress = "So11111111111111111111111111111111111111112"
            .parse()
            .unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, "\"So11111111111111111111111111111111111111112\"");
        let back: SolanaAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(address, back);
    }
}
