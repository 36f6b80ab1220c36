//! Payment contract wire types.
//!
//! A [`PaymentRequest`] is the demand a server returns in a 402 response
//! body. A [`PaymentAuthorization`] is the proof of settlement a client
//! sends back, base64-encoded, in the `X-Payment-Authorization` header.
//! Both serialize as snake_case JSON.

use crate::chain::SolanaAddress;
use crate::error::{X402Error, X402Result};
use crate::network::Network;
use crate::timestamp::IsoTimestamp;
use crate::util::{Base64Bytes, MoneyAmount};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// The kind of asset a payment settles in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetType {
    /// An SPL token on Solana.
    #[serde(rename = "SPL")]
    Spl,
}

/// A server's demand for payment, returned as the JSON body of a 402.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Unique id for this demand. Echoed back in the authorization.
    pub payment_id: String,
    /// The resource path the demand protects.
    pub resource: String,
    /// Human-readable description of what is being bought. Optional on
    /// the wire; absent decodes as empty.
    #[serde(default)]
    pub description: String,
    /// The most the server will charge for this request.
    pub max_amount_required: MoneyAmount,
    /// Asset kind. Always SPL for Solana settlement.
    pub asset_type: AssetType,
    /// The SPL token mint payments must use.
    pub asset_address: SolanaAddress,
    /// The recipient's owner address.
    pub payment_address: SolanaAddress,
    /// The network the payment must settle on.
    pub network: Network,
    /// When this demand stops being payable.
    pub expires_at: IsoTimestamp,
    /// Random value binding authorizations to this demand.
    pub nonce: String,
}

impl PaymentRequest {
    /// Builds a fresh demand with a random `payment_id` and nonce,
    /// expiring `expires_in` from now.
    pub fn new(
        max_amount_required: MoneyAmount,
        asset_address: SolanaAddress,
        payment_address: SolanaAddress,
        network: Network,
        resource: impl Into<String>,
        description: impl Into<String>,
        expires_in: Duration,
    ) -> Self {
        let nonce: [u8; 32] = rand::rng().random();
        PaymentRequest {
            payment_id: Uuid::new_v4().to_string(),
            resource: resource.into(),
            description: description.into(),
            max_amount_required,
            asset_type: AssetType::Spl,
            asset_address,
            payment_address,
            network,
            expires_at: IsoTimestamp::now().plus(expires_in),
            nonce: hex::encode(nonce),
        }
    }

    /// `true` if the demand can no longer be paid.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(IsoTimestamp::now())
    }

    /// Expiry check against an explicit clock, for deterministic tests.
    pub fn is_expired_at(&self, now: IsoTimestamp) -> bool {
        self.expires_at.is_past_at(now)
    }

    /// Serializes to the 402 response body JSON.
    pub fn to_json(&self) -> X402Result<String> {
        serde_json::to_string(self).map_err(|e| X402Error::InvalidPaymentRequest {
            reason: format!("failed to encode payment request: {e}"),
        })
    }

    /// Parses a 402 response body.
    pub fn from_json(json: &str) -> X402Result<Self> {
        Self::from_json_slice(json.as_bytes())
    }

    /// Parses a 402 response body from raw bytes.
    pub fn from_json_slice(json: &[u8]) -> X402Result<Self> {
        serde_json::from_slice(json).map_err(|e| X402Error::InvalidPaymentRequest {
            reason: format!("malformed payment request: {e}"),
        })
    }
}

/// Proof that a payment request was settled on-chain.
///
/// Travels base64-encoded in the `X-Payment-Authorization` request header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAuthorization {
    /// The `payment_id` of the demand this settles.
    pub payment_id: String,
    /// The amount actually transferred.
    pub actual_amount: MoneyAmount,
    /// The recipient's owner address, copied from the demand.
    pub payment_address: SolanaAddress,
    /// The SPL token mint used, copied from the demand.
    pub asset_address: SolanaAddress,
    /// The network the payment settled on.
    pub network: Network,
    /// When the client produced this authorization.
    pub timestamp: IsoTimestamp,
    /// The settlement signature. For Solana this is the transaction
    /// signature in base58.
    pub signature: String,
    /// The payer's address.
    pub public_key: SolanaAddress,
    /// The on-chain transaction reference, when already broadcast.
    pub transaction_hash: Option<String>,
}

impl PaymentAuthorization {
    /// The request header authorizations travel in.
    pub const HEADER: &'static str = "X-Payment-Authorization";

    /// Builds the authorization for a broadcast transaction.
    pub fn for_broadcast(
        request: &PaymentRequest,
        amount: MoneyAmount,
        payer: SolanaAddress,
        transaction_signature: &str,
    ) -> Self {
        PaymentAuthorization {
            payment_id: request.payment_id.clone(),
            actual_amount: amount,
            payment_address: request.payment_address,
            asset_address: request.asset_address,
            network: request.network,
            timestamp: IsoTimestamp::now(),
            signature: transaction_signature.to_string(),
            public_key: payer,
            transaction_hash: Some(transaction_signature.to_string()),
        }
    }

    /// Encodes to the base64 header value.
    pub fn to_header_value(&self) -> X402Result<String> {
        let json = serde_json::to_vec(self).map_err(|e| X402Error::InvalidPaymentRequest {
            reason: format!("failed to encode payment authorization: {e}"),
        })?;
        Ok(Base64Bytes::encode(&json).to_string())
    }

    /// Decodes a base64 header value.
    pub fn from_header(value: &str) -> X402Result<Self> {
        let bytes =
            Base64Bytes::from(value)
                .decode()
                .map_err(|e| X402Error::InvalidPaymentRequest {
                    reason: format!("payment authorization is not valid base64: {e}"),
                })?;
        serde_json::from_slice(&bytes).map_err(|e| X402Error::InvalidPaymentRequest {
            reason: format!("malformed payment authorization: {e}"),
        })
    }
}

#[cfg(test)]
impl PaymentRequest {
    /// A fixed demand for tests.
    pub fn sample() -> Self {
        PaymentRequest::new(
            MoneyAmount::parse("0.10").unwrap(),
            "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU"
                .parse()
                .unwrap(),
            "So11111111111111111111111111111111111111112"
                .parse()
                .unwrap(),
            Network::SolanaDevnet,
            "/premium/data",
            "Premium data access",
            Duration::from_secs(300),
        )
    }
}
