//! Machine-payable HTTP over status 402.
//!
//! Servers answer unpaid requests with a `402 Payment Required` body
//! describing an SPL token payment ([`PaymentRequest`]). Clients settle it
//! on Solana and retry with a base64 [`PaymentAuthorization`] in the
//! `X-Payment-Authorization` header. This crate provides both sides:
//!
//! - [`PaymentGate`]: issues demands, verifies settlements on-chain,
//!   rejects replays, and runs a per-identity daily free allowance.
//! - [`X402Client`]: wraps [`reqwest`], intercepts 402s, and pays demands
//!   automatically within a configured spending ceiling.
//!
//! # Example
//!
//! ```rust,no_run
//! use openx402::{ClientConfig, SolanaChainProvider, SolanaWallet, X402Client};
//! use solana_sdk::signature::Keypair;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(SolanaChainProvider::new(
//!     "https://api.devnet.solana.com",
//!     Duration::from_secs(30),
//! ));
//! let wallet = SolanaWallet::new(provider, Arc::new(Keypair::new()));
//! let client = X402Client::new(Arc::new(wallet), ClientConfig::default());
//! let response = client.get("https://api.example.com/premium/data").await?;
//! # Ok(())
//! # }
//! ```

pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod network;
pub mod quota;
pub mod replay;
pub mod timestamp;
pub mod types;
pub mod util;

pub use chain::{
    PaymentSender, SolanaAddress, SolanaChainProvider, SolanaWallet, TransferExpectation,
    TransferVerifier,
};
pub use client::{FlowState, PaymentFlow, X402Client};
pub use config::{ClientConfig, ConfigError, GateConfig};
pub use error::{X402Error, X402Result};
pub use gate::PaymentGate;
pub use network::Network;
pub use quota::{CounterStore, MemoryCounterStore, QuotaLedger, QuotaStatus};
pub use replay::{ReplayGuard, SpentTransactionSet};
pub use timestamp::IsoTimestamp;
pub use types::{AssetType, PaymentAuthorization, PaymentRequest};
pub use util::{Base64Bytes, MoneyAmount, MoneyAmountParseError};
