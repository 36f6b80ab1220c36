//! Configuration for gates and clients.
//!
//! [`GateConfig`] can be deserialized from any serde source or read from
//! `X402_*` environment variables. [`ClientConfig`] carries the client's
//! safety limits and defaults to conservative values.

use crate::chain::SolanaAddress;
use crate::network::Network;
use crate::util::MoneyAmount;
use serde::Deserialize;
use std::str::FromStr;
use url::Url;

/// A configuration value could not be read.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name))
}

fn parse_env<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name,
        reason: e.to_string(),
    })
}

/// Server-side settings for issuing demands and admitting payments.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Where payments must be sent (the owner address).
    pub payment_address: SolanaAddress,
    /// The SPL token mint payments must use.
    pub asset_address: SolanaAddress,
    /// The network payments must settle on.
    pub network: Network,
    /// The RPC endpoint used for verification.
    pub rpc_url: Url,
    /// Free requests per identity per UTC day.
    #[serde(default = "defaults::free_allowance")]
    pub free_allowance: u32,
    /// How long an issued demand stays payable, in seconds.
    #[serde(default = "defaults::expires_in_secs")]
    pub expires_in_secs: u64,
    /// Requests credited back per verified payment.
    #[serde(default = "defaults::grant_per_payment")]
    pub grant_per_payment: u32,
    /// Timeout for individual RPC calls, in seconds.
    #[serde(default = "defaults::rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

impl GateConfig {
    /// Reads configuration from `X402_*` environment variables.
    ///
    /// `X402_PAYMENT_ADDRESS`, `X402_ASSET_ADDRESS` and `X402_NETWORK`
    /// are required. `X402_RPC_URL` defaults to the network's public
    /// endpoint; the remaining variables default like the serde form.
    pub fn from_env() -> Result<Self, ConfigError> {
        let payment_address =
            parse_env("X402_PAYMENT_ADDRESS", &env_var("X402_PAYMENT_ADDRESS")?)?;
        let asset_address = parse_env("X402_ASSET_ADDRESS", &env_var("X402_ASSET_ADDRESS")?)?;
        let network: Network = parse_env("X402_NETWORK", &env_var("X402_NETWORK")?)?;
        let rpc_url = match std::env::var("X402_RPC_URL") {
            Ok(raw) => parse_env("X402_RPC_URL", &raw)?,
            Err(_) => Url::parse(network.default_rpc_url()).map_err(|e| {
                ConfigError::InvalidValue {
                    name: "X402_RPC_URL",
                    reason: e.to_string(),
                }
            })?,
        };
        let free_allowance = match std::env::var("X402_FREE_ALLOWANCE") {
            Ok(raw) => parse_env("X402_FREE_ALLOWANCE", &raw)?,
            Err(_) => defaults::free_allowance(),
        };
        let expires_in_secs = match std::env::var("X402_EXPIRES_IN_SECS") {
            Ok(raw) => parse_env("X402_EXPIRES_IN_SECS", &raw)?,
            Err(_) => defaults::expires_in_secs(),
        };
        let grant_per_payment = match std::env::var("X402_GRANT_PER_PAYMENT") {
            Ok(raw) => parse_env("X402_GRANT_PER_PAYMENT", &raw)?,
            Err(_) => defaults::grant_per_payment(),
        };
        let rpc_timeout_secs = match std::env::var("X402_RPC_TIMEOUT_SECS") {
            Ok(raw) => parse_env("X402_RPC_TIMEOUT_SECS", &raw)?,
            Err(_) => defaults::rpc_timeout_secs(),
        };
        Ok(GateConfig {
            payment_address,
            asset_address,
            network,
            rpc_url,
            free_allowance,
            expires_in_secs,
            grant_per_payment,
            rpc_timeout_secs,
        })
    }
}

/// Client-side safety limits.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// The most the client will ever pay for a single request.
    ///
    /// Demands above this ceiling are refused before any chain call.
    #[serde(default = "defaults::max_payment")]
    pub max_payment: MoneyAmount,
    /// Broadcast attempts per payment before giving up.
    #[serde(default = "defaults::max_broadcast_attempts")]
    pub max_broadcast_attempts: u32,
    /// Initial backoff between broadcast attempts, doubled each retry.
    #[serde(default = "defaults::broadcast_backoff_ms")]
    pub broadcast_backoff_ms: u64,
}

impl ClientConfig {
    /// A config with the default limits and the given spending ceiling.
    pub fn with_ceiling(max_payment: MoneyAmount) -> Self {
        ClientConfig {
            max_payment,
            ..Default::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            max_payment: defaults::max_payment(),
            max_broadcast_attempts: defaults::max_broadcast_attempts(),
            broadcast_backoff_ms: defaults::broadcast_backoff_ms(),
        }
    }
}

mod defaults {
    use crate::util::MoneyAmount;
    use rust_decimal::Decimal;

    pub fn free_allowance() -> u32 {
        10
    }

    pub fn expires_in_secs() -> u64 {
        300
    }

    pub fn grant_per_payment() -> u32 {
        1
    }

    pub fn rpc_timeout_secs() -> u64 {
        30
    }

    pub fn max_payment() -> MoneyAmount {
        MoneyAmount(Decimal::new(10, 0))
    }

    pub fn max_broadcast_attempts() -> u32 {
        3
    }

    pub fn broadcast_backoff_ms() -> u64 {
        500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_config_defaults_apply() {
        let config: GateConfig = serde_json::from_str(
            r#"{
                "payment_address": "So11111111111111111111111111111111111111112",
                "asset_address": "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU",
                "network": "solana-devnet",
                "rpc_url": "https://api.devnet.solana.com"
            }"#,
        )
        .unwrap();
        assert_eq!(config.free_allowance, 10);
        assert_eq!(config.expires_in_secs, 300);
        assert_eq!(config.grant_per_payment, 1);
        assert_eq!(config.rpc_timeout_secs, 30);
    }

    #[test]
    fn client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_payment, MoneyAmount::parse("10").unwrap());
        assert_eq!(config.max_broadcast_attempts, 3);
        assert_eq!(config.broadcast_backoff_ms, 500);
    }
}
