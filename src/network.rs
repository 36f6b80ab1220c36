//! Supported settlement networks.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A Solana network a payment can settle on.
///
/// Serialized as the lowercase wire name, e.g. `"solana-devnet"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    #[serde(rename = "solana-mainnet")]
    SolanaMainnet,
    #[serde(rename = "solana-devnet")]
    SolanaDevnet,
    #[serde(rename = "solana-testnet")]
    SolanaTestnet,
}

impl Network {
    /// All known network variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::SolanaMainnet,
            Network::SolanaDevnet,
            Network::SolanaTestnet,
        ]
    }

    /// The public RPC endpoint for this network.
    ///
    /// Production deployments should configure a dedicated RPC URL instead;
    /// the public endpoints are rate-limited.
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::SolanaMainnet => "https://api.mainnet-beta.solana.com",
            Network::SolanaDevnet => "https://api.devnet.solana.com",
            Network::SolanaTestnet => "https://api.testnet.solana.com",
        }
    }
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Network::SolanaMainnet => "solana-mainnet",
            Network::SolanaDevnet => "solana-devnet",
            Network::SolanaTestnet => "solana-testnet",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solana-mainnet" => Ok(Network::SolanaMainnet),
            "solana-devnet" => Ok(Network::SolanaDevnet),
            "solana-testnet" => Ok(Network::SolanaTestnet),
            other => Err(format!("unknown network: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for network in Network::variants() {
            let json = serde_json::to_string(network).unwrap();
            let back: Network = serde_json::from_str(&json).unwrap();
            assert_eq!(*network, back);
            assert_eq!(json, format!("\"{network}\""));
            assert_eq!(network.to_string().parse::<Network>().unwrap(), *network);
        }
    }

    #[test]
    fn unknown_network_rejected() {
        assert!("solana-localnet".parse::<Network>().is_err());
        assert!(serde_json::from_str::<Network>("\"base-sepolia\"").is_err());
    }
}
