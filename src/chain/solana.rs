//! Solana RPC-backed verification and settlement.
//!
//! [`SolanaChainProvider`] wraps a nonblocking RPC client and implements
//! [`TransferVerifier`] by fetching the referenced transaction and checking
//! it carries a matching `TransferChecked` instruction.
//! [`SolanaWallet`] pairs a provider with a keypair and implements
//! [`PaymentSender`] by building and broadcasting the transfer itself.

use crate::chain::{
    amount_within_tolerance, PaymentSender, SolanaAddress, TransferExpectation, TransferVerifier,
};
use crate::error::{X402Error, X402Result};
use crate::network::Network;
use crate::types::PaymentRequest;
use crate::util::MoneyAmount;
use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::instruction::CompiledInstruction;
use solana_sdk::message::VersionedMessage;
use solana_sdk::program_pack::Pack;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::UiTransactionEncoding;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use spl_token::instruction::TokenInstruction;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// RPC access to a Solana cluster, with a per-call timeout.
#[derive(Clone)]
pub struct SolanaChainProvider {
    rpc: Arc<RpcClient>,
    rpc_timeout: Duration,
}

/// Whether the endpoint answered and the error is about the requested
/// data rather than the transport.
///
/// A missing account or unknown signature comes back as an RPC response
/// error (or a null result the client fails to deserialize). Connection,
/// I/O, and timeout failures do not, and must stay in the retryable
/// broadcast-failure class instead of reading as "absent".
fn endpoint_answered(e: &ClientError) -> bool {
    matches!(
        e.kind(),
        ClientErrorKind::RpcError(_) | ClientErrorKind::SerdeJson(_)
    )
}

/// A decoded `TransferChecked` pulled out of a confirmed transaction.
struct ObservedTransfer {
    mint: Pubkey,
    destination: Pubkey,
    amount: u64,
    decimals: u8,
}

impl SolanaChainProvider {
    /// Connects to the given RPC endpoint at confirmed commitment.
    pub fn new(rpc_url: impl Into<String>, rpc_timeout: Duration) -> Self {
        let rpc = RpcClient::new_with_commitment(rpc_url.into(), CommitmentConfig::confirmed());
        SolanaChainProvider {
            rpc: Arc::new(rpc),
            rpc_timeout,
        }
    }

    /// Connects to the network's public RPC endpoint.
    pub fn for_network(network: Network, rpc_timeout: Duration) -> Self {
        Self::new(network.default_rpc_url(), rpc_timeout)
    }

    async fn with_timeout<T, F>(&self, what: &str, fut: F) -> X402Result<T>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        match tokio::time::timeout(self.rpc_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(X402Error::TransactionBroadcastFailed {
                reason: format!("{what}: {e}"),
            }),
            Err(_) => Err(X402Error::TransactionBroadcastFailed {
                reason: format!("{what}: timed out after {:?}", self.rpc_timeout),
            }),
        }
    }

    /// The owner's balance of `mint`, in human-denominated units.
    ///
    /// A missing associated token account reads as zero.
    pub async fn token_balance(
        &self,
        owner: &SolanaAddress,
        mint: &SolanaAddress,
    ) -> X402Result<MoneyAmount> {
        let ata = get_associated_token_address(&owner.0, &mint.0);
        let fetched = tokio::time::timeout(self.rpc_timeout, self.rpc.get_token_account_balance(&ata))
            .await
            .map_err(|_| X402Error::TransactionBroadcastFailed {
                reason: format!("balance lookup: timed out after {:?}", self.rpc_timeout),
            })?;
        let balance = match fetched {
            Ok(balance) => balance,
            Err(e) if endpoint_answered(&e) => {
                // The ATA simply does not exist yet.
                debug!(%owner, %mint, error = %e, "no token account, treating balance as zero");
                return Ok(MoneyAmount::ZERO);
            }
            Err(e) => {
                return Err(X402Error::TransactionBroadcastFailed {
                    reason: format!("balance lookup: {e}"),
                });
            }
        };
        let units = balance
            .amount
            .parse::<u64>()
            .map_err(|e| X402Error::TransactionBroadcastFailed {
                reason: format!("balance lookup returned non-numeric amount: {e}"),
            })?;
        Ok(MoneyAmount::from_token_units(units, balance.decimals as u32))
    }

    /// Fetches the decimal places of an SPL mint.
    pub async fn mint_decimals(&self, mint: &SolanaAddress) -> X402Result<u8> {
        let account = self
            .with_timeout("mint lookup", self.rpc.get_account(&mint.0))
            .await?;
        let state = spl_token::state::Mint::unpack(&account.data).map_err(|e| {
            X402Error::PaymentVerificationFailed {
                reason: format!("{mint} is not an SPL token mint: {e}"),
            }
        })?;
        Ok(state.decimals)
    }
}

/// Scans compiled instructions for a `TransferChecked` against the token
/// program and resolves its mint and destination accounts.
fn find_transfer_checked(
    account_keys: &[Pubkey],
    instructions: &[CompiledInstruction],
) -> Option<ObservedTransfer> {
    for ix in instructions {
        let Some(program_id) = account_keys.get(ix.program_id_index as usize) else {
            continue;
        };
        if *program_id != spl_token::id() {
            continue;
        }
        let Ok(TokenInstruction::TransferChecked { amount, decimals }) =
            TokenInstruction::unpack(&ix.data)
        else {
            continue;
        };
        // TransferChecked account order: source, mint, destination, authority.
        // A candidate with a short or dangling account list is skipped, not
        // fatal for the scan.
        let (Some(mint_index), Some(destination_index)) = (ix.accounts.get(1), ix.accounts.get(2))
        else {
            continue;
        };
        let (Some(mint), Some(destination)) = (
            account_keys.get(*mint_index as usize),
            account_keys.get(*destination_index as usize),
        ) else {
            continue;
        };
        return Some(ObservedTransfer {
            mint: *mint,
            destination: *destination,
            amount,
            decimals,
        });
    }
    None
}

#[async_trait]
impl TransferVerifier for SolanaChainProvider {
    #[instrument(skip(self, expected), fields(pay_to = %expected.pay_to, amount = %expected.amount))]
    async fn verify_transfer(
        &self,
        transaction_ref: &str,
        expected: &TransferExpectation,
    ) -> X402Result<bool> {
        let signature = Signature::from_str(transaction_ref).map_err(|e| {
            X402Error::PaymentVerificationFailed {
                reason: format!("malformed transaction reference: {e}"),
            }
        })?;

        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let fetched = tokio::time::timeout(
            self.rpc_timeout,
            self.rpc.get_transaction_with_config(&signature, config),
        )
        .await
        .map_err(|_| X402Error::TransactionBroadcastFailed {
            reason: format!(
                "transaction lookup: timed out after {:?}",
                self.rpc_timeout
            ),
        })?;

        let confirmed = match fetched {
            Ok(confirmed) => confirmed,
            Err(e) if endpoint_answered(&e) => {
                // Unknown signature means not yet confirmed; let the caller retry.
                debug!(%signature, error = %e, "transaction not yet visible on-chain");
                return Ok(false);
            }
            Err(e) => {
                return Err(X402Error::TransactionBroadcastFailed {
                    reason: format!("transaction lookup: {e}"),
                });
            }
        };

        if let Some(meta) = &confirmed.transaction.meta {
            if let Some(err) = &meta.err {
                return Err(X402Error::PaymentVerificationFailed {
                    reason: format!("transaction {signature} failed on-chain: {err}"),
                });
            }
        }

        let transaction = confirmed.transaction.transaction.decode().ok_or_else(|| {
            X402Error::PaymentVerificationFailed {
                reason: format!("transaction {signature} could not be decoded"),
            }
        })?;
        let message: &VersionedMessage = &transaction.message;
        let transfer = find_transfer_checked(message.static_account_keys(), message.instructions())
            .ok_or_else(|| X402Error::PaymentVerificationFailed {
                reason: format!("transaction {signature} carries no token transfer"),
            })?;

        if transfer.mint != expected.asset.0 {
            return Err(X402Error::PaymentVerificationFailed {
                reason: format!(
                    "transfer used mint {}, demand requires {}",
                    transfer.mint, expected.asset
                ),
            });
        }

        let expected_destination = get_associated_token_address(&expected.pay_to.0, &transfer.mint);
        if transfer.destination != expected_destination {
            return Err(X402Error::PaymentVerificationFailed {
                reason: format!(
                    "transfer paid {}, demand requires {}",
                    transfer.destination, expected_destination
                ),
            });
        }

        let paid = MoneyAmount::from_token_units(transfer.amount, transfer.decimals as u32);
        if !amount_within_tolerance(&paid, &expected.amount) {
            return Err(X402Error::PaymentVerificationFailed {
                reason: format!("transfer of {paid} is below the demanded {}", expected.amount),
            });
        }

        debug!(%signature, %paid, "transfer verified");
        Ok(true)
    }
}

/// A keypair-backed payer on a Solana cluster.
#[derive(Clone)]
pub struct SolanaWallet {
    provider: Arc<SolanaChainProvider>,
    keypair: Arc<Keypair>,
}

impl SolanaWallet {
    pub fn new(provider: Arc<SolanaChainProvider>, keypair: Arc<Keypair>) -> Self {
        SolanaWallet { provider, keypair }
    }

    /// The provider this wallet broadcasts through.
    pub fn provider(&self) -> &SolanaChainProvider {
        &self.provider
    }
}

#[async_trait]
impl PaymentSender for SolanaWallet {
    fn address(&self) -> SolanaAddress {
        SolanaAddress(self.keypair.pubkey())
    }

    async fn balance(&self, mint: &SolanaAddress) -> X402Result<MoneyAmount> {
        self.provider.token_balance(&self.address(), mint).await
    }

    #[instrument(skip(self, request), fields(payment_id = %request.payment_id, %amount))]
    async fn send_payment(
        &self,
        request: &PaymentRequest,
        amount: &MoneyAmount,
    ) -> X402Result<String> {
        if request.is_expired() {
            return Err(X402Error::PaymentExpired {
                request: Box::new(request.clone()),
            });
        }

        let payer = self.keypair.pubkey();
        let mint = request.asset_address.0;
        let recipient = request.payment_address.0;

        let decimals = self.provider.mint_decimals(&request.asset_address).await?;
        let units =
            amount
                .as_token_units(decimals as u32)
                .map_err(|e| X402Error::InvalidPaymentRequest {
                    reason: format!("amount {amount} does not fit the token: {e}"),
                })?;

        let source = get_associated_token_address(&payer, &mint);
        let destination = get_associated_token_address(&recipient, &mint);

        let create_destination =
            create_associated_token_account_idempotent(&payer, &recipient, &mint, &spl_token::id());
        let transfer = spl_token::instruction::transfer_checked(
            &spl_token::id(),
            &source,
            &mint,
            &destination,
            &payer,
            &[],
            units,
            decimals,
        )
        .map_err(|e| X402Error::TransactionBroadcastFailed {
            reason: format!("failed to build transfer instruction: {e}"),
        })?;

        let blockhash = self
            .provider
            .with_timeout("blockhash", self.provider.rpc.get_latest_blockhash())
            .await?;
        let transaction = Transaction::new_signed_with_payer(
            &[create_destination, transfer],
            Some(&payer),
            &[self.keypair.as_ref()],
            blockhash,
        );

        let signature = self
            .provider
            .with_timeout(
                "broadcast",
                self.provider.rpc.send_and_confirm_transaction(&transaction),
            )
            .await?;

        debug!(%signature, "payment confirmed");
        Ok(signature.to_string())
    }
}
