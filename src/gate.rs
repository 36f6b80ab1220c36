//! The server-side payment gate.
//!
//! A [`PaymentGate`] decides, per request, whether to serve for free
//! (quota headroom), demand payment (402 body), or admit a presented
//! payment after verifying it on-chain. It is framework-agnostic: an HTTP
//! handler feeds it the `X-Payment-Authorization` header value and maps
//! [`X402Error::http_status`] onto the response.

use crate::chain::{SolanaChainProvider, TransferExpectation, TransferVerifier};
use crate::config::GateConfig;
use crate::error::{X402Error, X402Result};
use crate::quota::{CounterStore, MemoryCounterStore, QuotaLedger, QuotaStatus};
use crate::replay::{ReplayGuard, SpentTransactionSet};
use crate::types::{PaymentAuthorization, PaymentRequest};
use crate::util::MoneyAmount;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Issues payment demands and admits settled payments.
pub struct PaymentGate<S: CounterStore = MemoryCounterStore> {
    config: GateConfig,
    verifier: Arc<dyn TransferVerifier>,
    quota: QuotaLedger<S>,
    spent: Arc<dyn ReplayGuard>,
}

impl PaymentGate<MemoryCounterStore> {
    /// A gate with in-memory quota and replay state, verifying against
    /// the configured RPC endpoint.
    pub fn new(config: GateConfig) -> Self {
        let provider = SolanaChainProvider::new(
            config.rpc_url.as_str(),
            Duration::from_secs(config.rpc_timeout_secs),
        );
        Self::with_verifier(config, Arc::new(provider))
    }

    /// A gate with in-memory state and a custom verifier.
    pub fn with_verifier(config: GateConfig, verifier: Arc<dyn TransferVerifier>) -> Self {
        let quota = QuotaLedger::new(config.free_allowance);
        PaymentGate {
            config,
            verifier,
            quota,
            spent: Arc::new(SpentTransactionSet::new()),
        }
    }
}

impl<S: CounterStore> PaymentGate<S> {
    /// A gate over external quota and replay stores.
    pub fn with_stores(
        config: GateConfig,
        verifier: Arc<dyn TransferVerifier>,
        store: S,
        spent: Arc<dyn ReplayGuard>,
    ) -> Self {
        let quota = QuotaLedger::with_store(store, config.free_allowance);
        PaymentGate {
            config,
            verifier,
            quota,
            spent,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Builds the demand for a protected resource.
    pub fn issue_demand(
        &self,
        amount: MoneyAmount,
        resource: &str,
        description: &str,
    ) -> PaymentRequest {
        PaymentRequest::new(
            amount,
            self.config.asset_address,
            self.config.payment_address,
            self.config.network,
            resource,
            description,
            Duration::from_secs(self.config.expires_in_secs),
        )
    }

    /// Whether `identity` may be served without payment right now.
    pub fn admit(&self, identity: &str) -> QuotaStatus {
        self.quota.check_and_consume(identity)
    }

    /// Records a served request against `identity`'s daily counter.
    pub fn record_usage(&self, identity: &str) {
        self.quota.record_usage(identity);
    }

    /// Verifies a presented `X-Payment-Authorization` header value.
    ///
    /// On success the settlement transaction is marked spent, the payer's
    /// quota (if `identity` is known) is credited, and the decoded
    /// authorization is returned so the handler can log or echo it.
    ///
    /// # Errors
    ///
    /// - [`X402Error::InvalidPaymentRequest`] for malformed headers (400)
    /// - [`X402Error::PaymentVerificationFailed`] for mismatched,
    ///   unconfirmed, or replayed payments (403)
    #[instrument(skip(self, header_value, identity))]
    pub async fn accept_authorization(
        &self,
        header_value: &str,
        required_amount: &MoneyAmount,
        identity: Option<&str>,
    ) -> X402Result<PaymentAuthorization> {
        let authorization = PaymentAuthorization::from_header(header_value)?;

        if authorization.payment_address != self.config.payment_address {
            return Err(X402Error::PaymentVerificationFailed {
                reason: "payment sent to the wrong address".into(),
            });
        }
        if authorization.asset_address != self.config.asset_address {
            return Err(X402Error::PaymentVerificationFailed {
                reason: "payment used the wrong asset".into(),
            });
        }
        if authorization.network != self.config.network {
            return Err(X402Error::PaymentVerificationFailed {
                reason: "payment settled on the wrong network".into(),
            });
        }
        if !crate::chain::amount_within_tolerance(&authorization.actual_amount, required_amount) {
            return Err(X402Error::PaymentVerificationFailed {
                reason: format!(
                    "claimed amount {} is below the required {required_amount}",
                    authorization.actual_amount
                ),
            });
        }

        let transaction_ref = authorization.transaction_hash.as_deref().ok_or_else(|| {
            X402Error::PaymentVerificationFailed {
                reason: "authorization carries no transaction reference".into(),
            }
        })?;

        if self.spent.is_spent(transaction_ref) {
            warn!(transaction_ref, "replayed payment rejected");
            return Err(X402Error::PaymentVerificationFailed {
                reason: "transaction has already been redeemed".into(),
            });
        }

        let expected = TransferExpectation {
            pay_to: self.config.payment_address,
            asset: self.config.asset_address,
            amount: required_amount.clone(),
        };
        let confirmed = self
            .verifier
            .verify_transfer(transaction_ref, &expected)
            .await?;
        if !confirmed {
            return Err(X402Error::PaymentVerificationFailed {
                reason: "transaction is not yet confirmed on-chain".into(),
            });
        }

        // Check-and-insert is atomic; a concurrent presentation of the
        // same transaction loses here even after both verified.
        if !self.spent.mark_spent(transaction_ref) {
            warn!(transaction_ref, "replayed payment rejected");
            return Err(X402Error::PaymentVerificationFailed {
                reason: "transaction has already been redeemed".into(),
            });
        }

        if let Some(identity) = identity {
            self.quota
                .grant_allowance(identity, self.config.grant_per_payment);
        }

        debug!(
            payment_id = %authorization.payment_id,
            payer = %authorization.public_key,
            "payment accepted"
        );
        Ok(authorization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticVerifier {
        outcome: X402Result<bool>,
        calls: AtomicU32,
    }

    impl StaticVerifier {
        fn confirming() -> Arc<Self> {
            Arc::new(StaticVerifier {
                outcome: Ok(true),
                calls: AtomicU32::new(0),
            })
        }

        fn pending() -> Arc<Self> {
            Arc::new(StaticVerifier {
                outcome: Ok(false),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl TransferVerifier for StaticVerifier {
        async fn verify_transfer(
            &self,
            _transaction_ref: &str,
            _expected: &TransferExpectation,
        ) -> X402Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Ok(confirmed) => Ok(*confirmed),
                Err(_) => Err(X402Error::PaymentVerificationFailed {
                    reason: "forced".into(),
                }),
            }
        }
    }

    fn config() -> GateConfig {
        serde_json::from_str(
            r#"{
                "payment_address": "So11111111111111111111111111111111111111112",
                "asset_address": "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU",
                "network": "solana-devnet",
                "rpc_url": "https://api.devnet.solana.com",
                "free_allowance": 2
            }"#,
        )
        .unwrap()
    }

    fn money(s: &str) -> MoneyAmount {
        MoneyAmount::parse(s).unwrap()
    }

    fn header_for(gate: &PaymentGate, amount: &str, tx: &str) -> String {
        let request = gate.issue_demand(money(amount), "/premium", "premium");
        let authorization = PaymentAuthorization::for_broadcast(
            &request,
            money(amount),
            "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"
                .parse()
                .unwrap(),
            tx,
        );
        authorization.to_header_value().unwrap()
    }

    #[tokio::test]
    async fn accepts_verified_payment_and_credits_quota() {
        let gate = PaymentGate::with_verifier(config(), StaticVerifier::confirming());
        gate.record_usage("alice");
        gate.record_usage("alice");
        assert!(!gate.admit("alice").allowed);

        let header = header_for(&gate, "0.10", "tx-accept");
        let accepted = gate
            .accept_authorization(&header, &money("0.10"), Some("alice"))
            .await
            .unwrap();
        assert_eq!(accepted.actual_amount, money("0.10"));
        assert!(gate.admit("alice").allowed);
    }

    #[tokio::test]
    async fn rejects_replayed_transaction() {
        let gate = PaymentGate::with_verifier(config(), StaticVerifier::confirming());
        let header = header_for(&gate, "0.10", "tx-replay");
        gate.accept_authorization(&header, &money("0.10"), None)
            .await
            .unwrap();
        let err = gate
            .accept_authorization(&header, &money("0.10"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, X402Error::PaymentVerificationFailed { .. }));
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn unconfirmed_transaction_is_a_403_without_spending() {
        let verifier = StaticVerifier::pending();
        let gate = PaymentGate::with_verifier(config(), verifier.clone());
        let header = header_for(&gate, "0.10", "tx-pending");
        let err = gate
            .accept_authorization(&header, &money("0.10"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, X402Error::PaymentVerificationFailed { .. }));
        // A later retry must still be possible once the transaction lands.
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejects_underpayment_before_any_rpc_call() {
        let verifier = StaticVerifier::confirming();
        let gate = PaymentGate::with_verifier(config(), verifier.clone());
        let header = header_for(&gate, "0.05", "tx-short");
        let err = gate
            .accept_authorization(&header, &money("0.10"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, X402Error::PaymentVerificationFailed { .. }));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_wrong_payee_and_malformed_header() {
        let gate = PaymentGate::with_verifier(config(), StaticVerifier::confirming());

        let mut wrong = config();
        wrong.payment_address = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"
            .parse()
            .unwrap();
        let other_gate = PaymentGate::with_verifier(wrong, StaticVerifier::confirming());
        let header = header_for(&other_gate, "0.10", "tx-payee");
        let err = gate
            .accept_authorization(&header, &money("0.10"), None)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 403);

        let err = gate
            .accept_authorization("!!not-base64!!", &money("0.10"), None)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn issued_demand_reflects_config() {
        let gate = PaymentGate::with_verifier(config(), StaticVerifier::confirming());
        let demand = gate.issue_demand(money("0.25"), "/reports/latest", "latest report");
        assert_eq!(demand.network, Network::SolanaDevnet);
        assert_eq!(demand.payment_address, gate.config().payment_address);
        assert_eq!(demand.max_amount_required, money("0.25"));
        assert!(!demand.is_expired());
        assert_eq!(demand.nonce.len(), 64);
    }
}
