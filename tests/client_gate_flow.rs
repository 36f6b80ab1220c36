//! End-to-end flow over real HTTP: an axum server gates a resource with
//! quota plus payment, and the client pays a 402 demand automatically.
//! The chain is mocked with a shared ledger of broadcast signatures, so
//! the gate only confirms payments the wallet actually made.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dashmap::DashSet;
use openx402::{
    ClientConfig, GateConfig, MoneyAmount, PaymentAuthorization, PaymentGate, PaymentRequest,
    PaymentSender, SolanaAddress, TransferExpectation, TransferVerifier, X402Client, X402Error,
    X402Result,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const PAYER: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
const PRICE: &str = "0.10";
const IDENTITY: &str = "it-client";

/// Stands in for a Solana cluster: the wallet records what it broadcast
/// and the verifier only confirms those signatures.
struct MockChain {
    balance: MoneyAmount,
    broadcast: DashSet<String>,
    sequence: AtomicU32,
}

impl MockChain {
    fn funded(balance: &str) -> Arc<Self> {
        Arc::new(MockChain {
            balance: MoneyAmount::parse(balance).unwrap(),
            broadcast: DashSet::new(),
            sequence: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl PaymentSender for MockChain {
    fn address(&self) -> SolanaAddress {
        PAYER.parse().unwrap()
    }

    async fn balance(&self, _mint: &SolanaAddress) -> X402Result<MoneyAmount> {
        Ok(self.balance.clone())
    }

    async fn send_payment(
        &self,
        _request: &PaymentRequest,
        _amount: &MoneyAmount,
    ) -> X402Result<String> {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        let signature = format!("it-signature-{n}");
        self.broadcast.insert(signature.clone());
        Ok(signature)
    }
}

#[async_trait]
impl TransferVerifier for MockChain {
    async fn verify_transfer(
        &self,
        transaction_ref: &str,
        _expected: &TransferExpectation,
    ) -> X402Result<bool> {
        Ok(self.broadcast.contains(transaction_ref))
    }
}

struct AppState {
    gate: PaymentGate,
    served: AtomicU32,
}

async fn premium(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(value) = headers.get(PaymentAuthorization::HEADER) {
        let Ok(value) = value.to_str() else {
            return (StatusCode::BAD_REQUEST, "bad header encoding").into_response();
        };
        let price = MoneyAmount::parse(PRICE).unwrap();
        return match state
            .gate
            .accept_authorization(value, &price, Some(IDENTITY))
            .await
        {
            Ok(_) => {
                state.served.fetch_add(1, Ordering::SeqCst);
                (StatusCode::OK, "paid content").into_response()
            }
            Err(e) => {
                let status =
                    StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::FORBIDDEN);
                (status, e.code().to_string()).into_response()
            }
        };
    }

    let status = state.gate.admit(IDENTITY);
    if status.allowed {
        state.gate.record_usage(IDENTITY);
        state.served.fetch_add(1, Ordering::SeqCst);
        return (StatusCode::OK, "free content").into_response();
    }

    let demand = state.gate.issue_demand(
        MoneyAmount::parse(PRICE).unwrap(),
        "/premium",
        "premium content",
    );
    match demand.to_json() {
        Ok(body) => (StatusCode::PAYMENT_REQUIRED, body).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "").into_response(),
    }
}

async fn start_server(chain: Arc<MockChain>, free_allowance: u32) -> (SocketAddr, Arc<AppState>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config: GateConfig = serde_json::from_value(serde_json::json!({
        "payment_address": "So11111111111111111111111111111111111111112",
        "asset_address": "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU",
        "network": "solana-devnet",
        "rpc_url": "https://api.devnet.solana.com",
        "free_allowance": free_allowance,
    }))
    .unwrap();
    let state = Arc::new(AppState {
        gate: PaymentGate::with_verifier(config, chain),
        served: AtomicU32::new(0),
    });

    let app = Router::new()
        .route("/premium", get(premium))
        .with_state(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

#[tokio::test]
async fn free_tier_then_automatic_payment() {
    let chain = MockChain::funded("100");
    let (addr, state) = start_server(Arc::clone(&chain), 2).await;
    let url = format!("http://{addr}/premium");
    let client = X402Client::new(
        Arc::clone(&chain),
        ClientConfig::with_ceiling(MoneyAmount::parse("1").unwrap()),
    );

    // Two free requests, no payment needed.
    for _ in 0..2 {
        let response = client.get(&url).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "free content");
    }
    assert_eq!(chain.sequence.load(Ordering::SeqCst), 0);

    // Third request hits the quota, gets a 402, and pays automatically.
    let response = client.get(&url).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "paid content");
    assert_eq!(chain.sequence.load(Ordering::SeqCst), 1);
    assert_eq!(state.served.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn ceiling_blocks_payment_client_side() {
    let chain = MockChain::funded("100");
    let (addr, _state) = start_server(Arc::clone(&chain), 0).await;
    let url = format!("http://{addr}/premium");
    let client = X402Client::new(
        Arc::clone(&chain),
        ClientConfig::with_ceiling(MoneyAmount::parse("0.05").unwrap()),
    );

    let err = client.get(&url).await.unwrap_err();
    assert!(matches!(err, X402Error::PaymentRequired { .. }));
    assert_eq!(chain.sequence.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn replayed_authorization_is_refused() {
    let chain = MockChain::funded("100");
    let (addr, _state) = start_server(Arc::clone(&chain), 0).await;
    let url = format!("http://{addr}/premium");
    let client = X402Client::new(
        Arc::clone(&chain),
        ClientConfig::with_ceiling(MoneyAmount::parse("1").unwrap()),
    );

    // First pass settles a payment and succeeds.
    let response = client.get(&url).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Re-presenting the same settled transaction must be rejected.
    let demand = {
        let raw = reqwest::get(&url).await.unwrap();
        assert_eq!(raw.status(), StatusCode::PAYMENT_REQUIRED);
        X402Client::<MockChain>::parse_payment_request(raw).await.unwrap()
    };
    let replay = PaymentAuthorization::for_broadcast(
        &demand,
        MoneyAmount::parse(PRICE).unwrap(),
        PAYER.parse().unwrap(),
        "it-signature-0",
    );
    let response = client
        .get_with_authorization(&url, &replay)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        response.text().await.unwrap(),
        "PAYMENT_VERIFICATION_FAILED"
    );
}

#[tokio::test]
async fn fabricated_signature_is_refused() {
    let chain = MockChain::funded("100");
    let (addr, _state) = start_server(Arc::clone(&chain), 0).await;
    let url = format!("http://{addr}/premium");

    let raw = reqwest::get(&url).await.unwrap();
    assert_eq!(raw.status(), StatusCode::PAYMENT_REQUIRED);
    let demand = X402Client::<MockChain>::parse_payment_request(raw).await.unwrap();

    // The signature was never broadcast, so verification reports the
    // transaction as not yet visible and the gate refuses it.
    let forged = PaymentAuthorization::for_broadcast(
        &demand,
        MoneyAmount::parse(PRICE).unwrap(),
        PAYER.parse().unwrap(),
        "never-broadcast",
    );
    let client = X402Client::new(Arc::clone(&chain), ClientConfig::default());
    let response = client.get_with_authorization(&url, &forged).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
