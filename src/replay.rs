//! Replay rejection for settlement transactions.
//!
//! A transaction signature settles exactly one request. The gate marks
//! each signature spent before serving the resource; a second presentation
//! of the same signature is rejected deterministically.

use dashmap::DashSet;

/// Tracks which settlement transactions have already been redeemed.
pub trait ReplayGuard: Send + Sync {
    /// Atomically marks `transaction_ref` spent.
    ///
    /// Returns `true` if this call spent it, `false` if it was already
    /// spent. Check and insert are a single step so two concurrent
    /// presentations of the same transaction cannot both succeed.
    fn mark_spent(&self, transaction_ref: &str) -> bool;

    /// Whether `transaction_ref` has been spent, without spending it.
    fn is_spent(&self, transaction_ref: &str) -> bool;
}

/// The default in-process [`ReplayGuard`].
#[derive(Default)]
pub struct SpentTransactionSet {
    spent: DashSet<String>,
}

impl SpentTransactionSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayGuard for SpentTransactionSet {
    fn mark_spent(&self, transaction_ref: &str) -> bool {
        self.spent.insert(transaction_ref.to_string())
    }

    fn is_spent(&self, transaction_ref: &str) -> bool {
        self.spent.contains(transaction_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn second_presentation_rejected() {
        let guard = SpentTransactionSet::new();
        assert!(!guard.is_spent("sig-1"));
        assert!(guard.mark_spent("sig-1"));
        assert!(guard.is_spent("sig-1"));
        assert!(!guard.mark_spent("sig-1"));
        assert!(guard.mark_spent("sig-2"));
    }

    #[tokio::test]
    async fn concurrent_marks_spend_exactly_once() {
        let guard = Arc::new(SpentTransactionSet::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = Arc::clone(&guard);
            handles.push(tokio::task::spawn_blocking(move || {
                guard.mark_spent("contested") as u32
            }));
        }
        let mut winners = 0;
        for handle in handles {
            winners += handle.await.unwrap();
        }
        assert_eq!(winners, 1);
    }
}
