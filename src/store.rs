use crate::chain::parse_quantity;
use alloy_primitives::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// A transaction this client has sent, as far as nonce tracking cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMeta {
    /// Nonce exactly as recorded, hex with or without the `0x` prefix.
    pub nonce: String,
}

impl TxMeta {
    pub fn new(nonce: impl Into<String>) -> Self {
        Self {
            nonce: nonce.into(),
        }
    }
}

/// This client's own view of its transactions.
pub trait TransactionStore: Send + Sync {
    /// Broadcast but not yet included.
    fn pending(&self, address: &Address) -> Vec<TxMeta>;

    fn confirmed(&self, address: &Address) -> Vec<TxMeta>;
}

/// Highest nonce among the pending and confirmed transactions of `address`.
///
/// Entries whose nonce does not decode are skipped. Returns `None` when no
/// entry decodes.
pub fn highest_local_nonce(
    store: &dyn TransactionStore,
    address: &Address,
) -> Option<(u64, String)> {
    let mut txs = store.confirmed(address);
    txs.extend(store.pending(address));

    txs.into_iter()
        .filter_map(|tx| match parse_quantity(&tx.nonce) {
            Some(nonce) => Some((nonce, tx.nonce)),
            None => {
                warn!(%address, nonce = %tx.nonce, "ignoring malformed local nonce");
                None
            }
        })
        .max_by_key(|(nonce, _)| *nonce)
}

#[derive(Debug, Default)]
struct AccountTxs {
    pending: Vec<TxMeta>,
    confirmed: Vec<TxMeta>,
}

/// Process-local [`TransactionStore`].
#[derive(Debug, Default)]
pub struct InMemoryTxStore {
    accounts: RwLock<HashMap<Address, AccountTxs>>,
}

impl InMemoryTxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pending(&self, address: Address, tx: TxMeta) {
        self.accounts
            .write()
            .entry(address)
            .or_default()
            .pending
            .push(tx);
    }

    pub fn add_confirmed(&self, address: Address, tx: TxMeta) {
        self.accounts
            .write()
            .entry(address)
            .or_default()
            .confirmed
            .push(tx);
    }

    /// Moves every pending transaction of `address` to confirmed.
    pub fn confirm_all(&self, address: &Address) -> usize {
        let mut accounts = self.accounts.write();
        let Some(account) = accounts.get_mut(address) else {
            return 0;
        };
        let moved = account.pending.len();
        let pending = std::mem::take(&mut account.pending);
        account.confirmed.extend(pending);
        moved
    }

    /// Forgets an abandoned pending transaction. Returns whether it was found.
    pub fn drop_pending(&self, address: &Address, nonce: &str) -> bool {
        let mut accounts = self.accounts.write();
        let Some(account) = accounts.get_mut(address) else {
            return false;
        };
        let before = account.pending.len();
        account.pending.retain(|tx| tx.nonce != nonce);
        account.pending.len() != before
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.read().keys().copied().collect()
    }
}

impl TransactionStore for InMemoryTxStore {
    fn pending(&self, address: &Address) -> Vec<TxMeta> {
        self.accounts
            .read()
            .get(address)
            .map(|account| account.pending.clone())
            .unwrap_or_default()
    }

    fn confirmed(&self, address: &Address) -> Vec<TxMeta> {
        self.accounts
            .read()
            .get(address)
            .map(|account| account.confirmed.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Address = Address::new([0xa1; 20]);

    #[test]
    fn test_highest_nonce_is_numeric_not_lexical() {
        let store = InMemoryTxStore::new();
        store.add_confirmed(ALICE, TxMeta::new("0x5"));
        store.add_pending(ALICE, TxMeta::new("0x7"));
        store.add_pending(ALICE, TxMeta::new("0x6"));
        assert_eq!(highest_local_nonce(&store, &ALICE), Some((7, "0x7".to_string())));

        // "0x10" sorts below "0x9" as text.
        store.add_pending(ALICE, TxMeta::new("0x9"));
        store.add_pending(ALICE, TxMeta::new("0x10"));
        assert_eq!(
            highest_local_nonce(&store, &ALICE),
            Some((16, "0x10".to_string()))
        );
    }

    #[test]
    fn test_highest_nonce_reads_unprefixed_as_hex() {
        let store = InMemoryTxStore::new();
        for nonce in ["5", "7", "6"] {
            store.add_pending(ALICE, TxMeta::new(nonce));
        }
        assert_eq!(highest_local_nonce(&store, &ALICE).map(|(n, _)| n), Some(7));

        store.add_confirmed(ALICE, TxMeta::new("10"));
        assert_eq!(highest_local_nonce(&store, &ALICE), Some((16, "10".to_string())));
    }

    #[test]
    fn test_highest_nonce_skips_malformed_entries() {
        let store = InMemoryTxStore::new();
        store.add_confirmed(ALICE, TxMeta::new("0x4"));
        store.add_pending(ALICE, TxMeta::new("not-a-nonce"));
        assert_eq!(highest_local_nonce(&store, &ALICE).map(|(n, _)| n), Some(4));

        let only_bad = InMemoryTxStore::new();
        only_bad.add_pending(ALICE, TxMeta::new("0xgg"));
        assert_eq!(highest_local_nonce(&only_bad, &ALICE), None);
    }

    #[test]
    fn test_highest_nonce_empty_history() {
        assert_eq!(highest_local_nonce(&InMemoryTxStore::new(), &ALICE), None);
    }

    #[test]
    fn test_confirm_and_drop() {
        let store = InMemoryTxStore::new();
        store.add_pending(ALICE, TxMeta::new("0x0"));
        store.add_pending(ALICE, TxMeta::new("0x1"));
        store.add_pending(ALICE, TxMeta::new("0x2"));

        assert!(store.drop_pending(&ALICE, "0x2"));
        assert!(!store.drop_pending(&ALICE, "0x2"));
        assert_eq!(store.confirm_all(&ALICE), 2);
        assert!(store.pending(&ALICE).is_empty());
        assert_eq!(store.confirmed(&ALICE).len(), 2);
        assert_eq!(store.confirm_all(&Address::ZERO), 0);
        assert_eq!(store.addresses(), vec![ALICE]);
    }
}
