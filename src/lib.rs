//! Nonce allocation for an account-based chain client that may have several
//! transactions in flight per address.
//!
//! [`NonceTracker::get_nonce_lock`] combines the chain's transaction count at
//! the current block with this client's own pending and confirmed
//! transactions, and keeps the address locked until the caller has recorded
//! (or abandoned) the transaction that uses the nonce.

pub mod chain;
pub mod error;
pub mod lock;
pub mod nonce;
pub mod store;

pub use chain::{
    BlockHeightSource, BlockPublisher, BlockSnapshot, ChainQuery, WatchBlockSource, block_channel,
};
pub use error::NonceError;
pub use lock::{LockKey, ReleaseToken};
pub use nonce::{GlobalLock, NonceDetails, NonceLock, NonceTracker, TrackerConfig};
pub use store::{InMemoryTxStore, TransactionStore, TxMeta};
