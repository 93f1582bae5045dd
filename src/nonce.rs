use crate::chain::{self, BlockHeightSource, ChainQuery};
use crate::error::{NonceError, Result};
use crate::lock::{LockRegistry, ReleaseToken};
use crate::store::{self, TransactionStore};
use alloy_primitives::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct TrackerConfig {
    /// How long to wait for a first block height. `None` waits forever.
    pub block_wait_timeout: Option<Duration>,
}

/// The inputs behind one computed nonce, for logging and debugging only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceDetails {
    pub block_number: u64,
    pub base_count: u64,
    pub base_count_raw: String,
    pub pending_count: u64,
    pub local_nonce_raw: Option<String>,
    /// Highest local nonce plus one, or 0 without local history.
    pub local_nonce: u64,
}

/// A granted nonce. The address stays locked until `release` is released.
#[derive(Debug)]
#[must_use = "release the lock after recording or abandoning the transaction"]
pub struct NonceLock {
    pub next_nonce: u64,
    pub details: NonceDetails,
    pub release: ReleaseToken,
}

/// Held global lock, see [`NonceTracker::get_global_lock`].
#[derive(Debug)]
#[must_use = "every allocation is blocked until the global lock is released"]
pub struct GlobalLock {
    pub release: ReleaseToken,
}

/// Hands out per-address nonces to concurrent callers.
///
/// Callers must not call [`NonceTracker::get_nonce_lock`] while holding a
/// [`GlobalLock`] from the same task; it waits on itself forever.
pub struct NonceTracker {
    chain: Arc<dyn ChainQuery>,
    txs: Arc<dyn TransactionStore>,
    blocks: RwLock<Arc<dyn BlockHeightSource>>,
    locks: LockRegistry,
    config: TrackerConfig,
}

impl NonceTracker {
    pub fn new(
        chain: Arc<dyn ChainQuery>,
        txs: Arc<dyn TransactionStore>,
        blocks: Arc<dyn BlockHeightSource>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            chain,
            txs,
            blocks: RwLock::new(blocks),
            locks: LockRegistry::new(),
            config,
        }
    }

    /// Swaps the block height source, e.g. after switching networks.
    /// Allocations already waiting on the old source keep waiting on it.
    pub fn replace_block_source(&self, blocks: Arc<dyn BlockHeightSource>) {
        *self.blocks.write() = blocks;
    }

    /// Blocks every nonce allocation until the returned lock is released.
    pub async fn get_global_lock(&self) -> GlobalLock {
        GlobalLock {
            release: self.locks.acquire_global().await,
        }
    }

    /// Computes the next nonce for `address` and keeps the address locked.
    ///
    /// Release the returned lock only after the new transaction has been
    /// added to the pending set, or after giving up on it. On error nothing
    /// stays locked.
    pub async fn get_nonce_lock(&self, address: Address) -> Result<NonceLock> {
        self.locks.wait_global_clear().await;
        let release = self.locks.acquire_for(address).await;

        // `release` drops on any early return below, freeing the address.
        match self.compute_nonce(address).await {
            Ok((next_nonce, details)) => {
                debug!(%address, next_nonce, ?details, "nonce allocated");
                Ok(NonceLock {
                    next_nonce,
                    details,
                    release,
                })
            }
            Err(err) => {
                warn!(%address, error = %err, "nonce allocation aborted");
                Err(err)
            }
        }
    }

    async fn compute_nonce(&self, address: Address) -> Result<(u64, NonceDetails)> {
        let highest = store::highest_local_nonce(&*self.txs, &address);
        let (local_nonce, local_nonce_raw) = match highest {
            Some((highest, raw)) => match highest.checked_add(1) {
                Some(next) => (next, Some(raw)),
                None => return Err(next_nonce_overflow(format!("{raw} + 1"))),
            },
            None => (0, None),
        };

        let blocks = Arc::clone(&*self.blocks.read());
        let block = chain::resolve_block(&*blocks, self.config.block_wait_timeout).await?;
        let (base_count, base_count_raw) =
            chain::transaction_count(&*self.chain, address, &block).await?;
        let pending_count = self.txs.pending(&address).len() as u64;

        // Pending transactions the node already counts in `base_count` are
        // counted twice here; `local_nonce` keeps the result from going below
        // what this client has used.
        let next_nonce = base_count
            .checked_add(pending_count)
            .ok_or_else(|| next_nonce_overflow(format!("{base_count_raw} + {pending_count}")))?
            .max(local_nonce);

        let details = NonceDetails {
            block_number: block.number,
            base_count,
            base_count_raw,
            pending_count,
            local_nonce_raw,
            local_nonce,
        };
        Ok((next_nonce, details))
    }

    #[cfg(test)]
    pub(crate) fn locks(&self) -> &LockRegistry {
        &self.locks
    }
}

fn next_nonce_overflow(got: String) -> NonceError {
    NonceError::ContractViolation {
        what: "nextNonce",
        got,
    }
}
