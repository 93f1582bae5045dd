use alloy_primitives::{Address, keccak256};
use alloy_rpc_types_eth::BlockNumberOrTag;
use dashmap::DashMap;
use futures::future::BoxFuture;
use nonce_tracker::{BlockPublisher, BlockSnapshot, ChainQuery, InMemoryTxStore, NonceTracker};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::info;

/// Chain stand-in: a confirmed transaction count per address behind a fake
/// RPC round trip.
pub struct SimChain {
    counts: DashMap<Address, u64>,
    latency: Duration,
}

impl SimChain {
    pub fn new(latency: Duration) -> Self {
        Self {
            counts: DashMap::new(),
            latency,
        }
    }

    pub fn include(&self, address: Address, txs: u64) {
        *self.counts.entry(address).or_insert(0) += txs;
    }

    pub fn count(&self, address: &Address) -> u64 {
        self.counts.get(address).map(|c| *c).unwrap_or(0)
    }
}

impl ChainQuery for SimChain {
    // Only the latest state is kept, so every height answers the same.
    fn transaction_count(
        &self,
        address: Address,
        _block: BlockNumberOrTag,
    ) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(async move {
            tokio::time::sleep(self.latency).await;
            Ok(format!("{:#x}", self.count(&address)))
        })
    }
}

/// Includes every pending transaction once per `block_time`, `blocks` times.
///
/// Each block is applied under the global lock, which holds back new
/// allocations until the block is in. An allocation already past the gate
/// may still read the store before and the chain after; its local nonce
/// term covers that.
pub async fn run_block_producer(
    chain: Arc<SimChain>,
    txs: Arc<InMemoryTxStore>,
    tracker: Arc<NonceTracker>,
    publisher: BlockPublisher,
    block_time: Duration,
    blocks: u64,
) {
    let mut ticks = IntervalStream::new(tokio::time::interval(block_time)).take(blocks as usize);
    let mut number = 0u64;

    while ticks.next().await.is_some() {
        number += 1;
        let global = tracker.get_global_lock().await;

        let mut included = 0;
        for address in txs.addresses() {
            let confirmed = txs.confirm_all(&address) as u64;
            if confirmed > 0 {
                chain.include(address, confirmed);
                included += confirmed;
            }
        }
        publisher.publish(BlockSnapshot {
            number,
            hash: keccak256(number.to_be_bytes()),
        });

        global.release.release();
        info!(number, included, "block produced");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nonce_tracker::{TrackerConfig, TransactionStore, TxMeta, block_channel};

    #[tokio::test]
    async fn test_block_includes_pending_transactions() {
        let chain = Arc::new(SimChain::new(Duration::ZERO));
        let txs = Arc::new(InMemoryTxStore::new());
        let (publisher, source) = block_channel();
        let tracker = Arc::new(NonceTracker::new(
            chain.clone(),
            txs.clone(),
            Arc::new(source),
            TrackerConfig::default(),
        ));
        let from = Address::repeat_byte(0xaa);
        txs.add_pending(from, TxMeta::new("0x0"));
        txs.add_pending(from, TxMeta::new("0x1"));

        run_block_producer(
            chain.clone(),
            txs.clone(),
            tracker.clone(),
            publisher,
            Duration::from_millis(1),
            2,
        )
        .await;

        assert_eq!(chain.count(&from), 2);
        assert!(txs.pending(&from).is_empty());

        let lock = tracker.get_nonce_lock(from).await.unwrap();
        assert_eq!(lock.details.block_number, 2);
        assert_eq!(lock.details.base_count_raw, "0x2");
        assert_eq!(lock.next_nonce, 2);
    }
}
