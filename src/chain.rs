//! Chain-facing collaborators and the accessors that turn their answers into
//! plain integers.

use crate::error::{NonceError, Result};
use alloy_primitives::{Address, B256};
use alloy_rpc_types_eth::BlockNumberOrTag;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Chain height observed while computing one nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub number: u64,
    pub hash: B256,
}

/// Remote chain state, usually an RPC provider.
pub trait ChainQuery: Send + Sync {
    /// Raw transaction count quantity (e.g. `"0x1a"`) of `address` at `block`.
    fn transaction_count(
        &self,
        address: Address,
        block: BlockNumberOrTag,
    ) -> BoxFuture<'_, anyhow::Result<String>>;
}

/// Last known chain height plus a way to wait for the next one.
pub trait BlockHeightSource: Send + Sync {
    fn current(&self) -> Option<BlockSnapshot>;

    /// Resolves with the current height if one is known, otherwise with the
    /// next one published. `None` if the source shuts down first.
    fn next(&self) -> BoxFuture<'_, Option<BlockSnapshot>>;
}

/// Creates a connected block publisher and source.
pub fn block_channel() -> (BlockPublisher, WatchBlockSource) {
    let (tx, rx) = watch::channel(None);
    (BlockPublisher { tx }, WatchBlockSource { rx })
}

/// Write side of [`block_channel`], owned by whatever tracks new heads.
#[derive(Debug)]
pub struct BlockPublisher {
    tx: watch::Sender<Option<BlockSnapshot>>,
}

impl BlockPublisher {
    pub fn publish(&self, block: BlockSnapshot) {
        debug!(number = block.number, "new block height");
        self.tx.send_replace(Some(block));
    }

    pub fn subscribe(&self) -> WatchBlockSource {
        WatchBlockSource {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchBlockSource {
    rx: watch::Receiver<Option<BlockSnapshot>>,
}

impl BlockHeightSource for WatchBlockSource {
    fn current(&self) -> Option<BlockSnapshot> {
        *self.rx.borrow()
    }

    fn next(&self) -> BoxFuture<'_, Option<BlockSnapshot>> {
        let mut rx = self.rx.clone();
        Box::pin(async move { rx.wait_for(Option::is_some).await.ok().and_then(|block| *block) })
    }
}

/// Decodes a hex quantity. The `0x` prefix is optional.
pub fn parse_quantity(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let hex = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u64::from_str_radix(hex, 16).ok()
}

/// Cached height if there is one, else the next height published.
pub async fn resolve_block(
    source: &dyn BlockHeightSource,
    wait: Option<Duration>,
) -> Result<BlockSnapshot> {
    if let Some(block) = source.current() {
        return Ok(block);
    }

    debug!("no block height cached, waiting for the next one");
    let next = match wait {
        Some(limit) => tokio::time::timeout(limit, source.next())
            .await
            .map_err(|_| NonceError::BlockWaitTimedOut(limit))?,
        None => source.next().await,
    };
    next.ok_or(NonceError::BlockSourceClosed)
}

/// Chain transaction count at `block`, decoded and raw.
pub async fn transaction_count(
    chain: &dyn ChainQuery,
    address: Address,
    block: &BlockSnapshot,
) -> Result<(u64, String)> {
    let raw = chain
        .transaction_count(address, BlockNumberOrTag::Number(block.number))
        .await?;
    match parse_quantity(&raw) {
        Some(count) => Ok((count, raw)),
        None => Err(NonceError::ContractViolation {
            what: "baseCount",
            got: raw,
        }),
    }
}
