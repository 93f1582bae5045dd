mod chain;
mod events;
mod submitter;

use borsh::BorshDeserialize;
use chain::{SimChain, run_block_producer};
use events::{SubmitDecision, TransactionRequest};
use nonce_tracker::{InMemoryTxStore, NonceTracker, TrackerConfig, block_channel};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use submitter::Submitter;
use tokio::sync::mpsc;
use tracing::{Level, info};

struct SimulationConfig {
    accounts: u8,
    txs_per_account: u64,
    /// Every n-th request is abandoned after it gets its nonce.
    abandon_every: u64,
    block_time: Duration,
    blocks: u64,
    rpc_latency: Duration,
    channel_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = SimulationConfig {
        accounts: 3,
        txs_per_account: 20,
        abandon_every: 7,
        block_time: Duration::from_millis(200),
        blocks: 10,
        rpc_latency: Duration::from_millis(15),
        channel_capacity: 100,
    };

    let chain = Arc::new(SimChain::new(config.rpc_latency));
    let txs = Arc::new(InMemoryTxStore::new());
    let (publisher, source) = block_channel();
    let tracker = Arc::new(NonceTracker::new(
        chain.clone(),
        txs.clone(),
        Arc::new(source),
        TrackerConfig {
            block_wait_timeout: Some(config.block_time * 4),
        },
    ));

    let (req_tx, req_rx) = mpsc::channel(config.channel_capacity);
    let (decision_tx, mut decision_rx) = mpsc::channel(config.channel_capacity);

    let submitter = Arc::new(Submitter::new(tracker.clone(), txs.clone(), decision_tx));
    let submitter_handle = tokio::spawn(submitter.run(req_rx));

    let producer_handle = tokio::spawn(run_block_producer(
        chain,
        txs,
        tracker,
        publisher,
        config.block_time,
        config.blocks,
    ));

    // Decision consumer, keeps the encoded decisions as a journal
    let consumer_handle = tokio::spawn(async move {
        let mut journal = Vec::new();
        while let Some(decision) = decision_rx.recv().await {
            info!("CORE DECISION: {:?}", decision);
            journal.push(borsh::to_vec(&decision)?);
        }
        anyhow::Ok(journal)
    });

    info!("Starting nonce tracker simulation...");

    let mut id = 0;
    for round in 0..config.txs_per_account {
        for account in 0..config.accounts {
            id += 1;
            req_tx
                .send(TransactionRequest {
                    id,
                    from: [0xA0 + account; 20],
                    to: [0xBB; 20],
                    value: [0; 32],
                    abandon: id % config.abandon_every == 0,
                })
                .await?;
        }
        if round % 5 == 4 {
            tokio::time::sleep(config.block_time / 2).await;
        }
    }
    drop(req_tx);

    submitter_handle.await?;
    let journal = consumer_handle.await??;
    producer_handle.await?;

    let mut used: HashMap<[u8; 20], HashSet<u64>> = HashMap::new();
    for bytes in &journal {
        match SubmitDecision::try_from_slice(bytes)? {
            SubmitDecision::Submitted { from, nonce, .. } => {
                if !used.entry(from).or_default().insert(nonce) {
                    anyhow::bail!("nonce {nonce} handed out twice for {from:02x?}");
                }
            }
            SubmitDecision::Failed { tx_id, reason } => {
                anyhow::bail!("tx {tx_id} failed: {reason}");
            }
            SubmitDecision::Abandoned { .. } => {}
        }
    }

    info!(
        decisions = journal.len(),
        accounts = used.len(),
        "Simulation finished."
    );

    Ok(())
}
