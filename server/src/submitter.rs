use crate::events::{SubmitDecision, TransactionRequest};
use alloy_primitives::Address;
use nonce_tracker::{InMemoryTxStore, NonceTracker, TxMeta};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Takes transaction requests and gives each one a nonce, concurrently.
pub struct Submitter {
    tracker: Arc<NonceTracker>,
    txs: Arc<InMemoryTxStore>,
    decision_tx: mpsc::Sender<SubmitDecision>,
}

impl Submitter {
    pub fn new(
        tracker: Arc<NonceTracker>,
        txs: Arc<InMemoryTxStore>,
        decision_tx: mpsc::Sender<SubmitDecision>,
    ) -> Self {
        Self {
            tracker,
            txs,
            decision_tx,
        }
    }

    pub async fn run(self: Arc<Self>, mut tx_requests: mpsc::Receiver<TransactionRequest>) {
        let mut in_flight = JoinSet::new();

        while let Some(req) = tx_requests.recv().await {
            let this = Arc::clone(&self);
            in_flight.spawn(async move { this.handle_tx_request(req).await });
        }
        while in_flight.join_next().await.is_some() {}
    }

    async fn handle_tx_request(&self, req: TransactionRequest) {
        let from = Address::from(req.from);

        let decision = match self.tracker.get_nonce_lock(from).await {
            Ok(lock) => {
                let nonce = lock.next_nonce;
                let raw_nonce = format!("{nonce:#x}");
                // record before releasing so the next caller sees it
                self.txs.add_pending(from, TxMeta::new(raw_nonce.clone()));

                let decision = if req.abandon {
                    self.txs.drop_pending(&from, &raw_nonce);
                    warn!("ABANDONED: tx {} gave up nonce {}", req.id, nonce);
                    SubmitDecision::Abandoned {
                        tx_id: req.id,
                        nonce,
                    }
                } else {
                    info!(
                        "SUBMIT: tx {} from {} with nonce {} (details: {:?})",
                        req.id, from, nonce, lock.details
                    );
                    SubmitDecision::Submitted {
                        tx_id: req.id,
                        from: req.from,
                        nonce,
                        block_number: lock.details.block_number,
                    }
                };
                lock.release.release();
                decision
            }
            Err(err) => SubmitDecision::Failed {
                tx_id: req.id,
                reason: err.to_string(),
            },
        };

        let _ = self.decision_tx.send(decision).await;
    }
}
