use borsh::{BorshDeserialize, BorshSerialize};

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone)]
pub struct TransactionRequest {
    pub id: u64,
    pub from: [u8; 20],
    pub to: [u8; 20],
    pub value: [u8; 32], // U256 as bytes
    /// Sender gives up after getting a nonce, e.g. signing was rejected.
    pub abandon: bool,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq)]
pub enum SubmitDecision {
    Submitted {
        tx_id: u64,
        from: [u8; 20],
        nonce: u64,
        block_number: u64,
    },
    Abandoned {
        tx_id: u64,
        nonce: u64,
    },
    Failed {
        tx_id: u64,
        reason: String,
    },
}
