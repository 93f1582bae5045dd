use std::time::Duration;

/// Errors surfaced by [`crate::NonceTracker::get_nonce_lock`].
///
/// Any per-address lock taken before the error is released by the time the
/// caller sees it.
#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    /// A collaborator handed back a count that is not an integer.
    #[error("nonce-tracker - {what} is not an integer - got: {got:?}")]
    ContractViolation { what: &'static str, got: String },

    /// The chain query failed; passed through untouched.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),

    #[error("block height source closed before a height was published")]
    BlockSourceClosed,

    #[error("no block height published within {0:?}")]
    BlockWaitTimedOut(Duration),
}

pub type Result<T> = std::result::Result<T, NonceError>;
