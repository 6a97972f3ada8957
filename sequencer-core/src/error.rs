//! Error types for the sequencer

use crate::types::{Address, Balance};
use thiserror::Error;

/// Result type for sequencer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sequencer errors
#[derive(Error, Debug)]
pub enum Error {
    /// Signature does not recover to the claimed sender, or is malformed
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// Sender cannot cover the transfer amount
    #[error("Insufficient balance: {account} holds {balance}, transfer requires {required}")]
    InsufficientBalance {
        /// Debited account
        account: Address,
        /// Balance at the time of the check
        balance: Balance,
        /// Amount requested
        required: Balance,
    },

    /// Sender is not a ledger participant
    #[error("Invalid account: {0} is not a ledger participant")]
    InvalidAccount(Address),

    /// Transfer is structurally invalid (zero amount, self transfer, ...)
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    /// Anchor call failed or timed out; the caller may retry
    #[error("Anchor unavailable: {0}")]
    AnchorUnavailable(String),

    /// Anchor answered but refused the call
    #[error("Anchor rejected call: {0}")]
    AnchorRejected(String),

    /// Recomputed state root equals the anchored one; nothing to correct
    #[error("Challenge mismatch: block {block_index} state root {state_root} is already correct")]
    ChallengeMismatch {
        /// Challenged block
        block_index: u64,
        /// Recomputed (and anchored) state root, hex encoded
        state_root: String,
    },

    /// Block index beyond the anchored chain
    #[error("Block not found: {0}")]
    BlockNotFound(u64),

    /// Invariant violation (conservation, replay underflow, ...)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failure is worth retrying later
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::AnchorUnavailable(_) | Error::Concurrency(_))
    }
}
