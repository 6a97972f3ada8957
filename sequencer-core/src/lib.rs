//! Rollup Sequencer Core
//!
//! Off-chain sequencer that authorizes signed transfers, applies them to an
//! in-memory balance ledger and commits batches as hash-chained blocks to an
//! external anchor ledger.
//!
//! # Architecture
//!
//! - **Typed-data authorization**: Every transfer must recover to its sender
//! - **Single Writer**: One actor task owns the ledger and the pending batch
//! - **Hash Chaining**: Each block commits to the full header of its predecessor
//! - **Challenges**: Disputed blocks are re-derived by replaying anchored history
//!
//! # Invariants
//!
//! - Value conservation: applying a transfer never changes total supply
//! - Non-negativity: no transfer drives a balance below zero
//! - Chain integrity: `block[i].previous_block_hash == hash(block[i-1])`
//! - Deterministic commitments: same balances → same state root

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod error;
pub mod config;
pub mod crypto;
pub mod verifier;
pub mod ledger;
pub mod batch;
pub mod commitment;
pub mod anchor;
pub mod challenge;
pub mod actor;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{Address, Balance, BalanceUpdate, Block, Hash32, Transaction, TransferRequest};
pub use config::Config;
pub use ledger::{AccountPolicy, BalanceSheet, Ledger};
pub use anchor::{AnchorClient, HttpAnchorClient, InMemoryAnchor};
pub use challenge::{ChallengeReport, ChallengeResolver};
pub use actor::{Sequencer, SequencerHandle};
