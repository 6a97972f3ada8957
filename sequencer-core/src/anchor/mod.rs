//! Anchor ledger interface
//!
//! The anchor is the trusted, append-only store blocks are committed to. The
//! sequencer only reaches it through [`AnchorClient`]; every call is remote,
//! may be slow or fail, and counts as durable only once it returns `Ok`.

pub mod http;
pub mod memory;

pub use http::HttpAnchorClient;
pub use memory::InMemoryAnchor;

use crate::types::{BalanceUpdate, Block, Hash32};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Confirmation returned by a durable anchor write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    /// Anchor-side reference (transaction hash, sequence number, ...)
    pub reference: String,
}

/// Commit/read/correct calls against the anchor ledger
#[async_trait]
pub trait AnchorClient: Send + Sync {
    /// Number of anchored blocks
    async fn block_count(&self) -> Result<u64>;

    /// Anchored block at `index`
    async fn block(&self, index: u64) -> Result<Block>;

    /// Append a block, optionally replacing the balance record in the same call
    async fn submit_block(
        &self,
        block: &Block,
        account_update: Option<&BalanceUpdate>,
    ) -> Result<AnchorReceipt>;

    /// Current balance record
    async fn balances(&self) -> Result<BalanceUpdate>;

    /// Accept a challenge against `index` with the recomputed state root
    async fn submit_challenge(&self, index: u64, state_root: Hash32) -> Result<AnchorReceipt>;

    /// Overwrite the balance record
    async fn submit_balance_correction(&self, update: &BalanceUpdate) -> Result<AnchorReceipt>;
}

/// Run an anchor call under a deadline
///
/// An elapsed deadline becomes [`Error::AnchorUnavailable`].
pub async fn with_deadline<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::AnchorUnavailable(format!(
            "anchor call timed out after {:?}",
            timeout
        ))),
    }
}

/// Fetch the most recent anchored block, if any
pub async fn latest_block(anchor: &dyn AnchorClient) -> Result<Option<Block>> {
    let count = anchor.block_count().await?;
    if count == 0 {
        return Ok(None);
    }
    anchor.block(count - 1).await.map(Some)
}
