//! In-process anchor ledger
//!
//! Behaves like the rollup contract: it checks chain linkage on every append,
//! keeps one balance record, and on an accepted challenge replaces the
//! disputed state root and discards every later block. Fault injection hooks
//! let tests exercise unavailable and half-completed calls.

use super::{AnchorClient, AnchorReceipt};
use crate::commitment::hash_block_header;
use crate::types::{BalanceUpdate, Block, Hash32};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct AnchorState {
    blocks: Vec<Block>,
    balances: BalanceUpdate,
    challenges: Vec<(u64, Hash32)>,
}

/// Anchor ledger held in memory
#[derive(Debug, Default)]
pub struct InMemoryAnchor {
    state: Mutex<AnchorState>,
    failures_remaining: AtomicUsize,
    correction_failures: AtomicUsize,
    lose_next_receipt: AtomicBool,
    latency_ms: AtomicU64,
    sequence: AtomicU64,
}

impl InMemoryAnchor {
    /// Empty anchor
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls fail with `AnchorUnavailable`
    pub fn fail_next_calls(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` balance corrections fail with `AnchorUnavailable`
    pub fn fail_next_corrections(&self, n: usize) {
        self.correction_failures.store(n, Ordering::SeqCst);
    }

    /// Apply the next block submission but report it as failed
    pub fn lose_next_receipt(&self) {
        self.lose_next_receipt.store(true, Ordering::SeqCst);
    }

    /// Delay every call
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Append a block without linkage checks (simulates a faulty sequencer)
    pub fn append_unchecked(&self, block: Block, balances: Option<BalanceUpdate>) {
        let mut state = self.state.lock();
        state.blocks.push(block);
        if let Some(balances) = balances {
            state.balances = balances;
        }
    }

    /// Overwrite the balance record without a block (simulates corruption)
    pub fn tamper_balances(&self, balances: BalanceUpdate) {
        self.state.lock().balances = balances;
    }

    /// Snapshot of every anchored block
    pub fn blocks(&self) -> Vec<Block> {
        self.state.lock().blocks.clone()
    }

    /// Accepted challenges as `(index, state_root)`
    pub fn challenges(&self) -> Vec<(u64, Hash32)> {
        self.state.lock().challenges.clone()
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::AnchorUnavailable("injected anchor failure".to_string()));
        }
        Ok(())
    }

    fn receipt(&self) -> AnchorReceipt {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        AnchorReceipt {
            reference: format!("mem-{}", seq),
        }
    }
}

#[async_trait]
impl AnchorClient for InMemoryAnchor {
    async fn block_count(&self) -> Result<u64> {
        self.enter().await?;
        Ok(self.state.lock().blocks.len() as u64)
    }

    async fn block(&self, index: u64) -> Result<Block> {
        self.enter().await?;
        self.state
            .lock()
            .blocks
            .get(index as usize)
            .cloned()
            .ok_or(Error::BlockNotFound(index))
    }

    async fn submit_block(
        &self,
        block: &Block,
        account_update: Option<&BalanceUpdate>,
    ) -> Result<AnchorReceipt> {
        self.enter().await?;

        {
            let mut state = self.state.lock();
            let expected_index = state.blocks.len() as u64;
            if block.index != expected_index {
                return Err(Error::AnchorRejected(format!(
                    "block index {} does not extend chain of length {}",
                    block.index, expected_index
                )));
            }

            let expected_link = state
                .blocks
                .last()
                .map(hash_block_header)
                .unwrap_or([0u8; 32]);
            if block.previous_block_hash != expected_link {
                return Err(Error::AnchorRejected(format!(
                    "block {} does not link to the anchored head",
                    block.index
                )));
            }

            if let Some(update) = account_update {
                update.entries()?;
                state.balances = update.clone();
            }
            state.blocks.push(block.clone());
        }

        if self.lose_next_receipt.swap(false, Ordering::SeqCst) {
            return Err(Error::AnchorUnavailable(
                "confirmation lost after block was appended".to_string(),
            ));
        }

        tracing::debug!("In-memory anchor appended block {}", block.index);
        Ok(self.receipt())
    }

    async fn balances(&self) -> Result<BalanceUpdate> {
        self.enter().await?;
        Ok(self.state.lock().balances.clone())
    }

    async fn submit_challenge(&self, index: u64, state_root: Hash32) -> Result<AnchorReceipt> {
        self.enter().await?;

        {
            let mut state = self.state.lock();
            let position = index as usize;
            if position >= state.blocks.len() {
                return Err(Error::BlockNotFound(index));
            }
            state.blocks[position].state_root = state_root;
            state.blocks.truncate(position + 1);
            state.challenges.push((index, state_root));
        }

        Ok(self.receipt())
    }

    async fn submit_balance_correction(&self, update: &BalanceUpdate) -> Result<AnchorReceipt> {
        self.enter().await?;
        let refused = self
            .correction_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::AnchorUnavailable(
                "injected balance correction failure".to_string(),
            ));
        }
        update.entries()?;
        self.state.lock().balances = update.clone();
        Ok(self.receipt())
    }
}
