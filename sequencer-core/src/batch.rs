//! Pending batch accumulation
//!
//! Verified transactions wait here until the anchor confirms the block that
//! carries them. Draining is the commit acknowledgement: it must only happen
//! after the anchor call succeeded, otherwise a failed commit loses transfers.

use crate::types::Transaction;

/// Ordered buffer of transactions not yet anchored
#[derive(Debug, Clone)]
pub struct BatchAccumulator {
    pending: Vec<Transaction>,
    commit_threshold: usize,
}

impl BatchAccumulator {
    /// Create accumulator
    pub fn new(commit_threshold: usize) -> Self {
        Self {
            pending: Vec::with_capacity(commit_threshold),
            commit_threshold,
        }
    }

    /// Append a transaction, returning the new pending count
    pub fn record(&mut self, transaction: Transaction) -> usize {
        self.pending.push(transaction);
        self.pending.len()
    }

    /// Whether enough transactions are pending to commit
    pub fn is_ready_to_commit(&self) -> bool {
        self.pending.len() >= self.commit_threshold
    }

    /// Pending transactions in anchoring order
    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    /// Number of pending transactions
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take every pending transaction; call only after a confirmed commit
    pub fn drain(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.pending)
    }

    /// Remove the first `count` transactions once the block carrying them is
    /// confirmed; later arrivals stay pending
    pub fn acknowledge(&mut self, count: usize) -> Vec<Transaction> {
        let count = count.min(self.pending.len());
        self.pending.drain(..count).collect()
    }

    /// Keep only transactions accepted by `keep`, in order, returning the rest
    ///
    /// Used to re-base pending work onto a rolled-back ledger.
    pub fn retain_with<F>(&mut self, mut keep: F) -> Vec<Transaction>
    where
        F: FnMut(&Transaction) -> bool,
    {
        let (kept, dropped): (Vec<_>, Vec<_>) = self.drain().into_iter().partition(|tx| keep(tx));
        self.pending = kept;
        dropped
    }
}
