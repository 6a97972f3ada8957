//! Challenge resolution
//!
//! A challenge disputes the state root anchored for one block. The resolver
//! re-derives the state just before that block two ways (reverting later
//! blocks from the anchored balance record, and replaying earlier blocks from
//! genesis), re-applies the challenged block on top of the forward result and
//! commits a correction when the anchored record disagrees.
//!
//! The anchor accepting the challenge is the point of no return: it has
//! already replaced the root and dropped later blocks, so the local ledger
//! follows immediately. The balance correction that completes the repair may
//! still fail; the report then ends in `CorrectionPending` and the caller owns
//! the retry.
//!
//! ```text
//! Requested → RecomputingBackward → RecomputingForward → Compared ─┬─ NoOp
//!                                                                  └─ Correcting ─┬─ Applied
//!                                                                                 └─ CorrectionPending
//! ```

use crate::anchor::{with_deadline, AnchorClient, AnchorReceipt};
use crate::batch::BatchAccumulator;
use crate::commitment::state_root;
use crate::ledger::{AccountPolicy, BalanceSheet, Ledger};
use crate::types::{hex_hash, Address, Balance, BalanceUpdate, Block, Hash32, Transaction};
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Order in which replay walks a block range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplayDirection {
    /// Apply blocks in ascending order
    Forward,
    /// Revert blocks in descending order
    Backward,
}

/// Progress of a single challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChallengePhase {
    /// Challenge received
    Requested,
    /// Reverting later blocks from the anchored balance record
    RecomputingBackward,
    /// Replaying earlier blocks from genesis
    RecomputingForward,
    /// Both reconstructions are available
    Compared,
    /// Anchored record is correct; nothing to do
    NoOp,
    /// Submitting the correction to the anchor
    Correcting,
    /// Challenge accepted and ledger rolled back; balance record not yet corrected
    CorrectionPending,
    /// Anchor and local ledger now hold the corrected state
    Applied,
}

impl fmt::Display for ChallengePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of an applied correction
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeReport {
    /// Challenged block
    pub block_index: u64,

    /// State root the anchor held before the challenge
    #[serde(with = "hex_hash")]
    pub anchored_state_root: Hash32,

    /// State root re-derived from anchored history
    #[serde(with = "hex_hash")]
    pub recalculated_state_root: Hash32,

    /// Whether backward and forward reconstruction agreed
    pub replay_consistent: bool,

    /// Final phase reached
    pub phase: ChallengePhase,

    /// Corrected balances at the challenged block
    pub balances: Vec<(Address, Balance)>,

    /// Pending transactions re-applied on top of the corrected state
    pub requeued: usize,

    /// Pending transactions that no longer apply and were discarded
    pub dropped: Vec<Transaction>,

    /// Anchor confirmation of the challenge
    pub challenge_receipt: AnchorReceipt,

    /// Anchor confirmation of the balance correction, if it went through
    pub correction_receipt: Option<AnchorReceipt>,
}

impl ChallengeReport {
    /// Balance record the anchor must end up holding
    pub fn correction(&self) -> BalanceUpdate {
        BalanceUpdate::from_snapshot(&self.balances)
    }
}

/// Replay already-fetched blocks over `start`
///
/// `blocks` must be in ascending index order for both directions. Accounts
/// met for the first time are seeded through `policy`. A balance that would
/// go below zero means the anchored history is inconsistent and surfaces as
/// [`Error::InvariantViolation`].
pub fn replay_blocks(
    policy: &AccountPolicy,
    start: BalanceSheet,
    blocks: &[Block],
    direction: ReplayDirection,
) -> Result<BalanceSheet> {
    let mut sheet = start;

    match direction {
        ReplayDirection::Forward => {
            for block in blocks {
                for tx in block.transactions()? {
                    sheet.ensure(&tx.from, policy)?;
                    sheet.ensure(&tx.to, policy)?;
                    sheet
                        .transfer(&tx.from, &tx.to, tx.amount)
                        .map_err(|e| replay_violation(block.index, e))?;
                }
            }
        }
        ReplayDirection::Backward => {
            for block in blocks.iter().rev() {
                for tx in block.transactions()?.iter().rev() {
                    sheet.ensure(&tx.from, policy)?;
                    sheet.ensure(&tx.to, policy)?;
                    sheet
                        .revert(&tx.from, &tx.to, tx.amount)
                        .map_err(|e| replay_violation(block.index, e))?;
                }
            }
        }
    }

    Ok(sheet)
}

fn replay_violation(block_index: u64, error: Error) -> Error {
    match error {
        Error::InsufficientBalance {
            account,
            balance,
            required,
        } => Error::InvariantViolation(format!(
            "block {} overdraws {} ({} < {})",
            block_index, account, balance, required
        )),
        Error::InvariantViolation(reason) => {
            Error::InvariantViolation(format!("block {}: {}", block_index, reason))
        }
        other => other,
    }
}

/// Re-derives disputed state roots and commits corrections
pub struct ChallengeResolver {
    policy: AccountPolicy,
    anchor: Arc<dyn AnchorClient>,
    timeout: Duration,
}

impl fmt::Debug for ChallengeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeResolver")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ChallengeResolver {
    /// Create resolver
    pub fn new(policy: AccountPolicy, anchor: Arc<dyn AnchorClient>, timeout: Duration) -> Self {
        Self {
            policy,
            anchor,
            timeout,
        }
    }

    /// Fetch `range` from the anchor and replay it over `start`
    pub async fn replay_range(
        &self,
        start: BalanceSheet,
        range: Range<u64>,
        direction: ReplayDirection,
    ) -> Result<BalanceSheet> {
        let blocks = self.fetch_blocks(range).await?;
        replay_blocks(&self.policy, start, &blocks, direction)
    }

    async fn fetch_blocks(&self, range: Range<u64>) -> Result<Vec<Block>> {
        let mut blocks = Vec::with_capacity((range.end.saturating_sub(range.start)) as usize);
        for index in range {
            blocks.push(with_deadline(self.timeout, self.anchor.block(index)).await?);
        }
        Ok(blocks)
    }

    /// Replace the anchored balance record
    pub async fn submit_correction(&self, update: &BalanceUpdate) -> Result<AnchorReceipt> {
        with_deadline(self.timeout, self.anchor.submit_balance_correction(update)).await
    }

    fn advance(&self, phase: &mut ChallengePhase, next: ChallengePhase, block_index: u64) {
        info!(block_index, from = %phase, to = %next, "Challenge phase change");
        *phase = next;
    }

    /// Resolve a challenge against `block_index`
    ///
    /// Returns [`Error::ChallengeMismatch`] when the anchored root is already
    /// correct. Once the anchor accepts the challenge, `ledger` is rolled back
    /// to the corrected state at `block_index` and `batch` is re-applied on
    /// top. A failed balance correction after that point is reported through
    /// [`ChallengePhase::CorrectionPending`], not as an error.
    pub async fn resolve(
        &self,
        block_index: u64,
        ledger: &mut Ledger,
        batch: &mut BatchAccumulator,
    ) -> Result<ChallengeReport> {
        let mut phase = ChallengePhase::Requested;
        info!(block_index, "Challenge requested");

        let count = with_deadline(self.timeout, self.anchor.block_count()).await?;
        if block_index >= count {
            return Err(Error::BlockNotFound(block_index));
        }
        let record = with_deadline(self.timeout, self.anchor.balances()).await?;
        let current = BalanceSheet::from_entries(record.entries()?);

        self.advance(&mut phase, ChallengePhase::RecomputingBackward, block_index);
        let later = self.fetch_blocks(block_index..count).await?;
        let challenged = later
            .first()
            .cloned()
            .ok_or(Error::BlockNotFound(block_index))?;
        let backward = match replay_blocks(&self.policy, current, &later, ReplayDirection::Backward)
        {
            Ok(sheet) => Some(sheet),
            Err(Error::InvariantViolation(reason)) => {
                warn!(block_index, "Anchored balances do not revert cleanly: {}", reason);
                None
            }
            Err(e) => return Err(e),
        };

        self.advance(&mut phase, ChallengePhase::RecomputingForward, block_index);
        let forward = self
            .replay_range(self.policy.genesis(), 0..block_index, ReplayDirection::Forward)
            .await?;

        self.advance(&mut phase, ChallengePhase::Compared, block_index);
        let replay_consistent = match backward {
            Some(backward) => {
                let mut forward_view = forward.clone();
                forward_view.align_with(&backward, &self.policy);
                let mut backward_view = backward;
                backward_view.align_with(&forward, &self.policy);
                forward_view == backward_view
            }
            None => false,
        };

        let canonical = replay_blocks(
            &self.policy,
            forward,
            std::slice::from_ref(&challenged),
            ReplayDirection::Forward,
        )?;
        let recalculated = state_root(&canonical.snapshot());

        if recalculated == challenged.state_root && replay_consistent {
            self.advance(&mut phase, ChallengePhase::NoOp, block_index);
            return Err(Error::ChallengeMismatch {
                block_index,
                state_root: format!("0x{}", hex::encode(recalculated)),
            });
        }

        self.advance(&mut phase, ChallengePhase::Correcting, block_index);
        warn!(
            block_index,
            anchored = %hex::encode(challenged.state_root),
            recalculated = %hex::encode(recalculated),
            replay_consistent,
            "Correcting anchored state"
        );

        let challenge_receipt = with_deadline(
            self.timeout,
            self.anchor.submit_challenge(block_index, recalculated),
        )
        .await?;
        info!(block_index, reference = %challenge_receipt.reference, "Challenge accepted by anchor");

        ledger.overwrite(canonical.clone());
        let dropped = batch.retain_with(|tx| match ledger.apply(&tx.from, &tx.to, tx.amount) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping pending transfer {} -> {} ({}): {}", tx.from, tx.to, tx.amount, e);
                false
            }
        });

        let correction = BalanceUpdate::from(&canonical);
        let correction_receipt = match self.submit_correction(&correction).await {
            Ok(receipt) => {
                self.advance(&mut phase, ChallengePhase::Applied, block_index);
                Some(receipt)
            }
            Err(e) => {
                warn!(block_index, "Balance correction not confirmed: {}", e);
                self.advance(&mut phase, ChallengePhase::CorrectionPending, block_index);
                None
            }
        };
        info!(
            block_index,
            requeued = batch.len(),
            dropped = dropped.len(),
            "Challenge resolved"
        );

        Ok(ChallengeReport {
            block_index,
            anchored_state_root: challenged.state_root,
            recalculated_state_root: recalculated,
            replay_consistent,
            phase,
            balances: canonical.snapshot(),
            requeued: batch.len(),
            dropped,
            challenge_receipt,
            correction_receipt,
        })
    }
}
