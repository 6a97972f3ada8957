//! Prometheus metrics for the sequencer
//!
//! # Metrics
//!
//! - `sequencer_transfers_accepted_total` - Transfers authorized and applied
//! - `sequencer_transfers_rejected_total` - Transfers refused (signature, balance, account)
//! - `sequencer_blocks_committed_total` - Blocks confirmed by the anchor
//! - `sequencer_commit_failures_total` - Commit attempts that left the batch pending
//! - `sequencer_challenges_applied_total` - Challenges that corrected anchored state
//! - `sequencer_challenges_dismissed_total` - Challenges against a correct root
//! - `sequencer_pending_transactions` - Transactions waiting for a commit
//! - `sequencer_commit_duration_seconds` - Anchor commit latency

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transfers applied
    pub transfers_accepted: IntCounter,

    /// Transfers refused
    pub transfers_rejected: IntCounter,

    /// Blocks confirmed by the anchor
    pub blocks_committed: IntCounter,

    /// Failed commit attempts
    pub commit_failures: IntCounter,

    /// Corrections applied
    pub challenges_applied: IntCounter,

    /// Challenges found to be unfounded
    pub challenges_dismissed: IntCounter,

    /// Pending batch size
    pub pending: IntGauge,

    /// Commit latency histogram
    pub commit_duration: Histogram,

    registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("blocks_committed", &self.blocks_committed.get())
            .field("pending", &self.pending.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_accepted = IntCounter::new(
            "sequencer_transfers_accepted_total",
            "Transfers authorized and applied",
        )?;
        registry.register(Box::new(transfers_accepted.clone()))?;

        let transfers_rejected = IntCounter::new(
            "sequencer_transfers_rejected_total",
            "Transfers refused by verification or the ledger",
        )?;
        registry.register(Box::new(transfers_rejected.clone()))?;

        let blocks_committed = IntCounter::new(
            "sequencer_blocks_committed_total",
            "Blocks confirmed by the anchor",
        )?;
        registry.register(Box::new(blocks_committed.clone()))?;

        let commit_failures = IntCounter::new(
            "sequencer_commit_failures_total",
            "Commit attempts that left the batch pending",
        )?;
        registry.register(Box::new(commit_failures.clone()))?;

        let challenges_applied = IntCounter::new(
            "sequencer_challenges_applied_total",
            "Challenges that corrected anchored state",
        )?;
        registry.register(Box::new(challenges_applied.clone()))?;

        let challenges_dismissed = IntCounter::new(
            "sequencer_challenges_dismissed_total",
            "Challenges against a correct state root",
        )?;
        registry.register(Box::new(challenges_dismissed.clone()))?;

        let pending = IntGauge::new(
            "sequencer_pending_transactions",
            "Transactions waiting for a commit",
        )?;
        registry.register(Box::new(pending.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "sequencer_commit_duration_seconds",
                "Anchor commit latency",
            )
            .buckets(vec![0.010, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            transfers_accepted,
            transfers_rejected,
            blocks_committed,
            commit_failures,
            challenges_applied,
            challenges_dismissed,
            pending,
            commit_duration,
            registry,
        })
    }

    /// Record the outcome of a transfer submission
    pub fn record_transfer(&self, accepted: bool) {
        if accepted {
            self.transfers_accepted.inc();
        } else {
            self.transfers_rejected.inc();
        }
    }

    /// Record the outcome of a commit attempt
    pub fn record_commit(&self, committed: bool, duration_seconds: f64) {
        self.commit_duration.observe(duration_seconds);
        if committed {
            self.blocks_committed.inc();
        } else {
            self.commit_failures.inc();
        }
    }

    /// Update pending batch size
    pub fn set_pending(&self, pending: usize) {
        self.pending.set(pending as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
