//! Actor-based sequencing
//!
//! One task owns the ledger, the pending batch and the challenge resolver:
//! - Transfers are authorized and applied strictly in mailbox order
//! - Anchor calls are awaited inside the actor, so nothing mutates while one is outstanding
//! - A bounded mailbox gives callers backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │             SequencerHandle (Clone)                   │
//! │   submit_transfer / balances / challenge / flush      │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              SequencerActor (Single Task)             │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ Ledger + BatchAccumulator                      │  │
//! │  │ threshold reached or retry tick → commit()     │  │
//! │  └────────────────────────────────────────────────┘  │
//! │                       │                               │
//! │                       ▼                               │
//! │            AnchorClient::submit_block()               │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::anchor::{latest_block, with_deadline, AnchorClient};
use crate::batch::BatchAccumulator;
use crate::challenge::{ChallengePhase, ChallengeReport, ChallengeResolver};
use crate::commitment::CommitmentBuilder;
use crate::config::Config;
use crate::crypto::TypedDataDomain;
use crate::ledger::{AccountPolicy, BalanceSheet, Ledger};
use crate::metrics::Metrics;
use crate::types::{Address, Balance, BalanceUpdate, Block, Transaction, TransferRequest};
use crate::verifier::SignatureVerifier;
use crate::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, error, info, warn};

/// Message sent to the sequencer actor
#[derive(Debug)]
pub enum SequencerMessage {
    /// Authorize and apply a transfer
    SubmitTransfer {
        request: TransferRequest,
        response: oneshot::Sender<Result<TransferReceipt>>,
    },

    /// All local balances
    Balances {
        response: oneshot::Sender<Vec<(Address, Balance)>>,
    },

    /// Local balance of one account
    BalanceOf {
        address: Address,
        response: oneshot::Sender<Balance>,
    },

    /// Transactions applied but not yet anchored
    PendingTransactions {
        response: oneshot::Sender<Vec<Transaction>>,
    },

    /// Commit any non-empty batch now
    Flush {
        response: oneshot::Sender<Result<Option<Block>>>,
    },

    /// Dispute an anchored block
    Challenge {
        block_index: u64,
        response: oneshot::Sender<Result<ChallengeReport>>,
    },

    /// Commit bookkeeping
    Status {
        response: oneshot::Sender<SequencerStatus>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Accepted transfer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    /// Transaction as recorded in the batch
    pub transaction: Transaction,

    /// Pending transactions including this one
    pub pending: usize,

    /// Whether this transfer filled the batch
    pub commit_due: bool,
}

/// Commit bookkeeping exposed to operators
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencerStatus {
    /// Transactions waiting for a commit
    pub pending: usize,

    /// Blocks this instance committed
    pub blocks_committed: u64,

    /// Index of the last block this instance committed
    pub last_committed_index: Option<u64>,

    /// Failed commit attempts
    pub commit_failures: u64,

    /// Error of the most recent failed attempt, cleared on success
    pub last_commit_error: Option<String>,

    /// A submission is outstanding with unknown outcome
    pub awaiting_confirmation: bool,

    /// An accepted challenge still owes the anchor its balance correction
    pub correction_outstanding: bool,
}

/// Block submitted but not yet confirmed
#[derive(Debug, Clone)]
struct InFlight {
    block: Block,
    count: usize,
}

/// Actor that owns all mutable sequencer state
pub struct SequencerActor {
    ledger: Ledger,
    batch: BatchAccumulator,
    verifier: SignatureVerifier,
    builder: CommitmentBuilder,
    resolver: ChallengeResolver,
    anchor: Arc<dyn AnchorClient>,
    timeout: Duration,
    retry_interval: Duration,
    in_flight: Option<InFlight>,
    pending_correction: Option<BalanceUpdate>,
    status: SequencerStatus,
    metrics: Arc<Metrics>,
    mailbox: mpsc::Receiver<SequencerMessage>,
}

impl fmt::Debug for SequencerActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequencerActor")
            .field("pending", &self.batch.len())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl SequencerActor {
    /// Create new actor
    pub fn new(
        config: &Config,
        ledger: Ledger,
        anchor: Arc<dyn AnchorClient>,
        metrics: Arc<Metrics>,
        mailbox: mpsc::Receiver<SequencerMessage>,
    ) -> Self {
        let timeout = config.anchor.timeout();
        let resolver = ChallengeResolver::new(ledger.policy().clone(), anchor.clone(), timeout);

        Self {
            ledger,
            batch: BatchAccumulator::new(config.batching.commit_threshold),
            verifier: SignatureVerifier::new(TypedDataDomain::from(&config.domain)),
            builder: CommitmentBuilder::new(),
            resolver,
            anchor,
            timeout,
            retry_interval: Duration::from_millis(config.batching.retry_interval_ms),
            in_flight: None,
            pending_correction: None,
            status: SequencerStatus::default(),
            metrics,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        // First tick one period out, so a failed commit is not retried immediately
        let mut retry_timer = interval_at(Instant::now() + self.retry_interval, self.retry_interval);
        retry_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = self.mailbox.recv() => {
                    match msg {
                        SequencerMessage::Shutdown => {
                            if self.has_unsettled_work() {
                                if let Err(e) = self.commit().await {
                                    warn!("Shutting down with {} unanchored transactions: {}", self.batch.len(), e);
                                }
                            }
                            break;
                        }
                        SequencerMessage::SubmitTransfer { request, response } => {
                            let result = self.accept_transfer(&request);
                            self.metrics.record_transfer(result.is_ok());
                            let commit_due = matches!(&result, Ok(receipt) if receipt.commit_due);
                            // The caller hears about its transfer before the commit starts
                            let _ = response.send(result);

                            if commit_due {
                                self.try_commit().await;
                            }
                        }
                        other => self.handle_message(other).await,
                    }
                }

                // Retry a batch whose commit failed
                _ = retry_timer.tick(), if self.needs_retry() => {
                    self.try_commit().await;
                }

                // Mailbox closed
                else => {
                    if self.has_unsettled_work() {
                        if let Err(e) = self.commit().await {
                            warn!("Mailbox closed with {} unanchored transactions: {}", self.batch.len(), e);
                        }
                    }
                    break;
                }
            }
        }

        info!("Sequencer actor stopped");
    }

    /// Handle a single non-transfer message
    async fn handle_message(&mut self, msg: SequencerMessage) {
        match msg {
            SequencerMessage::Balances { response } => {
                let _ = response.send(self.ledger.snapshot());
            }

            SequencerMessage::BalanceOf { address, response } => {
                let _ = response.send(self.ledger.balance_of(&address));
            }

            SequencerMessage::PendingTransactions { response } => {
                let _ = response.send(self.batch.pending().to_vec());
            }

            SequencerMessage::Flush { response } => {
                let result = self.commit().await;
                let _ = response.send(result);
            }

            SequencerMessage::Challenge {
                block_index,
                response,
            } => {
                let result = self.challenge(block_index).await;
                let _ = response.send(result);
            }

            SequencerMessage::Status { response } => {
                let mut status = self.status.clone();
                status.pending = self.batch.len();
                status.awaiting_confirmation = self.in_flight.is_some();
                status.correction_outstanding = self.pending_correction.is_some();
                let _ = response.send(status);
            }

            SequencerMessage::SubmitTransfer { .. } | SequencerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn has_unsettled_work(&self) -> bool {
        !self.batch.is_empty() || self.pending_correction.is_some()
    }

    fn needs_retry(&self) -> bool {
        self.in_flight.is_some()
            || self.pending_correction.is_some()
            || self.batch.is_ready_to_commit()
    }

    fn accept_transfer(&mut self, request: &TransferRequest) -> Result<TransferReceipt> {
        let result = self.verifier.authorize(request).and_then(|_| {
            let transaction = Transaction::from_request(request);
            self.ledger
                .apply(&transaction.from, &transaction.to, transaction.amount)?;
            Ok(transaction)
        });

        let transaction = match result {
            Ok(transaction) => transaction,
            Err(e) => {
                warn!("Rejected transfer from {}: {}", request.sender, e);
                return Err(e);
            }
        };

        let pending = self.batch.record(transaction.clone());
        self.metrics.set_pending(pending);
        debug!(
            "Accepted transfer {} -> {} ({}), {} pending",
            transaction.from, transaction.to, transaction.amount, pending
        );

        Ok(TransferReceipt {
            transaction,
            pending,
            commit_due: self.batch.is_ready_to_commit(),
        })
    }

    async fn try_commit(&mut self) {
        match self.commit().await {
            Ok(_) => {}
            Err(e) => warn!(
                "Commit failed, keeping {} pending transactions: {}",
                self.batch.len(),
                e
            ),
        }
    }

    /// Commit the pending batch, recording the outcome
    async fn commit(&mut self) -> Result<Option<Block>> {
        if self.batch.is_empty() && self.in_flight.is_none() && self.pending_correction.is_none() {
            return Ok(None);
        }

        let started = Instant::now();
        let result = self.commit_pending().await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(Some(block)) => {
                self.metrics.record_commit(true, elapsed);
                self.status.blocks_committed += 1;
                self.status.last_committed_index = Some(block.index);
                self.status.last_commit_error = None;
            }
            Ok(None) => {}
            Err(e) => {
                self.metrics.record_commit(false, elapsed);
                self.status.commit_failures += 1;
                self.status.last_commit_error = Some(e.to_string());
                if !e.is_transient() {
                    error!("Anchor refused commit: {}", e);
                }
            }
        }

        self.metrics.set_pending(self.batch.len());
        result
    }

    /// Push an outstanding balance correction to the anchor
    ///
    /// No block may build on a corrected chain while the anchor still holds
    /// the pre-challenge balance record.
    async fn settle_correction(&mut self) -> Result<()> {
        let Some(update) = self.pending_correction.take() else {
            return Ok(());
        };

        match self.resolver.submit_correction(&update).await {
            Ok(receipt) => {
                info!("Balance correction confirmed ({})", receipt.reference);
                Ok(())
            }
            Err(e) => {
                self.pending_correction = Some(update);
                Err(e)
            }
        }
    }

    async fn commit_pending(&mut self) -> Result<Option<Block>> {
        self.settle_correction().await?;

        // A previous submission may have landed even though its receipt did not
        if let Some(in_flight) = self.in_flight.take() {
            match with_deadline(self.timeout, self.anchor.block(in_flight.block.index)).await {
                Ok(anchored)
                    if anchored.payload == in_flight.block.payload
                        && anchored.previous_block_hash == in_flight.block.previous_block_hash =>
                {
                    self.batch.acknowledge(in_flight.count);
                    info!(
                        "Block {} was anchored by an earlier attempt; {} transactions confirmed",
                        anchored.index, in_flight.count
                    );
                    return Ok(Some(anchored));
                }
                Ok(_) | Err(Error::BlockNotFound(_)) => {}
                Err(e) => {
                    self.in_flight = Some(in_flight);
                    return Err(e);
                }
            }
        }

        if self.batch.is_empty() {
            return Ok(None);
        }

        let prior = with_deadline(self.timeout, latest_block(self.anchor.as_ref())).await?;
        let snapshot = self.ledger.snapshot();
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        let block = self.builder.build_next_block(
            prior.as_ref(),
            self.batch.pending(),
            &snapshot,
            timestamp,
        )?;
        let update = BalanceUpdate::from_snapshot(&snapshot);
        let count = self.batch.len();

        self.in_flight = Some(InFlight {
            block: block.clone(),
            count,
        });

        match with_deadline(self.timeout, self.anchor.submit_block(&block, Some(&update))).await {
            Ok(receipt) => {
                self.in_flight = None;
                self.batch.acknowledge(count);
                info!(
                    "Committed block {} with {} transactions ({})",
                    block.index, count, receipt.reference
                );
                Ok(Some(block))
            }
            Err(e) => {
                // A rejection means nothing was appended
                if !e.is_transient() {
                    self.in_flight = None;
                }
                Err(e)
            }
        }
    }

    async fn challenge(&mut self, block_index: u64) -> Result<ChallengeReport> {
        // Settle an outstanding submission so pending work is not applied twice
        if self.in_flight.is_some() {
            self.commit().await?;
        }
        self.settle_correction().await?;

        let result = self
            .resolver
            .resolve(block_index, &mut self.ledger, &mut self.batch)
            .await;

        match &result {
            Ok(report) => {
                self.metrics.challenges_applied.inc();
                if report.phase == ChallengePhase::CorrectionPending {
                    warn!(
                        "Challenge of block {} accepted; balance correction will be retried",
                        report.block_index
                    );
                    self.pending_correction = Some(report.correction());
                }
                info!(
                    "Challenge of block {} applied: {} requeued, {} dropped",
                    report.block_index,
                    report.requeued,
                    report.dropped.len()
                );
            }
            Err(Error::ChallengeMismatch { .. }) => {
                self.metrics.challenges_dismissed.inc();
                info!("Challenge of block {} dismissed", block_index);
            }
            Err(e) => warn!("Challenge of block {} failed: {}", block_index, e),
        }

        self.metrics.set_pending(self.batch.len());
        result
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct SequencerHandle {
    sender: mpsc::Sender<SequencerMessage>,
    anchor: Arc<dyn AnchorClient>,
    timeout: Duration,
}

impl fmt::Debug for SequencerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequencerHandle")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SequencerHandle {
    /// Create new handle
    pub fn new(
        sender: mpsc::Sender<SequencerMessage>,
        anchor: Arc<dyn AnchorClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            sender,
            anchor,
            timeout,
        }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SequencerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Authorize and apply a signed transfer
    pub async fn submit_transfer(&self, request: TransferRequest) -> Result<TransferReceipt> {
        self.request(|response| SequencerMessage::SubmitTransfer { request, response })
            .await?
    }

    /// Local balances in address order
    pub async fn balances(&self) -> Result<Vec<(Address, Balance)>> {
        self.request(|response| SequencerMessage::Balances { response })
            .await
    }

    /// Local balance of one account
    pub async fn balance_of(&self, address: Address) -> Result<Balance> {
        self.request(|response| SequencerMessage::BalanceOf { address, response })
            .await
    }

    /// Transactions applied but not yet anchored
    pub async fn pending_transactions(&self) -> Result<Vec<Transaction>> {
        self.request(|response| SequencerMessage::PendingTransactions { response })
            .await
    }

    /// Number of anchored blocks
    pub async fn block_count(&self) -> Result<u64> {
        with_deadline(self.timeout, self.anchor.block_count()).await
    }

    /// Anchored block at `index`
    pub async fn block(&self, index: u64) -> Result<Block> {
        with_deadline(self.timeout, self.anchor.block(index)).await
    }

    /// Dispute the state root anchored for `block_index`
    pub async fn challenge(&self, block_index: u64) -> Result<ChallengeReport> {
        self.request(|response| SequencerMessage::Challenge {
            block_index,
            response,
        })
        .await?
    }

    /// Commit any pending transactions now
    pub async fn flush(&self) -> Result<Option<Block>> {
        self.request(|response| SequencerMessage::Flush { response })
            .await?
    }

    /// Commit bookkeeping
    pub async fn status(&self) -> Result<SequencerStatus> {
        self.request(|response| SequencerMessage::Status { response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SequencerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the sequencer actor
pub fn spawn_sequencer_actor(
    config: &Config,
    ledger: Ledger,
    anchor: Arc<dyn AnchorClient>,
    metrics: Arc<Metrics>,
) -> (SequencerHandle, JoinHandle<()>) {
    // Bounded channel for backpressure
    let (tx, rx) = mpsc::channel(config.batching.mailbox_capacity);
    let actor = SequencerActor::new(config, ledger, anchor.clone(), metrics, rx);

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    (SequencerHandle::new(tx, anchor, config.anchor.timeout()), task)
}

/// Running sequencer
pub struct Sequencer {
    handle: SequencerHandle,
    task: JoinHandle<()>,
    metrics: Arc<Metrics>,
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Sequencer {
    /// Rehydrate from the anchor and spawn the actor
    ///
    /// The ledger starts from the anchor's balance record, or from the
    /// configured genesis when the anchor holds none.
    pub async fn start(config: Config, anchor: Arc<dyn AnchorClient>) -> Result<Self> {
        config.validate()?;
        let policy = AccountPolicy::from(&config.accounts);

        let record = with_deadline(config.anchor.timeout(), anchor.balances()).await?;
        let ledger = if record.is_empty() {
            info!("Anchor holds no balances; starting from genesis");
            Ledger::new(policy)
        } else {
            let sheet = BalanceSheet::from_entries(record.entries()?);
            info!("Rehydrated {} accounts from anchor", sheet.len());
            Ledger::with_balances(policy, sheet)
        };

        let metrics = Arc::new(
            Metrics::new().map_err(|e| Error::Other(format!("Failed to create metrics: {}", e)))?,
        );
        let (handle, task) = spawn_sequencer_actor(&config, ledger, anchor, metrics.clone());

        info!(
            "{} {} started (commit threshold {})",
            config.service_name, config.service_version, config.batching.commit_threshold
        );

        Ok(Self {
            handle,
            task,
            metrics,
        })
    }

    /// Handle for submitting requests
    pub fn handle(&self) -> SequencerHandle {
        self.handle.clone()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Stop the actor, committing any pending batch first
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.task
            .await
            .map_err(|e| Error::Concurrency(format!("Sequencer task failed: {}", e)))
    }
}
