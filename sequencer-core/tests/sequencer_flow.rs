//! End-to-end sequencer flows against the in-memory anchor

use sequencer_core::{
    anchor::AnchorClient,
    challenge::ChallengePhase,
    commitment::{hash_block_header, links_to, state_root, CommitmentBuilder},
    crypto::{KeyPair, TypedDataDomain},
    Address, Balance, BalanceUpdate, Config, Error, InMemoryAnchor, Sequencer, SequencerHandle,
    TransferRequest,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    alice: KeyPair,
    bob: KeyPair,
    domain: TypedDataDomain,
    config: Config,
    anchor: Arc<InMemoryAnchor>,
    sequencer: Sequencer,
}

impl Harness {
    async fn start() -> Self {
        let alice = KeyPair::from_seed(&[0x11; 32]).unwrap();
        let bob = KeyPair::from_seed(&[0x22; 32]).unwrap();

        let mut config = Config::default();
        config.accounts.initial_balance = 100;
        config.accounts.participants = vec![alice.address(), bob.address()];
        config.accounts.open_enrollment = false;
        config.batching.commit_threshold = 3;
        // Long enough that retries only happen when a test asks for them
        config.batching.retry_interval_ms = 60_000;

        let anchor = Arc::new(InMemoryAnchor::new());
        let sequencer = Sequencer::start(config.clone(), anchor.clone()).await.unwrap();

        Self {
            alice,
            bob,
            domain: TypedDataDomain::from(&config.domain),
            config,
            anchor,
            sequencer,
        }
    }

    fn handle(&self) -> SequencerHandle {
        self.sequencer.handle()
    }

    fn signed(&self, signer: &KeyPair, to: Address, amount: Balance) -> TransferRequest {
        TransferRequest {
            sender: signer.address(),
            recipient: to,
            amount,
            signature: signer.sign_transfer(&self.domain, &to, amount),
        }
    }

    fn alice_to_bob(&self, amount: Balance) -> TransferRequest {
        self.signed(&self.alice, self.bob.address(), amount)
    }
}

#[tokio::test]
async fn test_transfer_updates_balances() {
    let h = Harness::start().await;
    let handle = h.handle();

    handle.submit_transfer(h.alice_to_bob(30)).await.unwrap();

    assert_eq!(handle.balance_of(h.alice.address()).await.unwrap(), 70);
    assert_eq!(handle.balance_of(h.bob.address()).await.unwrap(), 130);
    assert_eq!(handle.pending_transactions().await.unwrap().len(), 1);

    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_third_transfer_commits_block() {
    let h = Harness::start().await;
    let handle = h.handle();
    let count_before = handle.block_count().await.unwrap();

    handle.submit_transfer(h.alice_to_bob(10)).await.unwrap();
    handle.submit_transfer(h.alice_to_bob(10)).await.unwrap();
    assert_eq!(handle.block_count().await.unwrap(), count_before);

    handle.submit_transfer(h.alice_to_bob(10)).await.unwrap();

    assert!(handle.pending_transactions().await.unwrap().is_empty());
    assert_eq!(handle.block_count().await.unwrap(), count_before + 1);

    let block = handle.block(0).await.unwrap();
    assert_eq!(block.transactions().unwrap().len(), 3);
    assert_eq!(block.state_root, state_root(&handle.balances().await.unwrap()));
    assert_eq!(
        h.anchor.balances().await.unwrap(),
        BalanceUpdate::from_snapshot(&handle.balances().await.unwrap())
    );

    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_wrong_key_is_rejected() {
    let h = Harness::start().await;
    let handle = h.handle();

    // Bob signs a transfer that claims to debit Alice
    let mut forged = h.signed(&h.bob, h.bob.address(), 50);
    forged.sender = h.alice.address();

    let result = handle.submit_transfer(forged).await;

    assert!(matches!(result, Err(Error::Authorization(_))));
    assert_eq!(handle.balance_of(h.alice.address()).await.unwrap(), 100);
    assert_eq!(handle.balance_of(h.bob.address()).await.unwrap(), 100);
    assert!(handle.pending_transactions().await.unwrap().is_empty());

    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_signature_for_other_amount_is_rejected() {
    let h = Harness::start().await;
    let handle = h.handle();

    let mut request = h.alice_to_bob(5);
    request.amount = 95;

    assert!(matches!(
        handle.submit_transfer(request).await,
        Err(Error::Authorization(_))
    ));
    assert_eq!(handle.balance_of(h.bob.address()).await.unwrap(), 100);

    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_account_rejected_when_enrollment_closed() {
    let h = Harness::start().await;
    let handle = h.handle();
    let carol = KeyPair::from_seed(&[0x33; 32]).unwrap();

    let request = h.signed(&carol, h.alice.address(), 10);
    let result = handle.submit_transfer(request).await;

    assert!(matches!(result, Err(Error::InvalidAccount(a)) if a == carol.address()));
    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_challenge_latest_block_is_mismatch() {
    let h = Harness::start().await;
    let handle = h.handle();
    for _ in 0..3 {
        handle.submit_transfer(h.alice_to_bob(10)).await.unwrap();
    }
    let latest = handle.block(0).await.unwrap();

    let result = handle.challenge(0).await;

    match result {
        Err(Error::ChallengeMismatch { block_index, state_root }) => {
            assert_eq!(block_index, 0);
            assert_eq!(state_root, format!("0x{}", hex::encode(latest.state_root)));
        }
        other => panic!("expected mismatch, got {:?}", other),
    }
    assert_eq!(h.sequencer.metrics().challenges_dismissed.get(), 1);

    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_corrupted_block_is_corrected() {
    let h = Harness::start().await;
    let handle = h.handle();
    for _ in 0..3 {
        handle.submit_transfer(h.alice_to_bob(10)).await.unwrap();
    }

    // A faulty writer anchors a block whose root and balances inflate Bob
    let prior = handle.block(0).await.unwrap();
    let inflated = vec![(h.alice.address(), 70), (h.bob.address(), 1_000)];
    let bogus = CommitmentBuilder::new()
        .build_next_block(Some(&prior), &[], &inflated, 99)
        .unwrap();
    h.anchor
        .append_unchecked(bogus.clone(), Some(BalanceUpdate::from_snapshot(&inflated)));

    let report = handle.challenge(1).await.unwrap();

    assert_eq!(report.phase, ChallengePhase::Applied);
    assert_eq!(report.anchored_state_root, bogus.state_root);
    assert_eq!(
        report.balances,
        vec![(h.alice.address(), 70), (h.bob.address(), 130)]
            .into_iter()
            .collect::<std::collections::BTreeMap<_, _>>()
            .into_iter()
            .collect::<Vec<_>>()
    );
    assert_eq!(h.anchor.blocks()[1].state_root, report.recalculated_state_root);
    assert_eq!(handle.balance_of(h.bob.address()).await.unwrap(), 130);
    assert_eq!(
        h.anchor.balances().await.unwrap(),
        BalanceUpdate::from_snapshot(&handle.balances().await.unwrap())
    );

    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_commit_keeps_batch_and_retries_once() {
    let h = Harness::start().await;
    let handle = h.handle();

    h.anchor.fail_next_calls(1);
    for _ in 0..3 {
        handle.submit_transfer(h.alice_to_bob(10)).await.unwrap();
    }

    assert_eq!(handle.pending_transactions().await.unwrap().len(), 3);
    assert_eq!(h.anchor.blocks().len(), 0);
    let status = handle.status().await.unwrap();
    assert_eq!(status.commit_failures, 1);
    assert!(status.last_commit_error.is_some());

    let block = handle.flush().await.unwrap().expect("batch committed");
    assert_eq!(block.transactions().unwrap().len(), 3);
    assert!(handle.pending_transactions().await.unwrap().is_empty());

    // Nothing left to commit
    assert!(handle.flush().await.unwrap().is_none());
    assert_eq!(h.anchor.blocks().len(), 1);

    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lost_receipt_is_not_resubmitted() {
    let h = Harness::start().await;
    let handle = h.handle();

    h.anchor.lose_next_receipt();
    for _ in 0..3 {
        handle.submit_transfer(h.alice_to_bob(10)).await.unwrap();
    }

    // The block landed but the sequencer could not confirm it
    assert_eq!(h.anchor.blocks().len(), 1);
    let status = handle.status().await.unwrap();
    assert!(status.awaiting_confirmation);
    assert_eq!(status.pending, 3);

    let confirmed = handle.flush().await.unwrap().expect("earlier attempt confirmed");
    assert_eq!(confirmed, h.anchor.blocks()[0]);
    assert_eq!(h.anchor.blocks().len(), 1);
    assert!(handle.pending_transactions().await.unwrap().is_empty());
    assert!(!handle.status().await.unwrap().awaiting_confirmation);

    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retry_interval_commits_without_flush() {
    let alice = KeyPair::from_seed(&[0x11; 32]).unwrap();
    let bob = KeyPair::from_seed(&[0x22; 32]).unwrap();
    let mut config = Config::default();
    config.accounts.participants = vec![alice.address(), bob.address()];
    config.batching.commit_threshold = 1;
    config.batching.retry_interval_ms = 25;

    let anchor = Arc::new(InMemoryAnchor::new());
    let sequencer = Sequencer::start(config.clone(), anchor.clone()).await.unwrap();
    let domain = TypedDataDomain::from(&config.domain);

    anchor.fail_next_calls(2);
    let request = TransferRequest {
        sender: alice.address(),
        recipient: bob.address(),
        amount: 1,
        signature: alice.sign_transfer(&domain, &bob.address(), 1),
    };
    sequencer.handle().submit_transfer(request).await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(anchor.blocks().len(), 1);
    assert!(sequencer.handle().pending_transactions().await.unwrap().is_empty());
    sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_chain_integrity_across_blocks() {
    let h = Harness::start().await;
    let handle = h.handle();

    for round in 0..9 {
        let request = if round % 2 == 0 {
            h.alice_to_bob(7)
        } else {
            h.signed(&h.bob, h.alice.address(), 3)
        };
        handle.submit_transfer(request).await.unwrap();
    }

    let blocks = h.anchor.blocks();
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0].previous_block_hash, [0u8; 32]);
    for pair in blocks.windows(2) {
        assert!(links_to(&pair[1], &pair[0]));
        assert_eq!(pair[1].previous_block_hash, hash_block_header(&pair[0]));
    }

    let total: Balance = handle.balances().await.unwrap().iter().map(|(_, b)| b).sum();
    assert_eq!(total, 200);

    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_continues_chain() {
    let h = Harness::start().await;
    let handle = h.handle();
    for _ in 0..3 {
        handle.submit_transfer(h.alice_to_bob(10)).await.unwrap();
    }
    let later: Vec<_> = (0..3).map(|_| h.alice_to_bob(10)).collect();
    h.sequencer.shutdown().await.unwrap();

    let restarted = Sequencer::start(h.config.clone(), h.anchor.clone()).await.unwrap();
    let handle = restarted.handle();
    assert_eq!(handle.balance_of(h.alice.address()).await.unwrap(), 70);

    for request in later {
        handle.submit_transfer(request).await.unwrap();
    }
    let blocks = h.anchor.blocks();
    assert_eq!(blocks.len(), 2);
    assert!(links_to(&blocks[1], &blocks[0]));

    restarted.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_outstanding_correction_settles_before_next_block() {
    let h = Harness::start().await;
    let handle = h.handle();
    for _ in 0..3 {
        handle.submit_transfer(h.alice_to_bob(10)).await.unwrap();
    }

    let prior = handle.block(0).await.unwrap();
    let inflated = vec![(h.alice.address(), 70), (h.bob.address(), 1_000)];
    let bogus = CommitmentBuilder::new()
        .build_next_block(Some(&prior), &[], &inflated, 99)
        .unwrap();
    h.anchor
        .append_unchecked(bogus, Some(BalanceUpdate::from_snapshot(&inflated)));

    // The anchor accepts the challenge but drops the balance correction
    h.anchor.fail_next_corrections(1);
    let report = handle.challenge(1).await.unwrap();

    assert_eq!(report.phase, ChallengePhase::CorrectionPending);
    assert_eq!(h.anchor.challenges().len(), 1);
    assert_eq!(handle.balance_of(h.bob.address()).await.unwrap(), 130);
    assert!(handle.status().await.unwrap().correction_outstanding);
    assert_eq!(
        h.anchor.balances().await.unwrap(),
        BalanceUpdate::from_snapshot(&inflated)
    );

    for _ in 0..3 {
        handle.submit_transfer(h.alice_to_bob(10)).await.unwrap();
    }

    let blocks = h.anchor.blocks();
    assert_eq!(blocks.len(), 3);
    assert!(links_to(&blocks[2], &blocks[1]));
    let local = handle.balances().await.unwrap();
    assert_eq!(blocks[2].state_root, state_root(&local));
    assert_eq!(h.anchor.balances().await.unwrap(), BalanceUpdate::from_snapshot(&local));
    assert_eq!(handle.balance_of(h.bob.address()).await.unwrap(), 160);
    assert!(!handle.status().await.unwrap().correction_outstanding);

    h.sequencer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_slow_anchor_keeps_batch_until_retry() {
    let alice = KeyPair::from_seed(&[0x11; 32]).unwrap();
    let bob = KeyPair::from_seed(&[0x22; 32]).unwrap();
    let mut config = Config::default();
    config.accounts.participants = vec![alice.address(), bob.address()];
    config.batching.commit_threshold = 1;
    config.batching.retry_interval_ms = 50;
    config.anchor.timeout_ms = 30;

    let anchor = Arc::new(InMemoryAnchor::new());
    let sequencer = Sequencer::start(config.clone(), anchor.clone()).await.unwrap();
    let handle = sequencer.handle();
    let domain = TypedDataDomain::from(&config.domain);

    // Every anchor call now outlives the deadline
    anchor.set_latency(Duration::from_millis(200));
    let request = TransferRequest {
        sender: alice.address(),
        recipient: bob.address(),
        amount: 5,
        signature: alice.sign_transfer(&domain, &bob.address(), 5),
    };
    handle.submit_transfer(request).await.unwrap();

    let status = handle.status().await.unwrap();
    assert_eq!(status.pending, 1);
    assert!(status.commit_failures >= 1);
    assert!(status
        .last_commit_error
        .as_deref()
        .is_some_and(|e| e.contains("Anchor unavailable")));
    assert!(anchor.blocks().is_empty());

    anchor.set_latency(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let blocks = anchor.blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].transactions().unwrap().len(), 1);
    assert!(handle.pending_transactions().await.unwrap().is_empty());
    assert_eq!(handle.balance_of(bob.address()).await.unwrap(), 105);

    sequencer.shutdown().await.unwrap();
}
