//! Stake miner loop tests.

use crate::harness::TestNode;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn test_staker_mints_a_block() {
    let node = TestNode::regtest();
    node.fund_wallet_mature(2);
    node.ctx.set_last_coinstake_search_time(0);

    let state = node.app_state();
    let staker = state.staker.clone().expect("staker wired");
    let mut best_block_rx = node.chainstate.subscribe_best_block();
    let start_height = node.chainstate.height();

    staker.start();
    assert!(node.ctx.staking_enabled());

    // The loop should find a kernel and connect a stake block quickly
    // on regtest.
    let waited = tokio::time::timeout(Duration::from_secs(10), best_block_rx.changed()).await;
    assert!(waited.is_ok(), "staker did not produce a block in time");
    assert!(node.chainstate.height() > start_height);
    assert!(node.chainstate.tip().is_proof_of_stake());

    staker.interrupt().await;
    assert!(!node.ctx.staking_enabled());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_staker_start_is_idempotent() {
    let node = TestNode::regtest();
    let state = node.app_state();
    let staker = state.staker.clone().unwrap();

    staker.start();
    staker.start();
    assert!(node.ctx.staking_enabled());

    staker.interrupt().await;
    staker.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_staker_publishes_locked_wallet_warning() {
    let node = TestNode::regtest();
    node.fund_wallet_mature(1);
    node.wallet.lock();

    let state = node.app_state();
    let staker = state.staker.clone().unwrap();
    staker.start();

    // Give the loop a moment to hit the readiness ladder.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        node.ctx.miner_warning(),
        florin_mining::WARN_LOCKED,
        "locked wallet warning published"
    );

    staker.interrupt().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_staker_interrupt_wakes_sleep() {
    let node = TestNode::regtest();
    // Locked wallet keeps the loop in its two-second wait state.
    node.wallet.lock();

    let state = node.app_state();
    let staker = state.staker.clone().unwrap();
    staker.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Interrupt must return promptly even though the loop is sleeping.
    let interrupted =
        tokio::time::timeout(Duration::from_secs(5), staker.interrupt()).await;
    assert!(interrupted.is_ok(), "interrupt timed out");
}
