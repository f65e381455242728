//! RPC surface tests against the dispatch layer.

use crate::harness::TestNode;
use florin_chain::{Script, OP_TRUE};
use florin_consensus::check_proof_of_work;
use florin_rpc::dispatch;
use serde_json::{json, Value};
use std::time::Duration;

fn wallet_key_hex(node: &TestNode) -> String {
    hex::encode(node.wallet_destination().0)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generatetoaddress_mines_blocks() {
    let node = TestNode::regtest();
    let state = node.app_state();
    let address = wallet_key_hex(&node);

    let result = dispatch(&state, "generatetoaddress", &[json!(3), json!(address)])
        .await
        .unwrap();
    let hashes = result.as_array().unwrap();
    assert_eq!(hashes.len(), 3);
    assert_eq!(node.chainstate.height(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generatetoaddress_rejects_bad_address() {
    let node = TestNode::regtest();
    let state = node.app_state();
    let err = dispatch(&state, "generatetoaddress", &[json!(1), json!("nonsense")])
        .await
        .unwrap_err();
    assert_eq!(err.code, florin_rpc::error::RPC_INVALID_ADDRESS_OR_KEY);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generate_is_hidden() {
    let node = TestNode::regtest();
    let state = node.app_state();
    let err = dispatch(&state, "generate", &[]).await.unwrap_err();
    assert_eq!(err.code, florin_rpc::error::RPC_METHOD_NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_getmininginfo_reports_chain() {
    let node = TestNode::regtest();
    let state = node.app_state();
    let address = wallet_key_hex(&node);
    dispatch(&state, "generatetoaddress", &[json!(2), json!(address)])
        .await
        .unwrap();

    let info = dispatch(&state, "getmininginfo", &[]).await.unwrap();
    assert_eq!(info["blocks"], json!(2));
    assert_eq!(info["chain"], json!("regtest"));
    assert_eq!(info["pooledtx"], json!(0));
    // The generate path assembles blocks, so last-block stats exist.
    assert!(info.get("currentblockweight").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_getblocktemplate_requires_segwit_rule() {
    let node = TestNode::regtest();
    let state = node.app_state();
    let err = dispatch(&state, "getblocktemplate", &[json!({"rules": []})])
        .await
        .unwrap_err();
    assert_eq!(err.code, florin_rpc::error::RPC_INVALID_PARAMETER);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_getblocktemplate_shape() {
    let node = TestNode::regtest();
    let coins = node.mine_blocks_to_wallet(2);
    node.add_spend(coins[0], 250, 2_500);
    node.add_spend(coins[1], 250, 1_000);

    let state = node.app_state();
    let result = dispatch(&state, "getblocktemplate", &[json!({"rules": ["segwit"]})])
        .await
        .unwrap();

    assert_eq!(result["height"], json!(3));
    assert_eq!(
        result["previousblockhash"],
        json!(node.best_hash().to_string())
    );
    let transactions = result["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    // Fee-ordered, with per-entry data/fee/weight fields.
    assert_eq!(transactions[0]["fee"], json!(2_500));
    assert!(transactions[0]["data"].is_string());
    assert!(transactions[0]["weight"].is_number());
    assert!(result["longpollid"].is_string());
    assert!(result["default_witness_commitment"].is_string());
    assert_eq!(result["mutable"], json!(["time", "transactions", "prevblock"]));

    // The cache serves the same template back.
    let again = dispatch(&state, "getblocktemplate", &[json!({"rules": ["segwit"]})])
        .await
        .unwrap();
    assert_eq!(again["longpollid"], result["longpollid"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_getblocktemplate_proposal_roundtrip() {
    let node = TestNode::regtest();
    let state = node.app_state();

    let template = node
        .assembler()
        .create_new_block(
            {
                let mut s = Script::new();
                s.push_opcode(OP_TRUE);
                s
            },
            None,
            None,
            None,
        )
        .unwrap()
        .unwrap();
    let block_hex = hex::encode(template.block.encode());

    let result = dispatch(
        &state,
        "getblocktemplate",
        &[json!({"mode": "proposal", "data": block_hex})],
    )
    .await
    .unwrap();
    // A valid proposal built on the tip returns null.
    assert_eq!(result, Value::Null);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submitblock_accepts_then_duplicates() {
    let node = TestNode::regtest();
    let state = node.app_state();

    let template = node
        .assembler()
        .create_new_block(
            {
                let mut s = Script::new();
                s.push_opcode(OP_TRUE);
                s
            },
            None,
            None,
            None,
        )
        .unwrap()
        .unwrap();
    let mut block = template.block;
    while !check_proof_of_work(&block.hash(), block.header.bits, &node.params) {
        block.header.nonce += 1;
    }
    let block_hex = hex::encode(block.encode());

    let result = dispatch(&state, "submitblock", &[json!(block_hex)])
        .await
        .unwrap();
    assert_eq!(result, Value::Null);
    assert_eq!(node.best_hash(), block.hash());

    let duplicate = dispatch(&state, "submitblock", &[json!(block_hex)])
        .await
        .unwrap();
    assert_eq!(duplicate, json!("duplicate"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submitblock_rejects_garbage() {
    let node = TestNode::regtest();
    let state = node.app_state();
    let err = dispatch(&state, "submitblock", &[json!("deadbeef")])
        .await
        .unwrap_err();
    assert_eq!(err.code, florin_rpc::error::RPC_DESERIALIZATION_ERROR);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submitheader_requires_known_parent() {
    let node = TestNode::regtest();
    let state = node.app_state();

    let mut header = florin_chain::BlockHeader::default();
    header.prev_hash = florin_chain::BlockHash([7; 32]);
    let err = dispatch(&state, "submitheader", &[json!(hex::encode(header.encode()))])
        .await
        .unwrap_err();
    assert_eq!(err.code, florin_rpc::error::RPC_VERIFY_ERROR);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_long_poll_returns_on_new_block() {
    let node = TestNode::regtest();
    let state = node.app_state();
    let address = wallet_key_hex(&node);

    // Prime the template cache and capture the longpollid.
    let first = dispatch(&state, "getblocktemplate", &[json!({"rules": ["segwit"]})])
        .await
        .unwrap();
    let longpollid = first["longpollid"].as_str().unwrap().to_string();

    let poll_state = state.clone();
    let poll = tokio::spawn(async move {
        dispatch(
            &poll_state,
            "getblocktemplate",
            &[json!({"rules": ["segwit"], "longpollid": longpollid})],
        )
        .await
    });

    // Let the poll settle into its wait, then advance the chain.
    tokio::time::sleep(Duration::from_millis(100)).await;
    dispatch(&state, "generatetoaddress", &[json!(1), json!(address)])
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("long poll returned after new block")
        .unwrap()
        .unwrap();
    assert_eq!(result["height"], json!(node.chainstate.height() + 1));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_staking_rpc_toggles() {
    let node = TestNode::regtest();
    node.fund_wallet_mature(1);
    let state = node.app_state();

    let status = dispatch(&state, "staking", &[]).await.unwrap();
    assert_eq!(status["generate"], json!(false));

    let enabled = dispatch(&state, "staking", &[json!(true)]).await.unwrap();
    assert_eq!(enabled["generate"], json!(true));
    assert!(node.ctx.staking_enabled());

    let disabled = dispatch(&state, "staking", &[json!(false)]).await.unwrap();
    assert_eq!(disabled["generate"], json!(false));
    assert!(!node.ctx.staking_enabled());
    assert_eq!(node.ctx.last_coinstake_search_interval(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_checkkernel_finds_mature_input() {
    let node = TestNode::regtest();
    let mature = node.fund_wallet_mature(0);
    let state = node.app_state();

    let inputs = json!([{
        "txid": mature[0].txid.to_string(),
        "vout": mature[0].vout,
    }]);
    let result = dispatch(&state, "checkkernel", &[inputs]).await.unwrap();
    assert_eq!(result["found"], json!(true));
    assert_eq!(
        result["kernel"]["txid"],
        json!(mature[0].txid.to_string())
    );
    // The reported time is the masked pre-loop timestamp.
    let time = result["kernel"]["time"].as_i64().unwrap();
    assert_eq!(time & node.params.stake_timestamp_mask as i64, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_checkkernel_rejects_malformed_input() {
    let node = TestNode::regtest();
    let state = node.app_state();
    let err = dispatch(&state, "checkkernel", &[json!([{"vout": 0}])])
        .await
        .unwrap_err();
    assert_eq!(err.code, florin_rpc::error::RPC_INVALID_PARAMETER);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_estimatefee_reports_static_rate() {
    let node = TestNode::regtest();
    let state = node.app_state();
    let result = dispatch(&state, "estimatefee", &[]).await.unwrap();
    assert!(result["feerate"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_getstakinginfo_weight_tracks_wallet() {
    let node = TestNode::regtest();
    node.fund_wallet_mature(1);
    let state = node.app_state();

    let info = dispatch(&state, "getstakinginfo", &[]).await.unwrap();
    assert_eq!(info["enabled"], json!(false));
    assert!(info["weight"].as_u64().unwrap() > 0);
    assert_eq!(info["chain"], json!("regtest"));
}
