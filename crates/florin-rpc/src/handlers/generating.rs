//! On-demand block generation for test chains.

use crate::error::{
    RPC_DESERIALIZATION_ERROR, RPC_INVALID_ADDRESS_OR_KEY, RPC_INTERNAL_ERROR, RPC_MISC_ERROR,
};
use crate::{AppState, RpcError};
use florin_chain::{Block, BlockHash, Script, Transaction, TxId};
use florin_consensus::check_proof_of_work;
use florin_mempool::Mempool;
use florin_mining::{
    increment_extra_nonce, regenerate_commitments, BlockAssembler, DEFAULT_MAX_TRIES,
};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Parse an output target: a bare hex public key, or the `pk(...)`
/// descriptor wrapping one.
fn script_from_output(output: &str) -> Option<Script> {
    let key_hex = output
        .strip_prefix("pk(")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(output);
    let bytes = hex::decode(key_hex).ok()?;
    let key: [u8; 32] = bytes.try_into().ok()?;
    let mut script = Script::new();
    script.push_slice(&key).push_opcode(florin_chain::OP_CHECKSIG);
    Some(script)
}

/// Grind the nonce of an assembled block and submit on success.
///
/// Returns `None` when tries ran out or the server is shutting down.
fn generate_block(
    state: &AppState,
    block: &mut Block,
    max_tries: &mut u64,
    extra_nonce: &mut u32,
) -> Result<Option<BlockHash>, RpcError> {
    let tip = state.chainstate.tip();
    increment_extra_nonce(&state.mining_ctx, block, tip.as_ref(), extra_nonce);

    let params = state.chainstate.params();
    while *max_tries > 0
        && block.header.nonce < u32::MAX
        && !check_proof_of_work(&block.hash(), block.header.bits, params)
        && state.rpc_running()
    {
        block.header.nonce += 1;
        *max_tries -= 1;
    }
    if *max_tries == 0 || !state.rpc_running() || block.header.nonce == u32::MAX {
        return Ok(None);
    }

    if !state.chainstate.process_new_block(block, true) {
        return Err(RpcError::new(
            RPC_INTERNAL_ERROR,
            "ProcessNewBlock, block not accepted",
        ));
    }
    Ok(Some(block.hash()))
}

fn generate_blocks(
    state: &AppState,
    coinbase_script: Script,
    num_blocks: i64,
    mut max_tries: u64,
) -> Result<Value, RpcError> {
    let height_end = state.chainstate.height() as i64 + num_blocks;
    let mut extra_nonce = 0u32;
    let mut hashes = Vec::new();

    while (state.chainstate.height() as i64) < height_end && state.rpc_running() {
        let mut assembler = BlockAssembler::new(
            Arc::clone(&state.chainstate),
            Arc::clone(&state.mempool),
            Arc::clone(&state.mining_ctx),
            state.assembler_options.clone(),
        );
        let template = assembler
            .create_new_block(coinbase_script.clone(), None, None, None)
            .map_err(|err| RpcError::internal(err.to_string()))?
            .ok_or_else(|| RpcError::new(RPC_INTERNAL_ERROR, "Couldn't create new block"))?;

        let mut block = template.block;
        match generate_block(state, &mut block, &mut max_tries, &mut extra_nonce)? {
            Some(hash) => {
                debug!(block = %hash, "Generated block");
                hashes.push(json!(hash.to_string()));
            }
            None => break,
        }
    }
    Ok(Value::Array(hashes))
}

pub fn generate_to_address(state: &AppState, params: &[Value]) -> Result<Value, RpcError> {
    let num_blocks = params
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| RpcError::invalid_parameter("Missing nblocks"))?;
    let address = params
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_parameter("Missing address"))?;
    let max_tries = params
        .get(2)
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_TRIES);

    let script = script_from_output(address)
        .ok_or_else(|| RpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Error: Invalid address"))?;
    generate_blocks(state, script, num_blocks, max_tries)
}

pub fn generate_to_descriptor(state: &AppState, params: &[Value]) -> Result<Value, RpcError> {
    let num_blocks = params
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| RpcError::invalid_parameter("Missing num_blocks"))?;
    let descriptor = params
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_parameter("Missing descriptor"))?;
    let max_tries = params
        .get(2)
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_TRIES);

    let script = script_from_output(descriptor)
        .ok_or_else(|| RpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Invalid descriptor"))?;
    generate_blocks(state, script, num_blocks, max_tries)
}

pub fn generate_block_rpc(state: &AppState, params: &[Value]) -> Result<Value, RpcError> {
    let output = params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_parameter("Missing output"))?;
    let script = script_from_output(output).ok_or_else(|| {
        RpcError::new(
            RPC_INVALID_ADDRESS_OR_KEY,
            "Error: Invalid address or descriptor",
        )
    })?;

    let raw_txs_or_txids = params
        .get(1)
        .and_then(Value::as_array)
        .ok_or_else(|| RpcError::invalid_parameter("Missing transactions"))?;

    // Txids must reference mempool transactions; anything else must be
    // raw transaction hex.
    let mut transactions: Vec<Transaction> = Vec::new();
    for item in raw_txs_or_txids {
        let text = item
            .as_str()
            .ok_or_else(|| RpcError::invalid_parameter("Expected hex string"))?;

        if let Ok(txid) = TxId::from_str(text) {
            let tx = state.mempool.get(&txid).ok_or_else(|| {
                RpcError::new(
                    RPC_INVALID_ADDRESS_OR_KEY,
                    format!("Transaction {text} not in mempool."),
                )
            })?;
            transactions.push((*tx).clone());
            continue;
        }

        let decoded = hex::decode(text)
            .ok()
            .and_then(|bytes| Transaction::decode_all(&bytes).ok())
            .ok_or_else(|| {
                RpcError::new(
                    RPC_DESERIALIZATION_ERROR,
                    format!(
                        "Transaction decode failed for {text}. Make sure the tx has at least one input."
                    ),
                )
            })?;
        transactions.push(decoded);
    }

    // Assemble over an empty pool, then splice the caller's
    // transactions in verbatim.
    let empty_mempool = Arc::new(Mempool::new());
    let mut assembler = BlockAssembler::new(
        Arc::clone(&state.chainstate),
        empty_mempool,
        Arc::clone(&state.mining_ctx),
        state.assembler_options.clone(),
    );
    let template = assembler
        .create_new_block(script, None, None, None)
        .map_err(|err| RpcError::internal(err.to_string()))?
        .ok_or_else(|| RpcError::new(RPC_INTERNAL_ERROR, "Couldn't create new block"))?;

    let mut block = template.block;
    assert_eq!(block.transactions.len(), 1);
    block.transactions.extend(transactions);
    regenerate_commitments(&mut block, &state.chainstate);

    let tip = state.chainstate.tip();
    let validation = state
        .chainstate
        .test_block_validity(&block, tip.as_ref(), false, false)
        .map_err(|err| {
            RpcError::new(
                crate::error::RPC_VERIFY_ERROR,
                format!("TestBlockValidity failed: {err}"),
            )
        })?;
    if !validation.is_valid() {
        return Err(RpcError::new(
            crate::error::RPC_VERIFY_ERROR,
            format!("TestBlockValidity failed: {validation}"),
        ));
    }

    let mut max_tries = DEFAULT_MAX_TRIES;
    let mut extra_nonce = 0u32;
    let hash = generate_block(state, &mut block, &mut max_tries, &mut extra_nonce)?
        .ok_or_else(|| RpcError::new(RPC_MISC_ERROR, "Failed to make block."))?;

    Ok(json!({ "hash": hash.to_string() }))
}
