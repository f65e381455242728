//! Staking control and kernel probing.

use crate::error::{RPC_INTERNAL_ERROR, RPC_INVALID_PARAMETER};
use crate::handlers::{ensure_connected, mining::masked_time};
use crate::{AppState, RpcError};
use florin_chain::{OutPoint, Script, TxId};
use florin_consensus::{check_kernel, get_next_target_required, StakeCoin};
use florin_mining::BlockAssembler;
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;

/// Get or set the staking flag. Disabling tears the miner down and
/// clears the search interval.
pub async fn staking(state: &AppState, params: &[Value]) -> Result<Value, RpcError> {
    let ctx = &state.mining_ctx;
    let generate = match params.first() {
        None | Some(Value::Null) => ctx.staking_enabled(),
        Some(value) => value
            .as_bool()
            .ok_or_else(|| RpcError::invalid_parameter("Expected boolean"))?,
    };

    if params.first().filter(|v| !v.is_null()).is_some() {
        if let Some(staker) = &state.staker {
            if generate {
                staker.start();
            } else {
                staker.interrupt().await;
                staker.stop().await;
                ctx.set_last_coinstake_search_interval(0);
            }
        }
    }

    Ok(json!({ "generate": generate }))
}

fn parse_kernel_input(input: &Value) -> Result<OutPoint, RpcError> {
    let obj = input
        .as_object()
        .ok_or_else(|| RpcError::invalid_parameter("Invalid parameter, expected object"))?;

    let txid = obj
        .get("txid")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_parameter("Invalid parameter, missing txid key"))?;
    let txid = TxId::from_str(txid)
        .map_err(|_| RpcError::invalid_parameter("Invalid parameter, expected hex txid"))?;

    let vout = obj
        .get("vout")
        .and_then(Value::as_i64)
        .ok_or_else(|| RpcError::invalid_parameter("Invalid parameter, missing vout key"))?;
    if vout < 0 {
        return Err(RpcError::invalid_parameter(
            "Invalid parameter, vout must be positive",
        ));
    }

    Ok(OutPoint::new(txid, vout as u32))
}

/// Check whether any of the given inputs is a valid kernel right now.
///
/// The timestamp is computed once, before the loop; whichever input
/// matches is reported with that same time.
pub fn check_kernel_rpc(state: &AppState, params: &[Value]) -> Result<Value, RpcError> {
    let inputs = params
        .first()
        .and_then(Value::as_array)
        .ok_or_else(|| {
            RpcError::new(RPC_INVALID_PARAMETER, "Invalid parameter, expected array")
        })?;
    let create_template = params.get(1).and_then(Value::as_bool).unwrap_or(false);

    ensure_connected(state)?;

    let chain_params = state.chainstate.params().clone();
    let prev = state.chainstate.tip();
    let bits = get_next_target_required(prev.as_ref(), &chain_params, true);
    let time = masked_time(state);

    let mut kernel: Option<OutPoint> = None;
    for input in inputs {
        let outpoint = parse_kernel_input(input)?;
        let found = {
            let coins = state.chainstate.coins_tip();
            let lookup = |op: &OutPoint| {
                coins.get(op).map(|coin| StakeCoin {
                    value: coin.output.value,
                    time: coin.time,
                    height: coin.height,
                })
            };
            check_kernel(prev.as_ref(), bits, time, &outpoint, lookup, &chain_params).is_ok()
        };
        if found {
            kernel = Some(outpoint);
            break;
        }
    }

    let mut result = Map::new();
    result.insert("found".into(), json!(kernel.is_some()));
    let Some(kernel) = kernel else {
        return Ok(Value::Object(result));
    };

    result.insert(
        "kernel".into(),
        json!({
            "txid": kernel.txid.to_string(),
            "vout": kernel.vout,
            "time": time,
        }),
    );

    if !create_template {
        return Ok(Value::Object(result));
    }
    let Some(wallet) = &state.wallet else {
        return Ok(Value::Object(result));
    };

    let mut pos_cancel = false;
    let mut fees = 0;
    let mut assembler = BlockAssembler::new(
        Arc::clone(&state.chainstate),
        Arc::clone(&state.mempool),
        Arc::clone(&state.mining_ctx),
        state.assembler_options.clone(),
    );
    let template = assembler
        .create_new_block(
            Script::new(),
            Some(wallet.as_ref()),
            Some(&mut pos_cancel),
            Some(&mut fees),
        )
        .map_err(|err| RpcError::internal(err.to_string()))?
        .ok_or_else(|| RpcError::new(RPC_INTERNAL_ERROR, "Couldn't create new block"))?;

    // Pin the block and coinbase to the reported kernel time.
    let mut block = template.block;
    block.header.time = time as u32;
    block.transactions[0].time = time as u32;

    result.insert("blocktemplate".into(), json!(hex::encode(block.encode())));
    result.insert("blocktemplatefees".into(), json!(fees));
    Ok(Value::Object(result))
}
