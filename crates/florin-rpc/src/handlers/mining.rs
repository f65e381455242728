//! Template construction, submission and info methods.

use crate::error::{
    RPC_DESERIALIZATION_ERROR, RPC_MISC_ERROR, RPC_OUT_OF_MEMORY, RPC_TYPE_ERROR,
    RPC_VERIFY_ERROR,
};
use crate::handlers::ensure_connected;
use crate::{AppState, RpcError};
use florin_chain::time::adjusted_time;
use florin_chain::{
    format_money, Block, BlockHash, BlockHeader, FeeRate, Script, MAX_BLOCK_SERIALIZED_SIZE,
    MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT, OP_TRUE, WITNESS_SCALE_FACTOR,
};
use florin_consensus::{
    compact_to_target, deployment_active_after, difficulty_from_bits, Deployment,
};
use florin_mining::{update_time, BlockAssembler, TemplateCacheEntry};
use florin_state::{
    update_uncommitted_block_structures, BlockStatus, BlockValidationState, BlockIndex,
};
use primitive_types::U256;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn u256_to_f64(value: U256) -> f64 {
    let limbs = value.0;
    (0..4).rev().fold(0.0f64, |acc, i| {
        acc * 18_446_744_073_709_551_616.0 + limbs[i] as f64
    })
}

/// Average network hashes per second over the trailing `lookup` blocks.
fn network_hash_ps(state: &AppState, mut lookup: i64, height: i64) -> f64 {
    let chainstate = &state.chainstate;
    let mut pb = chainstate.tip();
    if height >= 0 && (height as u32) < pb.height {
        match chainstate.chain_at(height as u32) {
            Some(index) => pb = index,
            None => return 0.0,
        }
    }
    if pb.height == 0 {
        return 0.0;
    }

    // Non-positive lookup means since the last retarget.
    let interval = chainstate.params().difficulty_adjustment_interval() as i64;
    if lookup <= 0 {
        lookup = pb.height as i64 % interval + 1;
    }
    if lookup > pb.height as i64 {
        lookup = pb.height as i64;
    }

    let mut pb0: &BlockIndex = pb.as_ref();
    let mut min_time = pb0.time;
    let mut max_time = min_time;
    for _ in 0..lookup {
        pb0 = match pb0.prev.as_deref() {
            Some(prev) => prev,
            None => break,
        };
        min_time = min_time.min(pb0.time);
        max_time = max_time.max(pb0.time);
    }
    if min_time == max_time {
        return 0.0;
    }

    let work_diff = pb.chain_work - pb0.chain_work;
    u256_to_f64(work_diff) / (max_time - min_time) as f64
}

pub fn get_network_hash_ps(state: &AppState, params: &[Value]) -> Result<Value, RpcError> {
    let lookup = params.first().and_then(Value::as_i64).unwrap_or(120);
    let height = params.get(1).and_then(Value::as_i64).unwrap_or(-1);
    Ok(json!(network_hash_ps(state, lookup, height)))
}

pub fn get_mining_info(state: &AppState, _params: &[Value]) -> Result<Value, RpcError> {
    let chainstate = &state.chainstate;
    let ctx = &state.mining_ctx;
    let tip = chainstate.tip();

    let mut obj = Map::new();
    obj.insert("blocks".into(), json!(tip.height));
    if let Some(weight) = ctx.last_block_weight() {
        obj.insert("currentblockweight".into(), json!(weight));
    }
    if let Some(tx_count) = ctx.last_block_tx_count() {
        obj.insert("currentblocktx".into(), json!(tx_count));
    }
    obj.insert("difficulty".into(), json!(difficulty_from_bits(tip.bits)));
    obj.insert("networkhashps".into(), json!(network_hash_ps(state, 120, -1)));
    obj.insert("pooledtx".into(), json!(state.mempool.size() as u64));
    obj.insert("chain".into(), json!(chainstate.params().network.id()));
    obj.insert("warnings".into(), json!(ctx.miner_warning()));
    Ok(Value::Object(obj))
}

/// Walk back to the latest block of the requested proof type.
fn last_block_of_type(tip: &BlockIndex, proof_of_stake: bool) -> Option<&BlockIndex> {
    let mut cursor = Some(tip);
    while let Some(index) = cursor {
        if index.is_proof_of_stake() == proof_of_stake {
            return Some(index);
        }
        cursor = index.prev.as_deref();
    }
    None
}

/// Estimated stake kernels tried per second across the network, from
/// the difficulty and spacing of recent proof-of-stake blocks.
fn pos_kernel_ps(state: &AppState) -> f64 {
    const POS_INTERVAL: u32 = 72;

    let tip = state.chainstate.tip();
    let mut cursor: Option<&BlockIndex> = Some(tip.as_ref());
    let mut difficulty_sum = 0.0;
    let mut stakes_time: i64 = 0;
    let mut newer_stake_time: Option<i64> = None;
    let mut handled = 0u32;

    while let Some(index) = cursor {
        if handled >= POS_INTERVAL {
            break;
        }
        if index.is_proof_of_stake() {
            difficulty_sum += difficulty_from_bits(index.bits);
            if let Some(newer) = newer_stake_time {
                stakes_time += newer - index.time;
            }
            newer_stake_time = Some(index.time);
            handled += 1;
        }
        cursor = index.prev.as_deref();
    }

    if handled == 0 || stakes_time <= 0 {
        return 0.0;
    }
    let average_difficulty = difficulty_sum / handled as f64;
    let mask = state.chainstate.params().stake_timestamp_mask as f64;
    average_difficulty * 4_294_967_296.0 / stakes_time as f64 * (mask + 1.0)
}

pub fn get_staking_info(state: &AppState, _params: &[Value]) -> Result<Value, RpcError> {
    let chainstate = &state.chainstate;
    let ctx = &state.mining_ctx;
    let params = chainstate.params();
    let tip = chainstate.tip();

    let weight = state
        .wallet
        .as_ref()
        .map(|wallet| wallet.get_stake_weight())
        .unwrap_or(0);
    let network_weight = 1.1429 * pos_kernel_ps(state);
    let search_interval = ctx.last_coinstake_search_interval();
    let staking = search_interval != 0 && weight != 0;
    let expected_time = if staking {
        (1.0455 * params.target_spacing as f64 * network_weight / weight as f64) as u64
    } else {
        0
    };

    let pos_difficulty = last_block_of_type(tip.as_ref(), true)
        .map(|index| difficulty_from_bits(index.bits))
        .unwrap_or_else(|| difficulty_from_bits(params.pos_limit_bits));

    let mut obj = Map::new();
    obj.insert("enabled".into(), json!(ctx.staking_enabled()));
    obj.insert("staking".into(), json!(staking));
    obj.insert("blocks".into(), json!(tip.height));
    if let Some(weight) = ctx.last_block_weight() {
        obj.insert("currentblockweight".into(), json!(weight));
    }
    if let Some(tx_count) = ctx.last_block_tx_count() {
        obj.insert("currentblocktx".into(), json!(tx_count));
    }
    obj.insert("pooledtx".into(), json!(state.mempool.size() as u64));
    obj.insert("difficulty".into(), json!(pos_difficulty));
    obj.insert("search-interval".into(), json!(search_interval));
    obj.insert("weight".into(), json!(weight));
    obj.insert("netstakeweight".into(), json!(network_weight as u64));
    obj.insert("expectedtime".into(), json!(expected_time));
    obj.insert("chain".into(), json!(params.network.id()));
    obj.insert("warnings".into(), json!(ctx.miner_warning()));
    Ok(Value::Object(obj))
}

pub fn estimate_fee(state: &AppState, _params: &[Value]) -> Result<Value, RpcError> {
    let fee_rate = FeeRate::from_per_kvb(state.chainstate.params().tx_fee_per_kvb);
    let mut obj = Map::new();
    if fee_rate.per_kvb() != 0 {
        obj.insert("feerate".into(), json!(format_money(fee_rate.per_kvb())));
    } else {
        obj.insert(
            "errors".into(),
            json!(["Insufficient data or no feerate found"]),
        );
    }
    Ok(Value::Object(obj))
}

/// Translate a conclusive validation state per BIP22.
fn bip22_validation_result(state: &BlockValidationState) -> Result<Value, RpcError> {
    if state.is_valid() {
        return Ok(Value::Null);
    }
    if state.is_error() {
        return Err(RpcError::new(RPC_VERIFY_ERROR, state.to_string()));
    }
    let reason = state.reject_reason();
    if reason.is_empty() {
        return Ok(json!("rejected"));
    }
    Ok(json!(reason))
}

fn decode_block_hex(data: &str) -> Result<Block, RpcError> {
    let bytes = hex::decode(data)
        .map_err(|_| RpcError::new(RPC_DESERIALIZATION_ERROR, "Block decode failed"))?;
    Block::decode_all(&bytes)
        .map_err(|_| RpcError::new(RPC_DESERIALIZATION_ERROR, "Block decode failed"))
}

/// Proposal mode of `getblocktemplate`.
fn handle_proposal(state: &AppState, request: &Map<String, Value>) -> Result<Value, RpcError> {
    let data = request
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::new(RPC_TYPE_ERROR, "Missing data String key for proposal"))?;
    let block = decode_block_hex(data)?;
    let hash = block.hash();

    if let Some(status) = state.chainstate.block_status(&hash) {
        return Ok(match status {
            BlockStatus::ValidScripts => json!("duplicate"),
            BlockStatus::Failed => json!("duplicate-invalid"),
            BlockStatus::ValidHeader => json!("duplicate-inconclusive"),
        });
    }

    let tip = state.chainstate.tip();
    // Validity can only be tested against the current tip.
    if block.header.prev_hash != tip.hash {
        return Ok(json!("inconclusive-not-best-prevblk"));
    }
    let validation = state
        .chainstate
        .test_block_validity(&block, tip.as_ref(), false, true)
        .map_err(|err| RpcError::new(RPC_VERIFY_ERROR, err.to_string()))?;
    bip22_validation_result(&validation)
}

/// Block until the best block changes, the mempool meaningfully moves,
/// or the server shuts down.
async fn wait_long_poll(state: &AppState, longpollid: &Value) -> Result<(), RpcError> {
    let (watched_hash, lp_transactions_updated) = if let Some(lpstr) = longpollid.as_str() {
        if lpstr.len() < 64 {
            return Err(RpcError::invalid_parameter("Invalid longpollid"));
        }
        let hash = BlockHash::from_str(&lpstr[..64])
            .map_err(|_| RpcError::invalid_parameter("Invalid longpollid"))?;
        let counter = lpstr[64..].parse::<u64>().unwrap_or(0);
        (hash, counter)
    } else {
        // Non-string longpollid is unspecified; watch the current state.
        (
            state.chainstate.best_hash(),
            state.mempool.transactions_updated(),
        )
    };

    let mut best_block_rx = state.chainstate.subscribe_best_block();
    // Respond after a minute of txpool movement, immediately on a new
    // best block.
    let mut check_tx_time = Instant::now() + Duration::from_secs(60);

    while state.chainstate.best_hash() == watched_hash && state.rpc_running() {
        let remaining = check_tx_time.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, best_block_rx.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                if state.mempool.transactions_updated() != lp_transactions_updated {
                    break;
                }
                check_tx_time += Duration::from_secs(10);
            }
        }
    }

    if !state.rpc_running() {
        return Err(RpcError::new(
            crate::error::RPC_CLIENT_NOT_CONNECTED,
            "Shutting down",
        ));
    }
    Ok(())
}

pub async fn get_block_template(state: &AppState, params: &[Value]) -> Result<Value, RpcError> {
    let chain_params = state.chainstate.params().clone();

    let mut mode = "template".to_string();
    let mut longpollid = Value::Null;
    let mut client_rules: HashSet<String> = HashSet::new();

    if let Some(request) = params.first().filter(|v| !v.is_null()) {
        let request = request
            .as_object()
            .ok_or_else(|| RpcError::new(RPC_TYPE_ERROR, "Expected object"))?;
        match request.get("mode") {
            Some(Value::String(s)) => mode = s.clone(),
            Some(Value::Null) | None => {}
            Some(_) => return Err(RpcError::invalid_parameter("Invalid mode")),
        }
        longpollid = request.get("longpollid").cloned().unwrap_or(Value::Null);

        if mode == "proposal" {
            return handle_proposal(state, request);
        }

        if let Some(rules) = request.get("rules").and_then(Value::as_array) {
            for rule in rules {
                if let Some(rule) = rule.as_str() {
                    client_rules.insert(rule.to_string());
                }
            }
        }
    }

    if mode != "template" {
        return Err(RpcError::invalid_parameter("Invalid mode"));
    }

    ensure_connected(state)?;

    if state.chainstate.tip().height > chain_params.last_pow_block {
        return Err(RpcError::new(RPC_MISC_ERROR, "No more PoW blocks"));
    }

    if !longpollid.is_null() {
        wait_long_poll(state, &longpollid).await?;
    }

    // The template protocol requires explicit segwit support.
    if !client_rules.contains("segwit") {
        return Err(RpcError::invalid_parameter(
            "getblocktemplate must be called with the segwit rule set (call with {\"rules\": [\"segwit\"]})",
        ));
    }

    // Rebuild the cached template when the tip moved, or when the pool
    // changed and the cache is stale by more than five seconds.
    let tip = state.chainstate.tip();
    let transactions_updated = state.mempool.transactions_updated();
    let mut cache = state.mining_ctx.template_cache();
    let rebuild = match cache.as_ref() {
        None => true,
        Some(entry) => {
            entry.prev_hash != tip.hash
                || (entry.transactions_updated != transactions_updated
                    && entry.created.elapsed() > Duration::from_secs(5))
        }
    };
    if rebuild {
        let mut script = Script::new();
        script.push_opcode(OP_TRUE);
        let mut assembler = BlockAssembler::new(
            Arc::clone(&state.chainstate),
            Arc::clone(&state.mempool),
            Arc::clone(&state.mining_ctx),
            state.assembler_options.clone(),
        );
        let template = assembler
            .create_new_block(script, None, None, None)
            .map_err(|err| RpcError::internal(err.to_string()))?
            .ok_or_else(|| RpcError::new(RPC_OUT_OF_MEMORY, "Out of memory"))?;
        *cache = Some(TemplateCacheEntry {
            prev_hash: tip.hash,
            transactions_updated,
            created: Instant::now(),
            template: Arc::new(template),
        });
    }
    let entry = cache.as_ref().expect("cache just filled");
    let template = Arc::clone(&entry.template);
    let cached_transactions_updated = entry.transactions_updated;
    drop(cache);

    // Work on a copy; the cached template stays untouched.
    let mut block = template.block.clone();
    update_time(&mut block, &chain_params, tip.as_ref());
    block.header.nonce = 0;

    let pre_segwit =
        !deployment_active_after(Some(tip.as_ref()), &chain_params, Deployment::Segwit);

    let mut tx_index: HashMap<florin_chain::TxId, usize> = HashMap::new();
    let mut transactions = Vec::new();
    for (i, tx) in block.transactions.iter().enumerate() {
        let txid = tx.txid();
        tx_index.insert(txid, i);
        if tx.is_coinbase() {
            continue;
        }

        let depends: Vec<usize> = tx
            .inputs
            .iter()
            .filter_map(|input| tx_index.get(&input.prevout.txid).copied())
            .collect();

        let mut sigops = template.tx_sigops[i];
        if pre_segwit {
            sigops /= WITNESS_SCALE_FACTOR as i64;
        }

        transactions.push(json!({
            "data": hex::encode(tx.encode(true)),
            "txid": txid.to_string(),
            "hash": tx.wtxid().to_string(),
            "depends": depends,
            "fee": template.tx_fees[i],
            "sigops": sigops,
            "weight": tx.weight(),
        }));
    }

    let target = compact_to_target(block.header.bits)
        .map(|t| format!("{:064x}", t))
        .unwrap_or_else(|| "0".repeat(64));

    let mut sigop_limit = MAX_BLOCK_SIGOPS_COST;
    let mut size_limit = MAX_BLOCK_SERIALIZED_SIZE;
    if pre_segwit {
        sigop_limit /= WITNESS_SCALE_FACTOR as i64;
        size_limit /= WITNESS_SCALE_FACTOR;
    }

    let mut result = Map::new();
    result.insert("capabilities".into(), json!(["proposal"]));
    result.insert("version".into(), json!(block.header.version));
    let mut rules = vec![json!("csv")];
    if !pre_segwit {
        rules.push(json!("!segwit"));
    }
    result.insert("rules".into(), Value::Array(rules));
    result.insert("vbavailable".into(), json!({}));
    result.insert("vbrequired".into(), json!(0));
    result.insert(
        "previousblockhash".into(),
        json!(block.header.prev_hash.to_string()),
    );
    result.insert("transactions".into(), Value::Array(transactions));
    result.insert("coinbaseaux".into(), json!({}));
    result.insert(
        "coinbasevalue".into(),
        json!(block.transactions[0].outputs[0].value),
    );
    result.insert(
        "longpollid".into(),
        json!(format!("{}{}", tip.hash, cached_transactions_updated)),
    );
    result.insert("target".into(), json!(target));
    result.insert("mintime".into(), json!(tip.median_time_past() + 1));
    result.insert("mutable".into(), json!(["time", "transactions", "prevblock"]));
    result.insert("noncerange".into(), json!("00000000ffffffff"));
    result.insert("sigoplimit".into(), json!(sigop_limit));
    result.insert("sizelimit".into(), json!(size_limit));
    if !pre_segwit {
        result.insert("weightlimit".into(), json!(MAX_BLOCK_WEIGHT));
    }
    result.insert("curtime".into(), json!(block.header.time));
    result.insert("bits".into(), json!(format!("{:08x}", block.header.bits)));
    result.insert("height".into(), json!(tip.height + 1));
    if !template.coinbase_commitment.is_empty() {
        result.insert(
            "default_witness_commitment".into(),
            json!(hex::encode(&template.coinbase_commitment)),
        );
    }

    Ok(Value::Object(result))
}

pub fn submit_block(state: &AppState, params: &[Value]) -> Result<Value, RpcError> {
    let data = params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::new(RPC_TYPE_ERROR, "Missing block hex"))?;
    let mut block = decode_block_hex(data)?;

    if block.transactions.is_empty() || !block.transactions[0].is_coinbase() {
        return Err(RpcError::new(
            RPC_DESERIALIZATION_ERROR,
            "Block does not start with a coinbase",
        ));
    }

    let hash = block.hash();
    match state.chainstate.block_status(&hash) {
        Some(BlockStatus::ValidScripts) => return Ok(json!("duplicate")),
        Some(BlockStatus::Failed) => return Ok(json!("duplicate-invalid")),
        _ => {}
    }

    if let Some(prev) = state.chainstate.lookup_block_index(&block.header.prev_hash) {
        update_uncommitted_block_structures(
            &mut block,
            Some(prev.as_ref()),
            state.chainstate.params(),
        );
    }

    let listener = state.chainstate.register_block_checked(hash);
    let _accepted = state.chainstate.process_new_block(&block, true);
    state.chainstate.unregister_block_checked(&listener);

    match listener.result() {
        None => Ok(json!("inconclusive")),
        Some(validation) => bip22_validation_result(&validation),
    }
}

pub fn submit_header(state: &AppState, params: &[Value]) -> Result<Value, RpcError> {
    let data = params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::new(RPC_TYPE_ERROR, "Missing header hex"))?;
    let bytes = hex::decode(data)
        .map_err(|_| RpcError::new(RPC_DESERIALIZATION_ERROR, "Block header decode failed"))?;
    let header = BlockHeader::decode_all(&bytes)
        .map_err(|_| RpcError::new(RPC_DESERIALIZATION_ERROR, "Block header decode failed"))?;

    if state
        .chainstate
        .lookup_block_index(&header.prev_hash)
        .is_none()
    {
        return Err(RpcError::new(
            RPC_VERIFY_ERROR,
            format!("Must submit previous header ({}) first", header.prev_hash),
        ));
    }

    match state.chainstate.process_new_block_headers(&[header]) {
        Ok(()) => Ok(Value::Null),
        Err(err) => Err(RpcError::new(RPC_VERIFY_ERROR, err.to_string())),
    }
}

/// Compute the current masked kernel timestamp.
pub(crate) fn masked_time(state: &AppState) -> i64 {
    adjusted_time() & !(state.chainstate.params().stake_timestamp_mask as i64)
}
