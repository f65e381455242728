//! In-memory UTXO view.

use florin_chain::{OutPoint, Transaction, TxOut};
use std::collections::HashMap;

/// An unspent output with the metadata the kernel check and wallet need.
#[derive(Clone, Debug)]
pub struct Coin {
    pub output: TxOut,
    pub height: u32,
    /// Timestamp of the creating transaction.
    pub time: u32,
    pub is_coinbase: bool,
    pub is_coinstake: bool,
}

/// The set of unspent transaction outputs on the active chain.
#[derive(Default)]
pub struct CoinsView {
    coins: HashMap<OutPoint, Coin>,
}

impl CoinsView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Coin> {
        self.coins.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.coins.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Coin)> {
        self.coins.iter()
    }

    /// Apply a connected transaction: spend its inputs, add its outputs.
    /// Empty outputs (the coinstake marker) are not added.
    pub fn apply_transaction(&mut self, tx: &Transaction, height: u32) {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                self.coins.remove(&input.prevout);
            }
        }
        let txid = tx.txid();
        for (vout, output) in tx.outputs.iter().enumerate() {
            if output.is_empty() {
                continue;
            }
            self.coins.insert(
                OutPoint::new(txid, vout as u32),
                Coin {
                    output: output.clone(),
                    height,
                    time: tx.time,
                    is_coinbase: tx.is_coinbase(),
                    is_coinstake: tx.is_coinstake(),
                },
            );
        }
    }
}
