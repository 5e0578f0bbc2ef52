// Persistent cache of the chain's unspent outputs, kept in the sled
// "chainstate" tree: raw txid -> the transaction's unspent outputs, each
// paired with its original position so references stay valid after partial
// spends. Rebuildable at any time; the chain is the source of truth.

use crate::core::{Block, Blockchain, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use sled::Tree;
use std::collections::HashMap;

const UTXO_TREE: &str = "chainstate";

pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn utxo_tree(&self) -> Result<Tree> {
        self.blockchain
            .get_db()
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))
    }

    /// First-fit selection: walk the index in tree order, accumulating
    /// outputs locked to `pub_key_hash` until `amount` is covered or the
    /// index is exhausted. Returns the accumulated value and the selected
    /// output positions per transaction — sufficiency is the caller's check.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<usize>>)> {
        let mut unspent_outputs: HashMap<String, Vec<usize>> = HashMap::new();
        let mut accumulated = 0;
        let utxo_tree = self.utxo_tree()?;

        for item in utxo_tree.iter() {
            let (k, v) = item.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            let txid_hex = HEXLOWER.encode(k.as_ref());
            let outs: Vec<(usize, TXOutput)> = deserialize(v.as_ref())?;

            for (idx, out) in outs.iter() {
                if out.is_locked_with_key(pub_key_hash) && accumulated < amount {
                    accumulated += out.get_value();
                    unspent_outputs
                        .entry(txid_hex.clone())
                        .or_default()
                        .push(*idx);
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    /// All outputs currently locked to `pub_key_hash`.
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let utxo_tree = self.utxo_tree()?;
        let mut utxos = vec![];

        for item in utxo_tree.iter() {
            let (_, v) = item.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            let outs: Vec<(usize, TXOutput)> = deserialize(v.as_ref())?;

            for (_, out) in outs.iter() {
                if out.is_locked_with_key(pub_key_hash) {
                    utxos.push(out.clone())
                }
            }
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        let mut balance = 0;
        for utxo in self.find_utxo(pub_key_hash)? {
            balance += utxo.get_value();
        }
        Ok(balance)
    }

    /// Number of transactions with at least one unspent output.
    pub fn count_transactions(&self) -> Result<u64> {
        let utxo_tree = self.utxo_tree()?;
        let mut counter = 0;

        for item in utxo_tree.iter() {
            item.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Drop the cache and rebuild it from a full chain scan. Takes the
    /// chain writer lock so no block lands mid-rebuild.
    pub fn reindex(&self) -> Result<()> {
        let _guard = self.blockchain.lock_writes();
        let utxo_tree = self.utxo_tree()?;

        utxo_tree
            .clear()
            .map_err(|e| BlockchainError::Database(format!("Failed to clear UTXO tree: {e}")))?;

        let utxo_map = self.blockchain.find_utxo()?;
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Serialization(format!("Failed to decode transaction ID: {e}"))
            })?;
            let value = serialize(outs)?;
            utxo_tree
                .insert(txid.as_slice(), value)
                .map_err(|e| BlockchainError::Database(format!("Failed to insert UTXO: {e}")))?;
        }
        Ok(())
    }

    /// Fold one freshly appended block into the cache: spend the outputs
    /// its inputs reference, add its own outputs. Equivalent to a fresh
    /// [`UTXOSet::reindex`] over the same chain.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _guard = self.blockchain.lock_writes();
        let utxo_tree = self.utxo_tree()?;

        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    let outs_bytes = utxo_tree
                        .get(vin.get_txid())
                        .map_err(|e| {
                            BlockchainError::Database(format!("Failed to get UTXO: {e}"))
                        })?
                        .ok_or_else(|| {
                            BlockchainError::Database(format!(
                                "UTXO entry not found for {}",
                                HEXLOWER.encode(vin.get_txid())
                            ))
                        })?;
                    let outs: Vec<(usize, TXOutput)> = deserialize(outs_bytes.as_ref())?;

                    let updated_outs: Vec<(usize, TXOutput)> = outs
                        .into_iter()
                        .filter(|(idx, _)| *idx != vin.get_vout())
                        .collect();

                    if updated_outs.is_empty() {
                        utxo_tree.remove(vin.get_txid()).map_err(|e| {
                            BlockchainError::Database(format!("Failed to remove UTXO: {e}"))
                        })?;
                    } else {
                        let outs_bytes = serialize(&updated_outs)?;
                        utxo_tree.insert(vin.get_txid(), outs_bytes).map_err(|e| {
                            BlockchainError::Database(format!("Failed to update UTXO: {e}"))
                        })?;
                    }
                }
            }

            let new_outputs: Vec<(usize, TXOutput)> =
                tx.get_vout().iter().cloned().enumerate().collect();
            let outs_bytes = serialize(&new_outputs)?;
            utxo_tree.insert(tx.get_id(), outs_bytes).map_err(|e| {
                BlockchainError::Database(format!("Failed to insert new UTXO: {e}"))
            })?;
        }
        Ok(())
    }
}
