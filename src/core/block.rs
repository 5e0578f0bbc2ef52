use crate::core::{ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_digest};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;

/// One link of the chain. `pre_block_hash` is empty only for the genesis
/// block; `hash` is the lowercase hex of the proof-of-work digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: String,
    hash: String,
    transactions: Vec<Transaction>,
    nonce: i64,
    height: usize,
}

impl Block {
    /// Assemble a candidate and run proof-of-work to completion.
    pub fn new_block(
        pre_block_hash: String,
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        let mut block = Self::candidate(pre_block_hash, transactions, height)?;
        let pow = ProofOfWork::new_proof_of_work(block.clone())?;
        let (nonce, hash) = pow.run();
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Like [`Block::new_block`], but the search stops when `cancel` is
    /// raised; `Ok(None)` means the block was abandoned, not mined.
    pub fn new_block_cancellable(
        pre_block_hash: String,
        transactions: &[Transaction],
        height: usize,
        cancel: &AtomicBool,
    ) -> Result<Option<Block>> {
        let mut block = Self::candidate(pre_block_hash, transactions, height)?;
        let pow = ProofOfWork::new_proof_of_work(block.clone())?;
        match pow.run_cancellable(cancel) {
            Some((nonce, hash)) => {
                block.nonce = nonce;
                block.hash = hash;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    fn candidate(
        pre_block_hash: String,
        transactions: &[Transaction],
        height: usize,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        Ok(Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: String::new(),
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
        })
    }

    pub fn generate_genesis_block(transaction: &Transaction) -> Result<Block> {
        Block::new_block(String::new(), &[transaction.clone()], 0)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    /// SHA-256 over the concatenated canonical encodings of all
    /// transactions; commits the block's payload into the mining digest.
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        let mut tx_bytes = vec![];
        for transaction in &self.transactions {
            tx_bytes.extend(transaction.serialize()?);
        }
        Ok(sha256_digest(tx_bytes.as_slice()))
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> String {
        self.pre_block_hash.clone()
    }

    pub fn get_hash(&self) -> &str {
        self.hash.as_str()
    }

    pub fn get_hash_bytes(&self) -> Vec<u8> {
        self.hash.as_bytes().to_vec()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    /// Overwrite the nonce, leaving the stored hash stale. Test-only.
    #[cfg(test)]
    pub fn corrupt_nonce(&mut self) {
        self.nonce = self.nonce.wrapping_add(1);
    }
}
