// The append-only ledger: sled-backed block storage with tip tracking and a
// lazy backward iterator. The "blocks" tree maps hash -> serialized block
// and holds one pointer key for the current tip.

use crate::core::{Block, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use log::info;
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};
use std::env::current_dir;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const BLOCKS_TREE: &str = "blocks";

/// Unlocking data of the genesis coinbase.
const GENESIS_COINBASE_DATA: &str = "ferrocoin genesis";

/// Handle to the persisted chain. Clones share the same database, tip and
/// writer lock, so one instance can be handed to every thread of a node.
#[derive(Clone, Debug)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<String>>,
    db: Db,
    // Serializes every tip-mutating operation; read-tip-then-write-block
    // must never interleave between two writers.
    writer: Arc<Mutex<()>>,
}

impl Blockchain {
    /// Create a fresh ledger with a genesis block at the default path.
    pub fn create_blockchain(genesis_address: &str) -> Result<Blockchain> {
        Self::create_blockchain_with_path(genesis_address, &Self::default_db_path()?)
    }

    /// Open the ledger at the default path.
    pub fn new_blockchain() -> Result<Blockchain> {
        Self::new_blockchain_with_path(&Self::default_db_path()?)
    }

    /// Create a ledger in the per-node directory, for multi-node setups on
    /// one machine.
    pub fn create_blockchain_with_node_id(
        genesis_address: &str,
        node_id: &str,
    ) -> Result<Blockchain> {
        Self::create_blockchain_with_path(genesis_address, &Self::node_db_path(node_id)?)
    }

    pub fn new_blockchain_with_node_id(node_id: &str) -> Result<Blockchain> {
        Self::new_blockchain_with_path(&Self::node_db_path(node_id)?)
    }

    fn default_db_path() -> Result<String> {
        Ok(current_dir()?.join("data").to_string_lossy().to_string())
    }

    fn node_db_path(node_id: &str) -> Result<String> {
        Ok(current_dir()?
            .join("data")
            .join(format!("node_{node_id}"))
            .to_string_lossy()
            .to_string())
    }

    /// Create a ledger at `db_path`. Errors with `LedgerExists` when a tip
    /// pointer is already persisted there.
    pub fn create_blockchain_with_path(genesis_address: &str, db_path: &str) -> Result<Blockchain> {
        let db = sled::open(db_path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks_tree = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;

        if blocks_tree
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| BlockchainError::Database(format!("Failed to get tip hash: {e}")))?
            .is_some()
        {
            return Err(BlockchainError::LedgerExists(db_path.to_string()));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_tx_with_data(
            genesis_address,
            GENESIS_COINBASE_DATA.as_bytes(),
        )?;
        let genesis = Block::generate_genesis_block(&coinbase_tx)?;
        Self::update_blocks_tree(&blocks_tree, &genesis)?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(String::from(genesis.get_hash()))),
            db,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Open the ledger at `db_path`. Errors with `LedgerNotFound` when no
    /// tip pointer is persisted there.
    pub fn new_blockchain_with_path(db_path: &str) -> Result<Blockchain> {
        let db = sled::open(db_path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks_tree = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;

        let tip_bytes = blocks_tree
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| BlockchainError::Database(format!("Failed to get tip hash: {e}")))?
            .ok_or_else(|| BlockchainError::LedgerNotFound(db_path.to_string()))?;

        let tip_hash = String::from_utf8(tip_bytes.to_vec())
            .map_err(|e| BlockchainError::Integrity(format!("Invalid tip hash format: {e}")))?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Genesis bootstrap: store the block and point the tip at it.
    fn update_blocks_tree(blocks_tree: &Tree, block: &Block) -> Result<()> {
        let block_hash = block.get_hash();
        let block_data = block.serialize()?;

        blocks_tree
            .transaction(|tx_db| {
                tx_db.insert(block_hash, block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash)?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                BlockchainError::Database(format!("Failed to update blocks tree: {e}"))
            })?;

        Ok(())
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_tip_hash(&self) -> String {
        self.tip_hash
            .read()
            .expect("tip_hash lock poisoned")
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &str) {
        let mut tip_hash = self.tip_hash.write().expect("tip_hash lock poisoned");
        *tip_hash = String::from(new_tip_hash)
    }

    /// Take the chain writer lock. UTXO rebuilds take it too, so a reindex
    /// never runs concurrently with an append it has not observed.
    pub(crate) fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().expect("chain writer lock poisoned")
    }

    /// Mine the next block out of `transactions`.
    ///
    /// Every transaction must pass verification and no output may be spent
    /// twice within the batch; the new block is persisted through the same
    /// store/maybe-advance path as peer-received blocks.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        self.validate_candidate_transactions(transactions)?;

        let _guard = self.lock_writes();
        let best_height = self.get_best_height()?;
        let block = Block::new_block(self.get_tip_hash(), transactions, best_height + 1)?;
        self.persist_block(&block)?;

        info!("Successfully mined block: {}", block.get_hash());
        Ok(block)
    }

    /// Like [`Blockchain::mine_block`], but abandons the search when
    /// `cancel` is raised and returns `Ok(None)`.
    pub fn mine_block_cancellable(
        &self,
        transactions: &[Transaction],
        cancel: &AtomicBool,
    ) -> Result<Option<Block>> {
        self.validate_candidate_transactions(transactions)?;

        let _guard = self.lock_writes();
        let best_height = self.get_best_height()?;
        let block = match Block::new_block_cancellable(
            self.get_tip_hash(),
            transactions,
            best_height + 1,
            cancel,
        )? {
            Some(block) => block,
            None => return Ok(None),
        };
        self.persist_block(&block)?;

        info!("Successfully mined block: {}", block.get_hash());
        Ok(Some(block))
    }

    fn validate_candidate_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        for (i, transaction) in transactions.iter().enumerate() {
            if !transaction.verify(self) {
                return Err(BlockchainError::Transaction(format!(
                    "Invalid transaction at index {i}"
                )));
            }
        }
        self.check_for_double_spending(transactions)
    }

    /// No output may be consumed by two inputs of the same candidate batch.
    fn check_for_double_spending(&self, transactions: &[Transaction]) -> Result<()> {
        let mut spent_outputs: HashSet<(Vec<u8>, usize)> = HashSet::new();

        for transaction in transactions {
            if transaction.is_coinbase() {
                continue;
            }

            for input in transaction.get_vin() {
                let output_reference = (input.get_txid().to_vec(), input.get_vout());
                if !spent_outputs.insert(output_reference) {
                    return Err(BlockchainError::Transaction(format!(
                        "Double spend in block candidate: output {}:{} referenced twice",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Store a peer-received block.
    ///
    /// A block failing proof-of-work is rejected outright and not stored.
    /// Storage is idempotent by hash; the tip only advances when the new
    /// height strictly exceeds the stored tip height, so an out-of-order or
    /// stale block never moves the tip backward.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        if !ProofOfWork::validate(block) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Proof-of-work check failed for block {}",
                block.get_hash()
            )));
        }

        let _guard = self.lock_writes();
        self.persist_block(block)
    }

    /// Store + maybe-advance-tip. Caller holds the writer lock.
    fn persist_block(&self, block: &Block) -> Result<()> {
        let blocks_tree = self
            .db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;

        if blocks_tree
            .get(block.get_hash())
            .map_err(|e| {
                BlockchainError::Database(format!("Failed to check block existence: {e}"))
            })?
            .is_some()
        {
            return Ok(());
        }

        let block_data = block.serialize()?;
        let tip_height = self.get_best_height()?;
        let advance = block.get_height() > tip_height;

        blocks_tree
            .transaction(|tx_db| {
                tx_db.insert(block.get_hash(), block_data.as_slice())?;
                if advance {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                }
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                BlockchainError::Database(format!("Failed to store block: {e}"))
            })?;

        if advance {
            self.set_tip_hash(block.get_hash());
        }
        Ok(())
    }

    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.db.clone())
    }

    /// Height of the tip block.
    pub fn get_best_height(&self) -> Result<usize> {
        let tip_hash = self.get_tip_hash();
        let tip_block = self.get_block(&tip_hash)?.ok_or_else(|| {
            BlockchainError::Integrity(format!("Tip block not found: {tip_hash}"))
        })?;
        Ok(tip_block.get_height())
    }

    /// Every unspent output in the chain with its position, keyed by the
    /// hex id of the transaction that created it. Full backward scan; the
    /// UTXO index caches the result.
    pub fn find_utxo(&self) -> Result<HashMap<String, Vec<(usize, crate::core::TXOutput)>>> {
        let mut utxo: HashMap<String, Vec<(usize, crate::core::TXOutput)>> = HashMap::new();
        let mut spent_txos: HashMap<String, Vec<usize>> = HashMap::new();

        let mut iterator = self.iterator();
        while let Some(block) = iterator.next_block()? {
            for tx in block.get_transactions() {
                let txid_hex = HEXLOWER.encode(tx.get_id());
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    // Spends live in later blocks, which this backward walk
                    // has already seen.
                    if let Some(spent) = spent_txos.get(txid_hex.as_str()) {
                        if spent.contains(&idx) {
                            continue;
                        }
                    }
                    utxo.entry(txid_hex.clone())
                        .or_default()
                        .push((idx, out.clone()));
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    let spent_txid_hex = HEXLOWER.encode(txin.get_txid());
                    spent_txos
                        .entry(spent_txid_hex)
                        .or_default()
                        .push(txin.get_vout());
                }
            }
        }
        Ok(utxo)
    }

    /// Linear scan for a transaction by id. Auxiliary path, not hot.
    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        let mut iterator = self.iterator();
        while let Some(block) = iterator.next_block()? {
            for transaction in block.get_transactions() {
                if txid.eq(transaction.get_id()) {
                    return Ok(Some(transaction.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Hashes of every block on the canonical chain, tip first.
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        let mut iterator = self.iterator();
        let mut hashes = vec![];
        while let Some(block) = iterator.next_block()? {
            hashes.push(block.get_hash_bytes());
        }
        Ok(hashes)
    }

    pub fn block_exists(&self, block_hash: &str) -> Result<bool> {
        let blocks_tree = self
            .db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;

        Ok(blocks_tree
            .get(block_hash)
            .map_err(|e| {
                BlockchainError::Database(format!("Failed to check block existence: {e}"))
            })?
            .is_some())
    }

    pub fn get_block(&self, block_hash: &str) -> Result<Option<Block>> {
        self.get_block_by_bytes(block_hash.as_bytes())
    }

    pub fn get_block_by_bytes(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        let blocks_tree = self
            .db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;

        if let Some(block_bytes) = blocks_tree
            .get(block_hash)
            .map_err(|e| BlockchainError::Database(format!("Failed to get block: {e}")))?
        {
            let block = Block::deserialize(block_bytes.as_ref())?;
            return Ok(Some(block));
        }
        Ok(None)
    }
}

/// Lazy backward walk from the tip to genesis. One-shot: request a fresh
/// iterator from [`Blockchain::iterator`] to traverse again.
pub struct BlockchainIterator {
    db: Db,
    current_hash: String,
}

impl BlockchainIterator {
    fn new(tip_hash: String, db: Db) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: tip_hash,
            db,
        }
    }

    /// The block at the current cursor, stepping the cursor to its
    /// predecessor. `Ok(None)` past genesis; a dangling previous-hash or an
    /// undecodable block surfaces as an integrity error.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.current_hash.is_empty() {
            return Ok(None);
        }

        let blocks_tree = self
            .db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;
        let data = blocks_tree
            .get(self.current_hash.as_bytes())
            .map_err(|e| BlockchainError::Database(format!("Failed to get block: {e}")))?
            .ok_or_else(|| {
                BlockchainError::Integrity(format!(
                    "Dangling block reference: {}",
                    self.current_hash
                ))
            })?;
        let block = Block::deserialize(data.as_ref()).map_err(|e| {
            BlockchainError::Integrity(format!(
                "Undecodable block {}: {e}",
                self.current_hash
            ))
        })?;

        self.current_hash = block.get_pre_block_hash();
        Ok(Some(block))
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}
