use crate::core::Transaction;
use data_encoding::HEXLOWER;
use std::collections::HashMap;
use std::sync::RwLock;

/// Pending transactions keyed by lowercase-hex id. Shared between every
/// connection handler and the mining worker, hence the interior lock.
pub struct MemoryPool {
    inner: RwLock<HashMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, txid_hex: &str) -> Option<Transaction> {
        let pool = self.inner.read().expect("memory pool lock poisoned");
        pool.get(txid_hex).cloned()
    }

    pub fn add(&self, tx: Transaction) {
        let mut pool = self.inner.write().expect("memory pool lock poisoned");
        pool.insert(HEXLOWER.encode(tx.get_id()), tx);
    }

    pub fn contains(&self, txid_hex: &str) -> bool {
        let pool = self.inner.read().expect("memory pool lock poisoned");
        pool.contains_key(txid_hex)
    }

    pub fn remove(&self, txid_hex: &str) {
        let mut pool = self.inner.write().expect("memory pool lock poisoned");
        pool.remove(txid_hex);
    }

    pub fn len(&self) -> usize {
        let pool = self.inner.read().expect("memory pool lock poisoned");
        pool.len()
    }

    pub fn is_empty(&self) -> bool {
        let pool = self.inner.read().expect("memory pool lock poisoned");
        pool.is_empty()
    }

    /// Snapshot of every pending transaction, in no particular order.
    pub fn get_all(&self) -> Vec<Transaction> {
        let pool = self.inner.read().expect("memory pool lock poisoned");
        pool.values().cloned().collect()
    }
}

/// Block hashes announced by a peer and not yet downloaded, drained one
/// `getdata` at a time.
pub struct BlockInTransit {
    inner: RwLock<Vec<Vec<u8>>>,
}

impl Default for BlockInTransit {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockInTransit {
    pub fn new() -> BlockInTransit {
        BlockInTransit {
            inner: RwLock::new(vec![]),
        }
    }

    pub fn add_blocks(&self, blocks: &[Vec<u8>]) {
        let mut inner = self.inner.write().expect("blocks-in-transit lock poisoned");
        for hash in blocks {
            inner.push(hash.to_vec());
        }
    }

    pub fn first(&self) -> Option<Vec<u8>> {
        let inner = self.inner.read().expect("blocks-in-transit lock poisoned");
        inner.first().map(|h| h.to_vec())
    }

    pub fn remove(&self, block_hash: &[u8]) {
        let mut inner = self.inner.write().expect("blocks-in-transit lock poisoned");
        if let Some(idx) = inner.iter().position(|x| x.eq(block_hash)) {
            inner.remove(idx);
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("blocks-in-transit lock poisoned");
        inner.len()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.read().expect("blocks-in-transit lock poisoned");
        inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    #[test]
    fn pool_insert_lookup_remove() {
        let pool = MemoryPool::new();
        let wallet = Wallet::new().unwrap();
        let tx = Transaction::new_coinbase_tx(&wallet.get_address()).unwrap();
        let txid_hex = HEXLOWER.encode(tx.get_id());

        assert!(pool.is_empty());
        pool.add(tx.clone());
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(&txid_hex));
        assert_eq!(pool.get(&txid_hex).unwrap(), tx);

        pool.remove(&txid_hex);
        assert!(pool.is_empty());
    }

    #[test]
    fn transit_queue_drains_in_order() {
        let transit = BlockInTransit::new();
        transit.add_blocks(&[b"aa".to_vec(), b"bb".to_vec()]);
        assert_eq!(transit.len(), 2);

        assert_eq!(transit.first().unwrap(), b"aa".to_vec());
        transit.remove(b"aa");
        assert_eq!(transit.first().unwrap(), b"bb".to_vec());
        transit.remove(b"bb");
        assert!(transit.is_empty());
    }
}
