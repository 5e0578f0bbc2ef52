use crate::core::Block;
use crate::error::Result;
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::info;
use num_bigint::{BigInt, Sign};
use std::borrow::Borrow;
use std::ops::ShlAssign;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fixed global mining difficulty: a valid digest must be below
/// `1 << (256 - TARGET_BITS)`. There is no retargeting.
pub const TARGET_BITS: u32 = 16;

const MAX_NONCE: i64 = i64::MAX;
/// Nonce stride between checks of the cancellation flag.
const CANCEL_CHECK_INTERVAL: i64 = 1024;

/// The mining puzzle for one candidate block.
pub struct ProofOfWork {
    block: Block,
    tx_hash: Vec<u8>,
    target: BigInt,
}

impl ProofOfWork {
    pub fn new_proof_of_work(block: Block) -> Result<ProofOfWork> {
        let tx_hash = block.hash_transactions()?;
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS);
        Ok(ProofOfWork {
            block,
            tx_hash,
            target,
        })
    }

    /// Digest-below-target check with the block's stored nonce. This is the
    /// sole consensus-acceptance rule for a block.
    pub fn validate(block: &Block) -> bool {
        let pow = match ProofOfWork::new_proof_of_work(block.clone()) {
            Ok(pow) => pow,
            Err(_) => return false,
        };
        let data = pow.prepare_data(block.get_nonce());
        let hash = sha256_digest(data.as_slice());
        let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());

        hash_int < pow.target
    }

    /// Digest input: previous hash, transaction commitment, timestamp,
    /// nonce, difficulty bits — all fixed-width big-endian where numeric.
    fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_pre_block_hash().as_bytes());
        data_bytes.extend(self.tx_hash.as_slice());
        data_bytes.extend(self.block.get_timestamp().to_be_bytes());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes.extend(TARGET_BITS.to_be_bytes());
        data_bytes
    }

    /// Search nonces from 0 until the digest falls below the target.
    pub fn run(&self) -> (i64, String) {
        let mut nonce = 0;
        let mut hash = Vec::new();
        info!("Mining block at height {}", self.block.get_height());
        while nonce < MAX_NONCE {
            let data = self.prepare_data(nonce);
            hash = sha256_digest(data.as_slice());
            let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());

            if hash_int.lt(self.target.borrow()) {
                break;
            }
            nonce += 1;
        }
        let hash_hex = HEXLOWER.encode(hash.as_slice());
        info!("Found nonce {nonce}: {hash_hex}");
        (nonce, hash_hex)
    }

    /// Same search, but gives up when `cancel` is raised. `None` means the
    /// search was abandoned; the caller decides whether to retry.
    pub fn run_cancellable(&self, cancel: &AtomicBool) -> Option<(i64, String)> {
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                info!(
                    "Mining cancelled at height {} after {nonce} attempts",
                    self.block.get_height()
                );
                return None;
            }

            let data = self.prepare_data(nonce);
            let hash = sha256_digest(data.as_slice());
            let hash_int = BigInt::from_bytes_be(Sign::Plus, hash.as_slice());

            if hash_int.lt(self.target.borrow()) {
                return Some((nonce, HEXLOWER.encode(hash.as_slice())));
            }
            nonce += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::Wallet;

    fn mined_block() -> Block {
        let wallet = Wallet::new().unwrap();
        let coinbase_tx = Transaction::new_coinbase_tx(&wallet.get_address()).unwrap();
        Block::new_block("prev".to_string(), &[coinbase_tx], 1).unwrap()
    }

    #[test]
    fn target_is_positive() {
        let pow = ProofOfWork::new_proof_of_work(mined_block()).unwrap();
        assert!(pow.target > BigInt::from(0));
    }

    #[test]
    fn mined_block_validates() {
        assert!(ProofOfWork::validate(&mined_block()));
    }

    #[test]
    fn corrupted_nonce_fails_validation() {
        let mut block = mined_block();
        block.corrupt_nonce();
        assert!(!ProofOfWork::validate(&block));
    }

    #[test]
    fn prepare_data_is_deterministic() {
        let pow = ProofOfWork::new_proof_of_work(mined_block()).unwrap();

        assert_eq!(pow.prepare_data(12345), pow.prepare_data(12345));
        assert_ne!(pow.prepare_data(12345), pow.prepare_data(54321));
    }

    #[test]
    fn pre_raised_cancel_stops_immediately() {
        let pow = ProofOfWork::new_proof_of_work(mined_block()).unwrap();
        let cancel = AtomicBool::new(true);
        assert!(pow.run_cancellable(&cancel).is_none());
    }
}
