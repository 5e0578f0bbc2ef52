//! Helpers for exercising a chain against throwaway storage.

use crate::core::{Blockchain, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::wallet::{hash_pub_key, Wallet};
use tempfile::TempDir;

pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| BlockchainError::Io(e.to_string()))
}

/// A fresh chain in a temp directory, with the genesis reward paid to a
/// fresh in-memory wallet.
pub fn create_test_blockchain() -> Result<(Blockchain, Wallet, TempDir)> {
    let temp_dir = create_temp_dir()?;
    let wallet = Wallet::new()?;
    let db_path = temp_dir.path().join("chain");

    let blockchain = Blockchain::create_blockchain_with_path(
        &wallet.get_address(),
        db_path.to_str().expect("temp path is valid UTF-8"),
    )?;

    Ok((blockchain, wallet, temp_dir))
}

pub fn balance_of(utxo_set: &UTXOSet, wallet: &Wallet) -> Result<u64> {
    utxo_set.get_balance(&hash_pub_key(wallet.get_public_key()))
}

/// Walk the whole chain checking linkage and proof-of-work.
pub fn validate_chain_integrity(blockchain: &Blockchain) -> Result<bool> {
    let mut iterator = blockchain.iterator();
    let mut expected_hash = blockchain.get_tip_hash();

    while let Some(block) = iterator.next_block()? {
        if block.get_hash() != expected_hash {
            return Ok(false);
        }
        if !ProofOfWork::validate(&block) {
            return Ok(false);
        }
        expected_hash = block.get_pre_block_hash();
    }

    // The walk must have ended at genesis.
    Ok(expected_hash.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SUBSIDY;

    #[test]
    fn fresh_chain_is_intact() {
        let (blockchain, _wallet, _temp_dir) = create_test_blockchain().unwrap();
        assert_eq!(blockchain.get_best_height().unwrap(), 0);
        assert!(validate_chain_integrity(&blockchain).unwrap());
    }

    #[test]
    fn genesis_reward_is_spendable() {
        let (blockchain, wallet, _temp_dir) = create_test_blockchain().unwrap();
        let utxo_set = UTXOSet::new(blockchain);
        utxo_set.reindex().unwrap();
        assert_eq!(balance_of(&utxo_set, &wallet).unwrap(), SUBSIDY);
    }

    #[test]
    fn signed_transaction_verifies_and_tampered_does_not() {
        let (blockchain, wallet, _temp_dir) = create_test_blockchain().unwrap();
        let utxo_set = UTXOSet::new(blockchain.clone());
        utxo_set.reindex().unwrap();

        let recipient = Wallet::new().unwrap();
        let mut tx =
            Transaction::new_utxo_transaction(&wallet, &recipient.get_address(), 3, &utxo_set)
                .unwrap();

        assert!(tx.verify(&blockchain));

        tx.tamper_input_signature(0);
        assert!(!tx.verify(&blockchain));
    }

    #[test]
    fn mined_transaction_remains_verifiable() {
        let (blockchain, wallet, _temp_dir) = create_test_blockchain().unwrap();
        let utxo_set = UTXOSet::new(blockchain.clone());
        utxo_set.reindex().unwrap();

        // the engine re-derives the digest from the chain, so inclusion in
        // a block must not change the verdict
        let recipient = Wallet::new().unwrap();
        let tx =
            Transaction::new_utxo_transaction(&wallet, &recipient.get_address(), 3, &utxo_set)
                .unwrap();
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address()).unwrap();
        blockchain.mine_block(&[coinbase, tx.clone()]).unwrap();
        assert!(tx.verify(&blockchain));
    }
}
