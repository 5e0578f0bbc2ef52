//! End-to-end scenarios against real sled storage in temp directories:
//! ledger lifecycle, balance movement, UTXO consistency, the tip rule, and
//! block replication between two independent chains.

use ferrocoin::{
    hash_pub_key, Block, Blockchain, BlockchainError, ProofOfWork, Transaction, UTXOSet, Wallet,
    SUBSIDY,
};
use tempfile::{tempdir, TempDir};

fn chain_path(dir: &TempDir) -> String {
    dir.path().join("chain").to_str().unwrap().to_string()
}

fn new_chain(wallet: &Wallet, dir: &TempDir) -> Blockchain {
    Blockchain::create_blockchain_with_path(&wallet.get_address(), &chain_path(dir)).unwrap()
}

fn balance(utxo_set: &UTXOSet, wallet: &Wallet) -> u64 {
    utxo_set
        .get_balance(&hash_pub_key(wallet.get_public_key()))
        .unwrap()
}

#[test]
fn genesis_ledger_invariants() {
    let dir = tempdir().unwrap();
    let wallet = Wallet::new().unwrap();
    let other = Wallet::new().unwrap();

    {
        let blockchain = new_chain(&wallet, &dir);
        assert_eq!(blockchain.get_best_height().unwrap(), 0);

        // exactly one block: a coinbase-only genesis with no predecessor
        let mut iterator = blockchain.iterator();
        let genesis = iterator.next_block().unwrap().unwrap();
        assert!(iterator.next_block().unwrap().is_none());

        assert!(genesis.is_genesis());
        assert_eq!(genesis.get_height(), 0);
        assert!(genesis.get_pre_block_hash().is_empty());
        assert_eq!(genesis.get_transactions().len(), 1);
        assert!(genesis.get_transactions()[0].is_coinbase());
        assert!(ProofOfWork::validate(&genesis));

        let utxo_set = UTXOSet::new(blockchain);
        utxo_set.reindex().unwrap();
        assert_eq!(balance(&utxo_set, &wallet), SUBSIDY);
        assert_eq!(balance(&utxo_set, &other), 0);
    }

    // the ledger is already persisted there
    let err = Blockchain::create_blockchain_with_path(&wallet.get_address(), &chain_path(&dir))
        .unwrap_err();
    assert!(matches!(err, BlockchainError::LedgerExists(_)));
}

#[test]
fn opening_a_missing_ledger_fails() {
    let dir = tempdir().unwrap();
    let err = Blockchain::new_blockchain_with_path(&chain_path(&dir)).unwrap_err();
    assert!(matches!(err, BlockchainError::LedgerNotFound(_)));
}

#[test]
fn chain_survives_reopen() {
    let dir = tempdir().unwrap();
    let wallet = Wallet::new().unwrap();
    let tip_hash;

    {
        let blockchain = new_chain(&wallet, &dir);
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address()).unwrap();
        blockchain.mine_block(&[coinbase]).unwrap();
        assert_eq!(blockchain.get_best_height().unwrap(), 1);
        tip_hash = blockchain.get_tip_hash();
    }

    let blockchain = Blockchain::new_blockchain_with_path(&chain_path(&dir)).unwrap();
    assert_eq!(blockchain.get_best_height().unwrap(), 1);
    assert_eq!(blockchain.get_tip_hash(), tip_hash);
}

#[test]
fn send_moves_exactly_the_amount() {
    let dir = tempdir().unwrap();
    let sender = Wallet::new().unwrap();
    let recipient = Wallet::new().unwrap();
    let miner = Wallet::new().unwrap();

    let blockchain = new_chain(&sender, &dir);
    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();
    assert_eq!(balance(&utxo_set, &sender), SUBSIDY);

    // 4 to the recipient, change back to the sender
    let tx =
        Transaction::new_utxo_transaction(&sender, &recipient.get_address(), 4, &utxo_set).unwrap();
    let coinbase = Transaction::new_coinbase_tx(&miner.get_address()).unwrap();
    let block = blockchain.mine_block(&[coinbase, tx]).unwrap();
    assert_eq!(block.get_height(), 1);

    utxo_set.update(&block).unwrap();
    assert_eq!(balance(&utxo_set, &sender), SUBSIDY - 4);
    assert_eq!(balance(&utxo_set, &recipient), 4);
    assert_eq!(balance(&utxo_set, &miner), SUBSIDY);
}

#[test]
fn overspending_fails_without_mining() {
    let dir = tempdir().unwrap();
    let sender = Wallet::new().unwrap();
    let recipient = Wallet::new().unwrap();

    let blockchain = new_chain(&sender, &dir);
    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    let err =
        Transaction::new_utxo_transaction(&sender, &recipient.get_address(), SUBSIDY * 5, &utxo_set)
            .unwrap_err();
    match err {
        BlockchainError::InsufficientFunds {
            required,
            available,
        } => {
            assert_eq!(required, SUBSIDY * 5);
            assert_eq!(available, SUBSIDY);
        }
        other => panic!("unexpected error: {other}"),
    }

    // nothing was mined, nothing moved
    assert_eq!(blockchain.get_best_height().unwrap(), 0);
    assert_eq!(balance(&utxo_set, &sender), SUBSIDY);
    assert_eq!(balance(&utxo_set, &recipient), 0);
}

#[test]
fn incremental_update_matches_full_reindex() {
    let dir = tempdir().unwrap();
    let sender = Wallet::new().unwrap();
    let recipient = Wallet::new().unwrap();
    let miner = Wallet::new().unwrap();

    let blockchain = new_chain(&sender, &dir);
    let utxo_set = UTXOSet::new(blockchain.clone());
    utxo_set.reindex().unwrap();

    // a few rounds of spending, folding each block in incrementally
    for amount in [2, 3] {
        let tx = Transaction::new_utxo_transaction(
            &sender,
            &recipient.get_address(),
            amount,
            &utxo_set,
        )
        .unwrap();
        let coinbase = Transaction::new_coinbase_tx(&miner.get_address()).unwrap();
        let block = blockchain.mine_block(&[coinbase, tx]).unwrap();
        utxo_set.update(&block).unwrap();
    }

    let incremental = (
        balance(&utxo_set, &sender),
        balance(&utxo_set, &recipient),
        balance(&utxo_set, &miner),
        utxo_set.count_transactions().unwrap(),
    );

    // a full rebuild over the same chain must agree
    utxo_set.reindex().unwrap();
    let rebuilt = (
        balance(&utxo_set, &sender),
        balance(&utxo_set, &recipient),
        balance(&utxo_set, &miner),
        utxo_set.count_transactions().unwrap(),
    );

    assert_eq!(incremental, rebuilt);
    assert_eq!(incremental.0, SUBSIDY - 5);
    assert_eq!(incremental.1, 5);
    assert_eq!(incremental.2, SUBSIDY * 2);
}

#[test]
fn tip_never_moves_backward() {
    let dir = tempdir().unwrap();
    let wallet = Wallet::new().unwrap();

    let blockchain = new_chain(&wallet, &dir);
    let genesis_hash = blockchain.get_tip_hash();

    for _ in 0..2 {
        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address()).unwrap();
        blockchain.mine_block(&[coinbase]).unwrap();
    }
    assert_eq!(blockchain.get_best_height().unwrap(), 2);
    let tip_hash = blockchain.get_tip_hash();

    // a competing block at height 1 is stored but does not win
    let coinbase = Transaction::new_coinbase_tx(&wallet.get_address()).unwrap();
    let stale_block = Block::new_block(genesis_hash, &[coinbase], 1).unwrap();
    blockchain.add_block(&stale_block).unwrap();

    assert!(blockchain.block_exists(stale_block.get_hash()).unwrap());
    assert_eq!(blockchain.get_tip_hash(), tip_hash);
    assert_eq!(blockchain.get_best_height().unwrap(), 2);

    // adding it again is a no-op
    blockchain.add_block(&stale_block).unwrap();
    assert_eq!(blockchain.get_tip_hash(), tip_hash);

    // a block extending the tip does win
    let coinbase = Transaction::new_coinbase_tx(&wallet.get_address()).unwrap();
    let next_block = Block::new_block(tip_hash, &[coinbase], 3).unwrap();
    blockchain.add_block(&next_block).unwrap();
    assert_eq!(blockchain.get_best_height().unwrap(), 3);
    assert_eq!(blockchain.get_tip_hash(), next_block.get_hash());
}

#[test]
fn corrupted_block_is_rejected_outright() {
    let dir = tempdir().unwrap();
    let wallet = Wallet::new().unwrap();

    let blockchain = new_chain(&wallet, &dir);
    let tip_hash = blockchain.get_tip_hash();

    let coinbase = Transaction::new_coinbase_tx(&wallet.get_address()).unwrap();
    let block = Block::new_block(tip_hash.clone(), &[coinbase], 1).unwrap();

    // flip one character of the previous-hash inside the wire bytes; the
    // stored nonce no longer satisfies the target
    let bytes = block.serialize().unwrap();
    let needle = tip_hash.as_bytes();
    let pos = bytes
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap();
    let mut tampered = bytes.clone();
    tampered[pos] = if tampered[pos] == b'a' { b'b' } else { b'a' };

    let tampered_block = Block::deserialize(&tampered).unwrap();
    assert!(!ProofOfWork::validate(&tampered_block));

    let err = blockchain.add_block(&tampered_block).unwrap_err();
    assert!(matches!(err, BlockchainError::InvalidBlock(_)));
    assert_eq!(blockchain.get_best_height().unwrap(), 0);

    // the untampered block is fine
    blockchain.add_block(&block).unwrap();
    assert_eq!(blockchain.get_best_height().unwrap(), 1);
}

#[test]
fn block_wire_round_trip() {
    let dir = tempdir().unwrap();
    let wallet = Wallet::new().unwrap();

    let blockchain = new_chain(&wallet, &dir);
    let coinbase = Transaction::new_coinbase_tx(&wallet.get_address()).unwrap();
    let block = blockchain.mine_block(&[coinbase]).unwrap();

    let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
    assert_eq!(block, decoded);
}

#[test]
fn replicated_chain_converges_to_the_same_tip() {
    let dir_x = tempdir().unwrap();
    let dir_y = tempdir().unwrap();
    let wallet_x = Wallet::new().unwrap();
    let wallet_y = Wallet::new().unwrap();

    // node X mines a couple of blocks
    let chain_x = new_chain(&wallet_x, &dir_x);
    for _ in 0..2 {
        let coinbase = Transaction::new_coinbase_tx(&wallet_x.get_address()).unwrap();
        chain_x.mine_block(&[coinbase]).unwrap();
    }

    // node Y starts from its own genesis and receives X's inventory,
    // tip first, each block passing through the wire encoding
    let chain_y = new_chain(&wallet_y, &dir_y);
    for hash in chain_x.get_block_hashes().unwrap() {
        let block = chain_x.get_block_by_bytes(&hash).unwrap().unwrap();
        let wire_bytes = block.serialize().unwrap();
        chain_y.add_block(&Block::deserialize(&wire_bytes).unwrap()).unwrap();
    }

    assert_eq!(chain_y.get_tip_hash(), chain_x.get_tip_hash());
    assert_eq!(
        chain_y.get_best_height().unwrap(),
        chain_x.get_best_height().unwrap()
    );

    // after a rebuild, Y sees the same spendable money as X
    let utxo_x = UTXOSet::new(chain_x);
    let utxo_y = UTXOSet::new(chain_y);
    utxo_x.reindex().unwrap();
    utxo_y.reindex().unwrap();
    assert_eq!(balance(&utxo_y, &wallet_x), balance(&utxo_x, &wallet_x));
    assert_eq!(balance(&utxo_y, &wallet_x), SUBSIDY * 3);
}
