//! # Ferrocoin
//!
//! A minimal proof-of-work cryptocurrency node: an append-only ledger of
//! blocks carrying signed value transfers, mined against a fixed hash
//! difficulty and replicated between peers over a small TCP gossip
//! protocol.
//!
//! Layout:
//! - `core/`: blocks, transactions, proof-of-work, the sled-backed chain
//! - `storage/`: the UTXO index, the mempool, the block download queue
//! - `network/`: the peer protocol and the mining worker
//! - `wallet/`: ECDSA P-256 keys, addresses, the wallet file
//! - `config/`, `cli/`: node configuration and the command surface
//! - `utils/`: hashing, signing, base58 and bincode helpers
//! - `error/`: the crate-wide error enum
//!
//! The chain store is authoritative; the UTXO index is a rebuildable cache
//! over it. Consensus is deliberately simple: fixed difficulty and a
//! "highest block wins" tip rule, with the first-configured peer trusted as
//! the transaction relay hub.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

// Commonly used types, re-exported for convenience
pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, BlockchainIterator, ProofOfWork, TXInput, TXOutput, Transaction, SUBSIDY,
    TARGET_BITS,
};
pub use error::{BlockchainError, Result};
pub use network::{send_tx, Node, Nodes, Server, CENTRAL_NODE, TRANSACTION_THRESHOLD};
pub use storage::{BlockInTransit, MemoryPool, UTXOSet};
pub use utils::{
    base58_decode, base58_encode, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
