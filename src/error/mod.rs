//! Crate-wide error type and result alias.

use std::fmt;

/// Result type alias used throughout the node.
pub type Result<T> = std::result::Result<T, BlockchainError>;

/// Every failure a node operation can surface to its caller.
///
/// Verification predicates return `bool`; everything else returns `Result`.
/// Only `main` turns an error into a process exit.
#[derive(Debug, Clone)]
pub enum BlockchainError {
    /// A ledger is already persisted where `createblockchain` would put one.
    LedgerExists(String),
    /// No ledger persisted where one was expected to be opened.
    LedgerNotFound(String),
    /// Underlying key-value store failure.
    Database(String),
    /// The stored chain is internally inconsistent (dangling previous-hash,
    /// undecodable block).
    Integrity(String),
    /// Cryptographic operation failure (key generation, signing).
    Crypto(String),
    /// Peer communication failure.
    Network(String),
    /// Transaction-level validation failure.
    Transaction(String),
    /// Wallet lookup or key-file failure.
    Wallet(String),
    /// Encoding/decoding failure.
    Serialization(String),
    /// File I/O failure.
    Io(String),
    /// Malformed or checksum-failing address.
    InvalidAddress(String),
    /// Spendable outputs do not cover the requested amount.
    InsufficientFunds { required: u64, available: u64 },
    /// Block-level validation failure (empty block, failed proof-of-work).
    InvalidBlock(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::LedgerExists(path) => {
                write!(f, "Ledger already exists at {path}")
            }
            BlockchainError::LedgerNotFound(path) => {
                write!(f, "No ledger found at {path}. Create one first.")
            }
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Integrity(msg) => write!(f, "Chain integrity error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Network(msg) => write!(f, "Network error: {msg}"),
            BlockchainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}
