//! Key management and address encoding.
//!
//! Wallets are ECDSA P-256 key pairs; addresses are the version-prefixed,
//! checksummed base58 encoding of the public key hash.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::{Wallets, WALLET_FILE};
