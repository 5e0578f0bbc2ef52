// UTXO-model transactions: inputs reference previous outputs, outputs lock
// value to a public key hash. Coinbase transactions mint the block subsidy.

use crate::core::Blockchain;
use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::{hash_pub_key, validate_address, Wallet};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed block reward minted by every coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// A reference to a spendable output of a previous transaction.
///
/// `signature` and `pub_key` are empty until the containing transaction is
/// signed. A coinbase input has an empty `txid` and carries arbitrary data
/// in `pub_key` instead of a real key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: usize,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: usize) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> usize {
        self.vout
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }
}

/// An amount locked to the hash of the recipient's public key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        if value == 0 {
            return Err(BlockchainError::Transaction(
                "Output value must be positive".to_string(),
            ));
        }

        let mut output = TXOutput {
            value,
            pub_key_hash: vec![],
        };
        output.lock(address)?;
        Ok(output)
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    fn lock(&mut self, address: &str) -> Result<()> {
        self.pub_key_hash = crate::wallet::address_to_pub_key_hash(address)?;
        Ok(())
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// A transfer of value: consumes previous outputs, creates new ones.
///
/// The id is the SHA-256 of the transaction with the id and all input
/// signatures cleared, so it is identical before and after signing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Coinbase with a fresh UUID as its unlocking data.
    pub fn new_coinbase_tx(to: &str) -> Result<Transaction> {
        Self::new_coinbase_tx_with_data(to, &[])
    }

    /// Coinbase reward of [`SUBSIDY`] to `to`. The single synthetic input
    /// has no previous-transaction reference; `data` keeps the id unique
    /// across coinbases paying the same address.
    pub fn new_coinbase_tx_with_data(to: &str, data: &[u8]) -> Result<Transaction> {
        let txout = TXOutput::new(SUBSIDY, to)?;
        let unlocking_data = if data.is_empty() {
            Uuid::new_v4().as_bytes().to_vec()
        } else {
            data.to_vec()
        };
        let tx_input = TXInput {
            pub_key: unlocking_data,
            ..Default::default()
        };

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![txout],
        };

        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Build and sign a transfer of `amount` from `wallet` to `to`.
    ///
    /// Spendable outputs are selected first-fit from the UTXO index; change
    /// goes back to the sender. Errors with `InsufficientFunds` when the
    /// sender's outputs do not cover the amount.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }
        if !validate_address(to) {
            return Err(BlockchainError::InvalidAddress(to.to_string()));
        }

        let from = wallet.get_address();
        let public_key_hash = hash_pub_key(wallet.get_public_key());

        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Transaction(format!("Invalid transaction ID: {e}"))
            })?;
            for out in outs {
                inputs.push(TXInput {
                    txid: txid.clone(),
                    vout: out,
                    signature: vec![],
                    pub_key: wallet.get_public_key().to_vec(),
                });
            }
        }

        let mut outputs = vec![TXOutput::new(amount, to)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::new(change, &from)?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };

        tx.id = tx.hash()?;
        tx.sign(utxo_set.get_blockchain(), wallet.get_pkcs8())?;
        Ok(tx)
    }

    /// Copy with signatures and public keys stripped from every input; the
    /// shape over which signing digests are computed.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput::new(input.get_txid(), input.get_vout()))
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    fn sign(&mut self, blockchain: &Blockchain, pkcs8: &[u8]) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut tx_copy = self.trimmed_copy();

        for (idx, vin) in self.vin.iter_mut().enumerate() {
            let prev_tx = blockchain
                .find_transaction(vin.get_txid())?
                .ok_or_else(|| {
                    BlockchainError::Transaction(
                        "Referenced transaction not found".to_string(),
                    )
                })?;

            if vin.vout >= prev_tx.vout.len() {
                return Err(BlockchainError::Transaction(
                    "Invalid output index".to_string(),
                ));
            }

            // The digest covers the trimmed transaction with this input's
            // pub_key slot holding the referenced output's locking hash.
            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = prev_tx.vout[vin.vout].pub_key_hash.clone();
            tx_copy.id = tx_copy.hash()?;
            tx_copy.vin[idx].pub_key = vec![];

            vin.signature = ecdsa_p256_sha256_sign_digest(pkcs8, tx_copy.get_id())?;
        }
        Ok(())
    }

    /// Check every input signature against the chain.
    ///
    /// Coinbase transactions are trivially valid. For the rest, each input
    /// must reference an existing output locked to the hash of the input's
    /// declared public key, the signature must verify over the recomputed
    /// digest, and the output total must not exceed the input total. Any
    /// failure, including a missing referenced transaction, yields `false`.
    pub fn verify(&self, blockchain: &Blockchain) -> bool {
        if self.is_coinbase() {
            return true;
        }

        let mut tx_copy = self.trimmed_copy();
        let mut input_total: u64 = 0;

        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_tx = match blockchain.find_transaction(vin.get_txid()) {
                Ok(Some(tx)) => tx,
                Ok(None) => {
                    log::error!("Referenced transaction not found during verification");
                    return false;
                }
                Err(e) => {
                    log::error!("Chain lookup failed during verification: {e}");
                    return false;
                }
            };

            if vin.vout >= prev_tx.vout.len() {
                log::error!("Invalid output index during verification");
                return false;
            }
            let prev_out = &prev_tx.vout[vin.vout];

            // The claimed key must hash to the referenced output's lock.
            if hash_pub_key(vin.pub_key.as_slice()) != prev_out.pub_key_hash {
                log::error!("Input public key does not match the referenced output lock");
                return false;
            }

            input_total = match input_total.checked_add(prev_out.value) {
                Some(sum) => sum,
                None => {
                    log::error!("Input value overflow during verification");
                    return false;
                }
            };

            tx_copy.vin[idx].signature = vec![];
            tx_copy.vin[idx].pub_key = prev_out.pub_key_hash.clone();
            tx_copy.id = match tx_copy.hash() {
                Ok(id) => id,
                Err(e) => {
                    log::error!("Failed to compute signing digest: {e}");
                    return false;
                }
            };
            tx_copy.vin[idx].pub_key = vec![];

            if !ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                tx_copy.get_id(),
            ) {
                return false;
            }
        }

        let mut output_total: u64 = 0;
        for vout in &self.vout {
            output_total = match output_total.checked_add(vout.get_value()) {
                Some(sum) => sum,
                None => {
                    log::error!("Output value overflow during verification");
                    return false;
                }
            };
        }

        // No value may be created out of thin air.
        output_total <= input_total
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty()
    }

    /// Digest with the id and all input signatures cleared.
    fn hash(&self) -> Result<Vec<u8>> {
        let mut tx_copy = self.clone();
        tx_copy.id = vec![];
        for vin in tx_copy.vin.iter_mut() {
            vin.signature = vec![];
        }
        Ok(sha256_digest(tx_copy.serialize()?.as_slice()))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_id_bytes(&self) -> Vec<u8> {
        self.id.clone()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }

    /// Corrupt an input signature in place. Test-only escape hatch.
    #[cfg(test)]
    pub fn tamper_input_signature(&mut self, idx: usize) {
        self.vin[idx].signature = vec![0u8; self.vin[idx].signature.len().max(64)];
    }
}
