use clap::Parser;
use data_encoding::HEXLOWER;
use ferrocoin::{
    address_to_pub_key_hash, convert_address, hash_pub_key, send_tx, validate_address, Blockchain,
    Command, Opt, ProofOfWork, Server, Transaction, UTXOSet, Wallets, CENTRAL_NODE, GLOBAL_CONFIG,
};
use log::{error, LevelFilter};
use std::process;

/// `send <from> <to> <amount> 1` mines the transaction on the spot instead
/// of relaying it.
const MINE_TRUE: usize = 1;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

/// Open the ledger for this process: the node-specific database when
/// NODE_ID is configured, the default one otherwise.
fn open_blockchain() -> ferrocoin::Result<Blockchain> {
    match GLOBAL_CONFIG.get_node_id() {
        Some(node_id) => Blockchain::new_blockchain_with_node_id(&node_id),
        None => Blockchain::new_blockchain(),
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let blockchain = match GLOBAL_CONFIG.get_node_id() {
                Some(node_id) => Blockchain::create_blockchain_with_node_id(&address, &node_id)?,
                None => Blockchain::create_blockchain(&address)?,
            };
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::new();
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain);
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::new();
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }

            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain.clone());

            let wallets = Wallets::new();
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("Wallet not found for address: {from}"))?;

            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            if mine == MINE_TRUE {
                // mine on the spot, rewarding the sender
                let coinbase_tx = Transaction::new_coinbase_tx(&from)?;
                let block = blockchain.mine_block(&[coinbase_tx, transaction])?;
                utxo_set.update(&block)?;
            } else {
                send_tx(CENTRAL_NODE, &transaction);
            }
            println!("Success!")
        }
        Command::Printchain => {
            let blockchain = open_blockchain()?;
            let mut block_iterator = blockchain.iterator();
            while let Some(block) = block_iterator.next_block()? {
                println!("Pre block hash: {}", block.get_pre_block_hash());
                println!("Cur block hash: {}", block.get_hash());
                println!("Height: {}", block.get_height());
                println!("Timestamp: {}", block.get_timestamp());
                println!("PoW: {}", ProofOfWork::validate(&block));

                for tx in block.get_transactions() {
                    let cur_txid_hex = HEXLOWER.encode(tx.get_id());
                    println!("- Transaction txid_hex: {cur_txid_hex}");

                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let txid_hex = HEXLOWER.encode(input.get_txid());
                            let pub_key_hash = hash_pub_key(input.get_pub_key());
                            let address = convert_address(pub_key_hash.as_slice());
                            println!(
                                "-- Input txid = {}, vout = {}, from = {}",
                                txid_hex,
                                input.get_vout(),
                                address,
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        let pub_key_hash = output.get_pub_key_hash();
                        let address = convert_address(pub_key_hash);
                        println!("-- Output value = {}, to = {}", output.get_value(), address,)
                    }
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let blockchain = open_blockchain()?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartNode { port, miner } => {
            if let Some(port) = port {
                GLOBAL_CONFIG.set_node_addr(format!("127.0.0.1:{port}"));
            }
            let socket_addr = GLOBAL_CONFIG.get_node_addr();
            if GLOBAL_CONFIG.get_node_id().is_none() {
                GLOBAL_CONFIG.set_node_id(GLOBAL_CONFIG.extract_node_id_from_addr());
            }

            if let Some(addr) = miner {
                if !validate_address(&addr) {
                    return Err(format!("Invalid miner address: {addr}").into());
                }
                println!("Mining is on. Address to receive rewards: {addr}");
                GLOBAL_CONFIG.set_mining_addr(addr);
            }

            // Each node keeps an isolated database keyed by its node id.
            let blockchain = open_blockchain()?;

            let server = Server::new(blockchain);
            server
                .run(&socket_addr)
                .map_err(|e| format!("Server error: {e}"))?
        }
    }
    Ok(())
}
