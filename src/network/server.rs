// The peer protocol. One TCP connection carries one command; handlers run
// on their own threads against the shared NodeContext, and mining happens on
// a dedicated worker so no handler ever blocks on proof-of-work.

use crate::config::GLOBAL_CONFIG;
use crate::core::{Block, Blockchain, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::Nodes;
use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
use data_encoding::HEXLOWER;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Deserializer;
use std::collections::HashSet;
use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

const NODE_VERSION: usize = 1;

/// The first-configured peer, trusted as the transaction relay hub. An
/// explicit simplification of this topology, not an oversight.
pub const CENTRAL_NODE: &str = "127.0.0.1:2001";

/// Pool size at which a mining node assembles a block.
pub const TRANSACTION_THRESHOLD: usize = 2;

const TCP_WRITE_TIMEOUT: u64 = 5000;

/// What an inventory or data request refers to.
#[derive(Debug, Serialize, Deserialize)]
pub enum OpType {
    Tx,
    Block,
}

/// One protocol message. The serde tag is the command tag; the payload
/// fields follow it. Blocks and transactions travel as their canonical
/// bincode bytes.
#[derive(Debug, Serialize, Deserialize)]
pub enum Package {
    Addr {
        addr_from: String,
        addr_list: Vec<String>,
    },
    Block {
        addr_from: String,
        block: Vec<u8>,
    },
    GetBlocks {
        addr_from: String,
    },
    GetData {
        addr_from: String,
        op_type: OpType,
        id: Vec<u8>,
    },
    Inv {
        addr_from: String,
        op_type: OpType,
        items: Vec<Vec<u8>>,
    },
    Tx {
        addr_from: String,
        transaction: Vec<u8>,
    },
    Version {
        addr_from: String,
        version: usize,
        best_height: usize,
    },
}

impl Package {
    fn command(&self) -> &'static str {
        match self {
            Package::Addr { .. } => "addr",
            Package::Block { .. } => "block",
            Package::GetBlocks { .. } => "getblocks",
            Package::GetData { .. } => "getdata",
            Package::Inv { .. } => "inv",
            Package::Tx { .. } => "tx",
            Package::Version { .. } => "version",
        }
    }
}

/// All mutable protocol state of one node, shared between the listener, the
/// connection handlers and the mining worker. Never a process-wide global.
pub struct NodeContext {
    blockchain: Blockchain,
    mempool: MemoryPool,
    blocks_in_transit: BlockInTransit,
    known_nodes: Nodes,
    /// Raised by a received block to preempt an in-progress mining search.
    mining_cancel: AtomicBool,
}

/// The P2P server: accepts connections and hands each to its own thread.
pub struct Server {
    ctx: Arc<NodeContext>,
}

impl Server {
    pub fn new(blockchain: Blockchain) -> Server {
        let ctx = NodeContext {
            blockchain,
            mempool: MemoryPool::new(),
            blocks_in_transit: BlockInTransit::new(),
            known_nodes: Nodes::new(),
            mining_cancel: AtomicBool::new(false),
        };
        ctx.known_nodes.add_node(String::from(CENTRAL_NODE));

        Server { ctx: Arc::new(ctx) }
    }

    pub fn run(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        info!("Node listening on {addr}");

        // Mining requests from handlers are queued to this worker; the
        // handler threads themselves never run proof-of-work.
        let (mine_sender, mine_receiver) = mpsc::channel();
        {
            let ctx = Arc::clone(&self.ctx);
            thread::spawn(move || mine_worker(ctx, mine_receiver));
        }

        if addr != CENTRAL_NODE {
            let best_height = self.ctx.blockchain.get_best_height()?;
            if let Err(e) = self.ctx.send_version(CENTRAL_NODE, best_height) {
                warn!("Could not reach the central node at startup: {e}");
            }
        }

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let ctx = Arc::clone(&self.ctx);
                    let mine_sender = mine_sender.clone();
                    thread::spawn(move || {
                        if let Err(e) = handle_connection(ctx, mine_sender, stream) {
                            error!("Connection handler error: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }

        Ok(())
    }
}

/// Read messages off one connection, dispatch each, close. A malformed
/// payload drops the connection without crashing the node.
fn handle_connection(
    ctx: Arc<NodeContext>,
    mine_sender: Sender<()>,
    stream: TcpStream,
) -> Result<()> {
    stream
        .set_read_timeout(Some(Duration::from_secs(60)))
        .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;

    let reader = BufReader::new(&stream);
    let pkg_reader = Deserializer::from_reader(reader).into_iter::<Package>();

    for pkg in pkg_reader {
        match pkg {
            Ok(pkg) => {
                info!("Received {} command", pkg.command());
                if let Err(e) = ctx.process_package(&mine_sender, pkg) {
                    error!("Error processing message: {e}");
                }
            }
            Err(e) => {
                warn!("Dropping connection with malformed payload: {e}");
                break;
            }
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}

/// Drains mining requests one at a time; at most one proof-of-work search
/// runs per node.
fn mine_worker(ctx: Arc<NodeContext>, requests: Receiver<()>) {
    while requests.recv().is_ok() {
        if let Err(e) = ctx.mine_pending_transactions() {
            error!("Mining round failed: {e}");
        }
    }
}

impl NodeContext {
    fn node_addr(&self) -> String {
        GLOBAL_CONFIG.get_node_addr()
    }

    fn process_package(&self, mine_sender: &Sender<()>, pkg: Package) -> Result<()> {
        match pkg {
            Package::Addr { addr_list, .. } => self.handle_addr(addr_list),
            Package::Block { addr_from, block } => self.handle_block(addr_from, block),
            Package::GetBlocks { addr_from } => self.handle_get_blocks(addr_from),
            Package::GetData {
                addr_from,
                op_type,
                id,
            } => self.handle_get_data(addr_from, op_type, id),
            Package::Inv {
                addr_from,
                op_type,
                items,
            } => self.handle_inv(addr_from, op_type, items),
            Package::Tx {
                addr_from,
                transaction,
            } => self.handle_tx(mine_sender, addr_from, transaction),
            Package::Version {
                addr_from,
                version: _,
                best_height,
            } => self.handle_version(addr_from, best_height),
        }
    }

    /// Height comparison drives sync: ask a taller peer for its blocks,
    /// tell a shorter one about ours. Either way the sender becomes known.
    fn handle_version(&self, addr_from: String, best_height: usize) -> Result<()> {
        let local_best_height = self.blockchain.get_best_height()?;
        if local_best_height < best_height {
            self.send_get_blocks(&addr_from)?;
        } else if local_best_height > best_height {
            self.send_version(&addr_from, local_best_height)?;
        }

        if !self.known_nodes.node_is_known(&addr_from) {
            info!("New peer {addr_from} connected");
            self.known_nodes.add_node(addr_from);
        }
        Ok(())
    }

    fn handle_addr(&self, addr_list: Vec<String>) -> Result<()> {
        let node_addr = self.node_addr();
        for addr in addr_list {
            if addr == node_addr || self.known_nodes.node_is_known(&addr) {
                continue;
            }
            self.known_nodes.add_node(addr.clone());
            if let Err(e) = self.send_get_blocks(&addr) {
                warn!("Could not request blocks from new peer {addr}: {e}");
            }
        }
        info!("{} known peers", self.known_nodes.len());
        Ok(())
    }

    fn handle_get_blocks(&self, addr_from: String) -> Result<()> {
        let hashes = self.blockchain.get_block_hashes()?;
        self.send_inv(&addr_from, OpType::Block, &hashes)
    }

    fn handle_inv(&self, addr_from: String, op_type: OpType, items: Vec<Vec<u8>>) -> Result<()> {
        match op_type {
            OpType::Block => {
                self.blocks_in_transit.add_blocks(&items);
                if let Some(block_hash) = items.first() {
                    self.send_get_data(&addr_from, OpType::Block, block_hash)?;
                    self.blocks_in_transit.remove(block_hash);
                }
            }
            OpType::Tx => {
                if let Some(txid) = items.first() {
                    let txid_hex = HEXLOWER.encode(txid);
                    if !self.mempool.contains(&txid_hex) {
                        self.send_get_data(&addr_from, OpType::Tx, txid)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Serve a block or pooled transaction back to the requester. Misses
    /// are answered best-effort: logged, never fatal.
    fn handle_get_data(&self, addr_from: String, op_type: OpType, id: Vec<u8>) -> Result<()> {
        match op_type {
            OpType::Block => match self.blockchain.get_block_by_bytes(&id)? {
                Some(block) => self.send_block(&addr_from, &block)?,
                None => info!("Requested block not found"),
            },
            OpType::Tx => {
                let txid_hex = HEXLOWER.encode(&id);
                match self.mempool.get(&txid_hex) {
                    Some(tx) => self.send_tx_pkg(&addr_from, &tx)?,
                    None => info!("Requested transaction {txid_hex} not in pool"),
                }
            }
        }
        Ok(())
    }

    fn handle_block(&self, addr_from: String, block_data: Vec<u8>) -> Result<()> {
        let block = Block::deserialize(&block_data)?;

        // Preempt any in-progress mining; the worker re-evaluates against
        // the new tip.
        self.mining_cancel.store(true, Ordering::Relaxed);

        self.blockchain.add_block(&block)?;
        info!(
            "Added block {} (height {}) from {addr_from}",
            block.get_hash(),
            block.get_height()
        );

        // Whatever the block confirmed no longer belongs in the pool.
        for tx in block.get_transactions() {
            self.mempool.remove(&HEXLOWER.encode(tx.get_id()));
        }

        if let Some(block_hash) = self.blocks_in_transit.first() {
            self.send_get_data(&addr_from, OpType::Block, &block_hash)?;
            self.blocks_in_transit.remove(&block_hash);
        } else {
            UTXOSet::new(self.blockchain.clone()).reindex()?;
        }
        Ok(())
    }

    fn handle_tx(
        &self,
        mine_sender: &Sender<()>,
        addr_from: String,
        transaction_data: Vec<u8>,
    ) -> Result<()> {
        let tx = Transaction::deserialize(&transaction_data)?;
        let txid = tx.get_id_bytes();
        self.mempool.add(tx);
        info!(
            "Pooled transaction {} from {addr_from}",
            HEXLOWER.encode(&txid)
        );

        let node_addr = self.node_addr();
        if node_addr == CENTRAL_NODE {
            // Relay hub: announce to everyone except ourselves and the
            // sender.
            for node in self.known_nodes.get_nodes() {
                let peer = node.get_addr();
                if peer != node_addr && peer != addr_from {
                    if let Err(e) = self.send_inv(&peer, OpType::Tx, &[txid.clone()]) {
                        warn!("Could not relay transaction to {peer}: {e}");
                    }
                }
            }
        } else if self.mempool.len() >= TRANSACTION_THRESHOLD && GLOBAL_CONFIG.is_miner() {
            // Handlers only enqueue; the worker owns proof-of-work.
            if mine_sender.send(()).is_err() {
                error!("Mining worker is gone; request dropped");
            }
        }
        Ok(())
    }

    /// One mining round: snapshot the pool, keep what verifies (skipping
    /// conflicting spends), reward ourselves, mine, publish. Retries after
    /// a preemption; skips the round when nothing verifiable is pending.
    fn mine_pending_transactions(&self) -> Result<()> {
        let mining_address = match GLOBAL_CONFIG.get_mining_addr() {
            Some(addr) => addr,
            None => return Ok(()),
        };

        loop {
            let mut claimed: HashSet<(Vec<u8>, usize)> = HashSet::new();
            let mut txs: Vec<Transaction> = vec![];
            for tx in self.mempool.get_all() {
                if !tx.verify(&self.blockchain) {
                    continue;
                }
                let conflicts = tx.get_vin().iter().any(|vin| {
                    claimed.contains(&(vin.get_txid().to_vec(), vin.get_vout()))
                });
                if conflicts {
                    continue;
                }
                for vin in tx.get_vin() {
                    claimed.insert((vin.get_txid().to_vec(), vin.get_vout()));
                }
                txs.push(tx);
            }

            if txs.is_empty() {
                info!("No verifiable transactions pending; mining skipped");
                return Ok(());
            }

            let coinbase_tx = Transaction::new_coinbase_tx(&mining_address)?;
            txs.push(coinbase_tx);

            self.mining_cancel.store(false, Ordering::Relaxed);
            let new_block = match self
                .blockchain
                .mine_block_cancellable(&txs, &self.mining_cancel)?
            {
                Some(block) => block,
                None => {
                    info!("Mining preempted by a received block; re-evaluating pool");
                    continue;
                }
            };

            UTXOSet::new(self.blockchain.clone()).reindex()?;
            info!(
                "Mined block {} with {} transactions",
                new_block.get_hash(),
                txs.len()
            );

            for tx in &txs {
                self.mempool.remove(&HEXLOWER.encode(tx.get_id()));
            }

            let node_addr = self.node_addr();
            for node in self.known_nodes.get_nodes() {
                let peer = node.get_addr();
                if peer != node_addr {
                    if let Err(e) =
                        self.send_inv(&peer, OpType::Block, &[new_block.get_hash_bytes()])
                    {
                        warn!("Could not announce block to {peer}: {e}");
                    }
                }
            }
            return Ok(());
        }
    }

    fn send_version(&self, addr: &str, height: usize) -> Result<()> {
        self.send_data(
            addr,
            Package::Version {
                addr_from: self.node_addr(),
                version: NODE_VERSION,
                best_height: height,
            },
        )
    }

    fn send_get_blocks(&self, addr: &str) -> Result<()> {
        self.send_data(
            addr,
            Package::GetBlocks {
                addr_from: self.node_addr(),
            },
        )
    }

    fn send_get_data(&self, addr: &str, op_type: OpType, id: &[u8]) -> Result<()> {
        self.send_data(
            addr,
            Package::GetData {
                addr_from: self.node_addr(),
                op_type,
                id: id.to_vec(),
            },
        )
    }

    fn send_inv(&self, addr: &str, op_type: OpType, items: &[Vec<u8>]) -> Result<()> {
        self.send_data(
            addr,
            Package::Inv {
                addr_from: self.node_addr(),
                op_type,
                items: items.to_vec(),
            },
        )
    }

    fn send_block(&self, addr: &str, block: &Block) -> Result<()> {
        self.send_data(
            addr,
            Package::Block {
                addr_from: self.node_addr(),
                block: block.serialize()?,
            },
        )
    }

    fn send_tx_pkg(&self, addr: &str, tx: &Transaction) -> Result<()> {
        self.send_data(
            addr,
            Package::Tx {
                addr_from: self.node_addr(),
                transaction: tx.serialize()?,
            },
        )
    }

    /// Dial, write one message, done. An unreachable peer is evicted from
    /// the known set and the failure reported to the caller.
    fn send_data(&self, addr: &str, pkg: Package) -> Result<()> {
        let socket_addr = addr
            .parse::<SocketAddr>()
            .map_err(|e| BlockchainError::Network(format!("Invalid address {addr}: {e}")))?;

        let stream = match TcpStream::connect_timeout(
            &socket_addr,
            Duration::from_millis(TCP_WRITE_TIMEOUT),
        ) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Peer {addr} is unreachable, removing it: {e}");
                self.known_nodes.evict_node(addr);
                return Err(BlockchainError::Network(format!(
                    "Failed to connect to {addr}: {e}"
                )));
            }
        };

        stream
            .set_write_timeout(Some(Duration::from_millis(TCP_WRITE_TIMEOUT)))
            .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;

        serde_json::to_writer(&stream, &pkg)
            .map_err(|e| BlockchainError::Network(format!("Failed to send data: {e}")))?;
        let _ = (&stream).flush();
        Ok(())
    }
}

/// Hand a locally built transaction to a node, typically the central relay.
/// Used by the CLI `send` path when not mining on the spot.
pub fn send_tx(addr: &str, tx: &Transaction) {
    let socket_addr = match addr.parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse address {addr}: {e}");
            return;
        }
    };

    let tx_data = match tx.serialize() {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to serialize transaction: {e}");
            return;
        }
    };

    let pkg = Package::Tx {
        addr_from: GLOBAL_CONFIG.get_node_addr(),
        transaction: tx_data,
    };

    if let Err(e) = send_data_once(socket_addr, pkg) {
        error!("Failed to send transaction: {e}");
    }
}

fn send_data_once(addr: SocketAddr, pkg: Package) -> Result<()> {
    let stream = TcpStream::connect_timeout(&addr, Duration::from_millis(TCP_WRITE_TIMEOUT))
        .map_err(|e| BlockchainError::Network(format!("Failed to connect to {addr}: {e}")))?;

    stream
        .set_write_timeout(Some(Duration::from_millis(TCP_WRITE_TIMEOUT)))
        .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;

    serde_json::to_writer(&stream, &pkg)
        .map_err(|e| BlockchainError::Network(format!("Failed to send data: {e}")))?;

    let _ = (&stream).flush();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_wire_round_trip() {
        let pkg = Package::Version {
            addr_from: "127.0.0.1:2001".to_string(),
            version: NODE_VERSION,
            best_height: 3,
        };

        let encoded = serde_json::to_string(&pkg).unwrap();
        let decoded: Package = serde_json::from_str(&encoded).unwrap();
        match decoded {
            Package::Version {
                addr_from,
                version,
                best_height,
            } => {
                assert_eq!(addr_from, "127.0.0.1:2001");
                assert_eq!(version, NODE_VERSION);
                assert_eq!(best_height, 3);
            }
            other => panic!("unexpected package: {other:?}"),
        }
    }

    #[test]
    fn command_tags() {
        let pkg = Package::GetBlocks {
            addr_from: "127.0.0.1:2001".to_string(),
        };
        assert_eq!(pkg.command(), "getblocks");

        let pkg = Package::Inv {
            addr_from: "127.0.0.1:2001".to_string(),
            op_type: OpType::Tx,
            items: vec![vec![1, 2, 3]],
        };
        assert_eq!(pkg.command(), "inv");
    }

    #[test]
    fn malformed_wire_input_is_an_error() {
        let result: std::result::Result<Package, _> = serde_json::from_str("{\"nope\":1}");
        assert!(result.is_err());
    }
}
