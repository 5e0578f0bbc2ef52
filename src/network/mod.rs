//! Peer-to-peer synchronization: the TCP command protocol, the known-peer
//! set, and the mempool-triggered mining worker.

pub mod node;
pub mod server;

pub use node::{Node, Nodes};
pub use server::{send_tx, NodeContext, OpType, Package, Server, CENTRAL_NODE, TRANSACTION_THRESHOLD};
