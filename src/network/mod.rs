// Network module
//
// Wires the ledger core to peers:
// - An in-process publish/subscribe bus
// - The transaction miner
// - Nodes that react to chains and transactions from peers

pub mod miner;
pub mod node;
pub mod pubsub;

// Re-export main components for easier access
pub use miner::TransactionMiner;
pub use node::{Node, NodeError, WalletInfo};
pub use pubsub::{Broadcaster, Channel, LocalBus, Message, Publisher};
