// Blockchain module
//
// This module contains the ledger core:
// - Content hashing and signatures
// - Transactions and wallets
// - The pending transaction pool
// - Blocks, proof of work and the chain itself

pub mod block;
pub mod chain;
pub mod crypto;
pub mod hash;
pub mod pool;
pub mod transaction;
pub mod wallet;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Blockchain, BlockchainError, ChainError};
pub use crypto::{Address, DigitalSignature, KeyPair};
pub use pool::{TransactionMap, TransactionPool};
pub use transaction::{OutputMap, Transaction, TransactionError, TransactionInput};
pub use wallet::Wallet;
