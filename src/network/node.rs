use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::miner::TransactionMiner;
use super::pubsub::{Broadcaster, Channel, Message, PubSubError, Publisher};
use crate::blockchain::{
    Address, Block, Blockchain, BlockchainError, ChainError, Transaction, TransactionError,
    TransactionMap, TransactionPool, Wallet,
};

/// Errors that can occur while a node handles requests or peer messages
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Chain rejected: {0}")]
    Chain(#[from] ChainError),

    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("Malformed message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publish error: {0}")]
    PubSub(#[from] PubSubError),

    #[error("Task error: {0}")]
    Task(String),
}

/// Address and replayed balance of a node's wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub address: Address,
    pub balance: u64,
}

/// One participant of the network: a ledger, a pool and a wallet wired to a bus
///
/// All state is passed in, so several nodes can live in one process.
#[derive(Debug, Clone)]
pub struct Node {
    blockchain: Blockchain,
    pool: TransactionPool,
    wallet: Arc<Mutex<Wallet>>,
    publisher: Publisher,
    miner: TransactionMiner,
}

impl Node {
    pub fn new(
        blockchain: Blockchain,
        pool: TransactionPool,
        wallet: Wallet,
        bus: Arc<dyn Broadcaster>,
    ) -> Self {
        let publisher = Publisher::new(Uuid::new_v4(), bus);
        let miner = TransactionMiner::new(
            blockchain.clone(),
            pool.clone(),
            wallet.address().clone(),
            publisher.clone(),
        );

        Node {
            blockchain,
            pool,
            wallet: Arc::new(Mutex::new(wallet)),
            publisher,
            miner,
        }
    }

    /// A node with an empty ledger, an empty pool and a fresh wallet
    pub fn with_bus(bus: Arc<dyn Broadcaster>) -> Self {
        Self::new(Blockchain::new(), TransactionPool::new(), Wallet::new(), bus)
    }

    pub fn id(&self) -> Uuid {
        self.publisher.origin()
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn miner(&self) -> &TransactionMiner {
        &self.miner
    }

    fn wallet(&self) -> MutexGuard<'_, Wallet> {
        self.wallet.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address(&self) -> Address {
        self.wallet().address().clone()
    }

    /// The node's address and its balance replayed from the current chain
    pub fn wallet_info(&self) -> WalletInfo {
        let address = self.address();
        let balance = Wallet::calculate_balance(&self.blockchain.chain(), &address);
        WalletInfo { address, balance }
    }

    /// Every address credited on the current chain
    pub fn known_addresses(&self) -> Vec<Address> {
        self.blockchain.known_addresses()
    }

    /// Pays `amount` to `recipient` from this node's wallet
    ///
    /// If the wallet already has a transaction waiting in the pool that it signed itself,
    /// that transaction is extended; otherwise a new one is created against the current
    /// chain. The result is pooled and broadcast.
    pub fn conduct_transaction(
        &self,
        recipient: Address,
        amount: u64,
    ) -> Result<Transaction, NodeError> {
        let mut wallet = self.wallet();

        let transaction = match self.pending_transaction(wallet.address()) {
            Some(mut transaction) => {
                transaction.update(&wallet, recipient, amount)?;
                transaction
            }
            None => {
                let chain = self.blockchain.chain();
                wallet.create_transaction(amount, recipient, Some(&chain))?
            }
        };
        drop(wallet);

        self.pool.set_transaction(transaction.clone());
        self.publisher.broadcast_transaction(&transaction)?;

        Ok(transaction)
    }

    // A pooled entry naming `address` as sender only counts if its signature holds
    fn pending_transaction(&self, address: &Address) -> Option<Transaction> {
        match self.pool.existing_transaction(address) {
            Some(transaction) if transaction.validate().is_ok() => Some(transaction),
            Some(_) => self
                .pool
                .transaction_map()
                .into_values()
                .find(|transaction| {
                    transaction.sender() == Some(address) && transaction.validate().is_ok()
                }),
            None => None,
        }
    }

    /// Mines the pending pool into a block and broadcasts the new chain
    pub fn mine_transactions(&self) -> Result<Block, NodeError> {
        self.miner.mine_transactions()
    }

    pub async fn mine_transactions_async(&self) -> Result<Block, NodeError> {
        self.miner.mine_transactions_async().await
    }

    pub fn broadcast_chain(&self) -> Result<(), NodeError> {
        Ok(self.publisher.broadcast_chain(&self.blockchain.chain())?)
    }

    pub fn broadcast_transaction(&self, transaction: &Transaction) -> Result<(), NodeError> {
        Ok(self.publisher.broadcast_transaction(transaction)?)
    }

    /// Applies a message received from a peer
    ///
    /// A chain is adopted only if it is longer and fully valid, in which case the pool
    /// drops every transaction it records. A transaction is pooled only if it validates.
    /// Messages published by this node are ignored.
    pub fn handle_message(&self, message: &Message) -> Result<(), NodeError> {
        if message.origin == self.id() {
            return Ok(());
        }

        info!(
            "Message received. Channel: {}. From: {}. {} bytes",
            message.channel,
            message.origin,
            message.payload.len()
        );

        match message.channel {
            Channel::Blockchain => {
                let chain: Vec<Block> = serde_json::from_str(&message.payload)?;
                self.blockchain.replace_chain(chain, true, |accepted| {
                    self.pool.clear_blockchain_transactions(accepted)
                })?;
            }
            Channel::Transaction => {
                let transaction: Transaction = serde_json::from_str(&message.payload)?;
                transaction.validate()?;
                self.pool.set_transaction(transaction);
            }
        }

        Ok(())
    }

    /// Runs [`Node::handle_message`] on the blocking pool
    ///
    /// Validating a chain checks every hash and signature in it, which is too much work
    /// for an async worker.
    pub async fn handle_message_async(&self, message: Message) -> Result<(), NodeError> {
        let node = self.clone();
        tokio::task::spawn_blocking(move || node.handle_message(&message))
            .await
            .map_err(|err| NodeError::Task(err.to_string()))?
    }

    /// Processes bus messages until the bus shuts down
    ///
    /// Rejected or malformed messages are logged and skipped.
    pub async fn run(self, mut receiver: broadcast::Receiver<Message>) {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let channel = message.channel;
                    if let Err(err) = self.handle_message_async(message).await {
                        warn!("Node {} ignored a {} message: {}", self.id(), channel, err);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Node {} missed {} messages", self.id(), skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }

        info!("Node {} stopped listening", self.id());
    }

    /// Cold start from a root node's chain and pool snapshot
    ///
    /// The chain is adopted only if it is longer and valid; the wallet balance is then
    /// recomputed from it. The pool snapshot always replaces the local pool.
    pub fn sync_with_root(&self, root_chain: Vec<Block>, root_transactions: TransactionMap) {
        if root_chain.len() > self.blockchain.len() {
            info!("Syncing with root chain of length {}", root_chain.len());

            if self.blockchain.replace_chain(root_chain, true, |_| {}).is_ok() {
                let chain = self.blockchain.chain();
                let balance = self.wallet().refresh_balance(&chain);
                info!("Wallet balance after sync: {}", balance);
            }
        }

        self.pool.replace_transaction_map(root_transactions);
    }
}
