use log::info;

use super::node::NodeError;
use super::pubsub::Publisher;
use crate::blockchain::{Address, Block, Blockchain, Transaction, TransactionPool};

/// Turns the pending pool into blocks
#[derive(Debug, Clone)]
pub struct TransactionMiner {
    blockchain: Blockchain,
    pool: TransactionPool,
    miner_address: Address,
    publisher: Publisher,
}

impl TransactionMiner {
    pub fn new(
        blockchain: Blockchain,
        pool: TransactionPool,
        miner_address: Address,
        publisher: Publisher,
    ) -> Self {
        TransactionMiner {
            blockchain,
            pool,
            miner_address,
            publisher,
        }
    }

    /// Mines every valid pending transaction plus the miner's reward into a new block
    ///
    /// On success the new chain is broadcast and the pool is emptied. If a competing
    /// chain is adopted while mining, the search is abandoned and the pool is left as is.
    pub fn mine_transactions(&self) -> Result<Block, NodeError> {
        let mut data = self.pool.valid_transactions();
        data.push(Transaction::reward(&self.miner_address));

        let block = self.blockchain.add_block(data)?;
        info!(
            "Mined block {} paying {} to {}",
            block.hash,
            crate::config::MINING_REWARD,
            self.miner_address
        );

        self.publisher.broadcast_chain(&self.blockchain.chain())?;
        self.pool.clear();

        Ok(block)
    }

    /// Runs [`TransactionMiner::mine_transactions`] on the blocking thread pool
    pub async fn mine_transactions_async(&self) -> Result<Block, NodeError> {
        let miner = self.clone();
        tokio::task::spawn_blocking(move || miner.mine_transactions())
            .await
            .map_err(|e| NodeError::Task(e.to_string()))?
    }
}
