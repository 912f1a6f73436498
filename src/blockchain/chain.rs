use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{error, info, warn};
use thiserror::Error;

use super::block::Block;
use super::crypto::Address;
use super::transaction::{Transaction, TransactionInput};

/// Reasons an incoming chain is not adopted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("The incoming chain must be longer: {candidate} <= {current}")]
    ChainTooShort { candidate: usize, current: usize },

    #[error("The incoming chain is invalid: {0}")]
    ChainInvalidStructure(String),

    #[error("The incoming chain has invalid transaction data: {0}")]
    ChainInvalidTransactions(String),
}

/// Errors that can occur while extending the local chain
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Mining aborted: the chain tip changed")]
    MiningAborted,

    #[error("Mining task failed: {0}")]
    Task(String),
}

/// Represents the blockchain
///
/// Cloning gives another handle to the same chain. Readers always see either the
/// whole old chain or the whole new one.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, genesis first
    chain: Arc<RwLock<Vec<Block>>>,

    /// Bumped whenever the tip changes; in-flight mining watches it to know when to give up
    generation: Arc<AtomicU64>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Creates a new blockchain holding only the genesis block
    pub fn new() -> Self {
        Blockchain {
            chain: Arc::new(RwLock::new(vec![Block::genesis()])),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Block>> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Block>> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A snapshot of the entire chain
    pub fn chain(&self) -> Vec<Block> {
        self.read().clone()
    }

    pub fn last_block(&self) -> Block {
        let chain = self.read();
        chain.last().cloned().unwrap_or_else(Block::genesis)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Current tip generation, see [`Blockchain::abort_mining`]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Makes any in-flight [`Blockchain::add_block`] give up with `MiningAborted`
    pub fn abort_mining(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Mines a block holding `data` on the current tip and appends it
    ///
    /// The proof-of-work search runs without holding the chain lock. If the tip changes
    /// while searching (a longer chain was adopted, another block was appended, or
    /// [`Blockchain::abort_mining`] was called) the search stops and nothing is appended.
    ///
    /// # Returns
    ///
    /// The appended block, or `MiningAborted`
    pub fn add_block(&self, data: Vec<Transaction>) -> Result<Block, BlockchainError> {
        let (last_block, generation) = {
            let chain = self.read();
            let last_block = chain.last().cloned().unwrap_or_else(Block::genesis);
            (last_block, self.generation())
        };

        let block = Block::mine_block_until(&last_block, data, || {
            self.generation.load(Ordering::Relaxed) != generation
        })
        .ok_or(BlockchainError::MiningAborted)?;

        let mut chain = self.write();
        if self.generation() != generation {
            warn!("Discarding block {}: the chain tip changed while mining", block.hash);
            return Err(BlockchainError::MiningAborted);
        }

        chain.push(block.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);

        info!(
            "Added block {} at height {} with difficulty {} and {} transactions",
            block.hash,
            chain.len() - 1,
            block.difficulty,
            block.data.len()
        );

        Ok(block)
    }

    /// Runs [`Blockchain::add_block`] on the blocking thread pool
    pub async fn add_block_async(&self, data: Vec<Transaction>) -> Result<Block, BlockchainError> {
        let blockchain = self.clone();
        tokio::task::spawn_blocking(move || blockchain.add_block(data))
            .await
            .map_err(|e| BlockchainError::Task(e.to_string()))?
    }

    /// Adopts `candidate` if it is longer than the current chain and valid
    ///
    /// # Arguments
    ///
    /// * `candidate` - The competing chain
    /// * `validate_transactions` - Whether to also check the transactions it records
    /// * `on_accept` - Called with the candidate right before it replaces the current
    ///   chain, while the chain is still locked
    ///
    /// # Returns
    ///
    /// `Ok(())` if the chain was replaced. Rejections are logged and leave the chain
    /// untouched.
    ///
    /// Only length is compared, so a longer chain of easier blocks beats a shorter one
    /// that carries more work.
    pub fn replace_chain<F>(
        &self,
        candidate: Vec<Block>,
        validate_transactions: bool,
        on_accept: F,
    ) -> Result<(), ChainError>
    where
        F: FnOnce(&[Block]),
    {
        let result = self.try_replace_chain(candidate, validate_transactions, on_accept);
        if let Err(err) = &result {
            error!("{}", err);
        }
        result
    }

    fn try_replace_chain<F>(
        &self,
        candidate: Vec<Block>,
        validate_transactions: bool,
        on_accept: F,
    ) -> Result<(), ChainError>
    where
        F: FnOnce(&[Block]),
    {
        let current = self.len();
        if candidate.len() <= current {
            return Err(ChainError::ChainTooShort {
                candidate: candidate.len(),
                current,
            });
        }

        Self::check_chain(&candidate)?;

        if validate_transactions {
            Self::check_transaction_data(&candidate)?;
        }

        let mut chain = self.write();
        // the chain may have grown while the candidate was being checked
        if candidate.len() <= chain.len() {
            return Err(ChainError::ChainTooShort {
                candidate: candidate.len(),
                current: chain.len(),
            });
        }

        on_accept(&candidate);

        info!(
            "Replacing chain of length {} with chain of length {}",
            chain.len(),
            candidate.len()
        );
        *chain = candidate;
        self.generation.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    /// Whether `chain` starts at genesis and every block is properly linked and mined
    pub fn is_valid_chain(chain: &[Block]) -> bool {
        Self::check_chain(chain).is_ok()
    }

    /// Structural validation of a whole chain, reporting the first defect found
    pub fn check_chain(chain: &[Block]) -> Result<(), ChainError> {
        let genesis = chain
            .first()
            .ok_or_else(|| ChainError::ChainInvalidStructure("chain is empty".to_string()))?;

        if *genesis != Block::genesis() {
            return Err(ChainError::ChainInvalidStructure(
                "first block is not the genesis block".to_string(),
            ));
        }

        for (index, pair) in chain.windows(2).enumerate() {
            let (previous, block) = (&pair[0], &pair[1]);
            let height = index + 1;

            if block.last_hash != previous.hash {
                return Err(ChainError::ChainInvalidStructure(format!(
                    "block {} does not link to its predecessor",
                    height
                )));
            }

            if block.hash != block.compute_hash() {
                return Err(ChainError::ChainInvalidStructure(format!(
                    "block {} has a hash that does not match its contents",
                    height
                )));
            }

            if !block.meets_difficulty() {
                return Err(ChainError::ChainInvalidStructure(format!(
                    "block {} does not meet its difficulty {}",
                    height, block.difficulty
                )));
            }

            if block.difficulty.abs_diff(previous.difficulty) > 1 {
                return Err(ChainError::ChainInvalidStructure(format!(
                    "block {} jumps difficulty from {} to {}",
                    height, previous.difficulty, block.difficulty
                )));
            }
        }

        Ok(())
    }

    /// Whether every transaction recorded after genesis is acceptable
    pub fn validate_transaction_data(chain: &[Block]) -> bool {
        Self::check_transaction_data(chain).is_ok()
    }

    /// Checks the transactions of every block after genesis
    ///
    /// Each block may hold at most one reward, paying exactly the mining reward. Every
    /// transfer must validate and may appear only once in the whole chain.
    pub fn check_transaction_data(chain: &[Block]) -> Result<(), ChainError> {
        let mut seen: HashSet<&str> = HashSet::new();

        for (index, block) in chain.iter().enumerate().skip(1) {
            let mut reward_count = 0;

            for transaction in &block.data {
                match &transaction.input {
                    TransactionInput::Reward => {
                        reward_count += 1;
                        if reward_count > 1 {
                            return Err(ChainError::ChainInvalidTransactions(format!(
                                "block {} has more than one miner reward",
                                index
                            )));
                        }
                    }
                    TransactionInput::Transfer(_) => {
                        if !seen.insert(transaction.id.as_str()) {
                            return Err(ChainError::ChainInvalidTransactions(format!(
                                "transaction {} appears more than once",
                                transaction.id
                            )));
                        }
                    }
                }

                transaction.validate().map_err(|err| {
                    ChainError::ChainInvalidTransactions(format!(
                        "block {} transaction {}: {}",
                        index, transaction.id, err
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Every address that has ever been credited on the chain
    pub fn known_addresses(&self) -> Vec<Address> {
        let chain = self.read();
        let addresses: BTreeSet<&Address> = chain
            .iter()
            .flat_map(|block| block.data.iter())
            .flat_map(|transaction| transaction.output_map.keys())
            .collect();

        addresses.into_iter().cloned().collect()
    }
}
