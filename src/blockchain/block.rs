use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::hash::leading_zero_bits;
use super::transaction::Transaction;
use crate::config::{
    GENESIS_HASH, GENESIS_LAST_HASH, GENESIS_TIMESTAMP, INITIAL_DIFFICULTY, MINE_RATE,
};
use crate::crypto_hash;

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Milliseconds since the Unix epoch at which the proof of work was found
    pub timestamp: i64,

    /// Hash of the previous block
    pub last_hash: String,

    /// Hash of this block
    pub hash: String,

    /// Transactions recorded in this block
    pub data: Vec<Transaction>,

    /// Proof of work
    pub nonce: u64,

    /// Number of leading zero bits required in `hash`
    pub difficulty: u32,
}

impl Block {
    /// The fixed first block of every chain
    pub fn genesis() -> Self {
        Block {
            timestamp: GENESIS_TIMESTAMP,
            last_hash: GENESIS_LAST_HASH.to_string(),
            hash: GENESIS_HASH.to_string(),
            data: Vec::new(),
            nonce: 0,
            difficulty: INITIAL_DIFFICULTY,
        }
    }

    /// Hash over every field of a block except the hash itself
    pub fn calculate_hash(
        timestamp: i64,
        last_hash: &str,
        data: &[Transaction],
        nonce: u64,
        difficulty: u32,
    ) -> String {
        crypto_hash!(timestamp, last_hash, data, nonce, difficulty)
    }

    /// Recomputes the hash from the block's own fields
    pub fn compute_hash(&self) -> String {
        Self::calculate_hash(
            self.timestamp,
            &self.last_hash,
            &self.data,
            self.nonce,
            self.difficulty,
        )
    }

    /// Whether the stored hash has at least `difficulty` leading zero bits
    pub fn meets_difficulty(&self) -> bool {
        leading_zero_bits(&self.hash) >= self.difficulty
    }

    /// Mines a block holding `data` on top of `last_block`
    ///
    /// Blocks the calling thread until a proof of work is found.
    pub fn mine_block(last_block: &Block, data: Vec<Transaction>) -> Self {
        match Self::mine_block_until(last_block, data, || false) {
            Some(block) => block,
            None => unreachable!("mining without an abort condition always finishes"),
        }
    }

    /// Mines a block holding `data` on top of `last_block`, giving up once `should_abort`
    /// returns true
    ///
    /// Every attempt takes a fresh timestamp and re-derives the difficulty from it, so a
    /// search that drags on past the mine rate gets easier.
    ///
    /// # Returns
    ///
    /// The mined block, or `None` if the search was aborted
    pub fn mine_block_until<F>(
        last_block: &Block,
        data: Vec<Transaction>,
        should_abort: F,
    ) -> Option<Self>
    where
        F: Fn() -> bool,
    {
        let last_hash = last_block.hash.clone();
        let mut nonce: u64 = 0;

        loop {
            if should_abort() {
                return None;
            }

            nonce = nonce.wrapping_add(1);
            let timestamp = Utc::now().timestamp_millis();
            let difficulty = Self::adjust_difficulty(last_block, timestamp);
            let hash = Self::calculate_hash(timestamp, &last_hash, &data, nonce, difficulty);

            if leading_zero_bits(&hash) >= difficulty {
                return Some(Block {
                    timestamp,
                    last_hash,
                    hash,
                    data,
                    nonce,
                    difficulty,
                });
            }
        }
    }

    /// Difficulty for a block mined at `new_timestamp` on top of `original_block`
    ///
    /// Goes up by one when the block came faster than [`MINE_RATE`] and down by one when
    /// it came slower, never below 1. This retargets on every block and can oscillate
    /// under uneven load.
    pub fn adjust_difficulty(original_block: &Block, new_timestamp: i64) -> u32 {
        let difficulty = original_block.difficulty;

        if difficulty < 1 {
            return 1;
        }

        // peer blocks may carry any timestamp
        if new_timestamp.saturating_sub(original_block.timestamp) > MINE_RATE {
            return (difficulty - 1).max(1);
        }

        difficulty + 1
    }
}
