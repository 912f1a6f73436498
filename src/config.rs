use std::env;

use log::warn;

/// Target time between blocks, in milliseconds
pub const MINE_RATE: i64 = 1000;

/// Difficulty of the genesis block
pub const INITIAL_DIFFICULTY: u32 = 1;

/// Balance every address starts with before it has spent anything
pub const STARTING_BALANCE: u64 = 1000;

/// Amount credited to the miner of each block
pub const MINING_REWARD: u64 = 50;

pub const GENESIS_TIMESTAMP: i64 = 1;
pub const GENESIS_LAST_HASH: &str = "-----";
pub const GENESIS_HASH: &str = "hash-one";

const DEFAULT_NODE_COUNT: usize = 3;
const DEFAULT_SEED_ROUNDS: usize = 10;

/// Settings for the demo node binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Number of nodes attached to the local bus, the root node included
    pub node_count: usize,

    /// Number of seeding rounds; each round creates transactions and mines one block
    pub seed_rounds: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_count: DEFAULT_NODE_COUNT,
            seed_rounds: DEFAULT_SEED_ROUNDS,
        }
    }
}

impl NodeConfig {
    /// Loads the configuration from the environment, reading a `.env` file first if present
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        NodeConfig {
            node_count: read_var("NODE_COUNT", DEFAULT_NODE_COUNT).max(1),
            seed_rounds: read_var("SEED_ROUNDS", DEFAULT_SEED_ROUNDS),
        }
    }
}

fn read_var(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
