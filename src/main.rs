use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use log::{info, warn};

use cryptochain::blockchain::{Address, Blockchain, Wallet};
use cryptochain::config::NodeConfig;
use cryptochain::network::{LocalBus, Node};

/// Time given to peers to process a broadcast before the next round
const PROPAGATION_DELAY: Duration = Duration::from_millis(50);

// Start the root node and its peers, all listening on the same bus
fn initialize_network(bus: &LocalBus, config: &NodeConfig) -> Vec<Node> {
    let nodes: Vec<Node> = (0..config.node_count)
        .map(|_| Node::with_bus(Arc::new(bus.clone())))
        .collect();

    for node in &nodes {
        info!("Node {} uses wallet {}", node.id(), node.address());
        tokio::spawn(node.clone().run(bus.subscribe()));
    }

    nodes
}

// Seed the ledger with traffic between the root wallet and two local wallets
fn seed_round(root: &Node, one: &mut Wallet, two: &mut Wallet, round: usize) {
    let chain = root.blockchain().chain();

    // A wallet with a transfer still pending extends it, so one block never carries two
    // transfers signed against the same balance
    let pool_transaction = |wallet: &mut Wallet, recipient: Address, amount: u64| {
        let pending = root
            .pool()
            .existing_transaction(wallet.address())
            .filter(|transaction| transaction.validate().is_ok());

        let result = match pending {
            Some(mut transaction) => transaction
                .update(wallet, recipient, amount)
                .map(|()| transaction),
            None => wallet.create_transaction(amount, recipient, Some(&chain)),
        };

        match result {
            Ok(transaction) => {
                root.pool().set_transaction(transaction.clone());
                if let Err(err) = root.broadcast_transaction(&transaction) {
                    warn!("Seed transaction {} was not broadcast: {}", transaction.id, err);
                }
            }
            Err(err) => warn!("Skipping seed transaction: {}", err),
        }
    };

    match round % 3 {
        0 => {
            if let Err(err) = root.conduct_transaction(one.address().clone(), 10) {
                warn!("Skipping seed transaction: {}", err);
            }
            pool_transaction(one, two.address().clone(), 20);
        }
        1 => {
            if let Err(err) = root.conduct_transaction(one.address().clone(), 10) {
                warn!("Skipping seed transaction: {}", err);
            }
            pool_transaction(two, root.address(), 30);
        }
        _ => {
            let to_two = two.address().clone();
            let to_root = root.address();
            pool_transaction(one, to_two, 20);
            pool_transaction(two, to_root, 30);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::from_env();
    info!("Starting {} nodes for {} rounds", config.node_count, config.seed_rounds);

    let bus = LocalBus::new();
    let nodes = initialize_network(&bus, &config);
    let root = nodes.first().context("at least one node is required")?;

    // Peers joining late catch up from the root's snapshot
    for peer in nodes.iter().skip(1) {
        peer.sync_with_root(root.blockchain().chain(), root.pool().transaction_map());
    }

    let mut wallet_one = Wallet::new();
    let mut wallet_two = Wallet::new();

    for round in 0..config.seed_rounds {
        seed_round(root, &mut wallet_one, &mut wallet_two, round);

        // Rotate the miner so every node gets to extend the chain
        let miner = &nodes[round % nodes.len()];
        tokio::time::sleep(PROPAGATION_DELAY).await;

        match miner.mine_transactions_async().await {
            Ok(block) => info!(
                "Round {}: node {} mined {} transactions at difficulty {}",
                round,
                miner.id(),
                block.data.len(),
                block.difficulty
            ),
            Err(err) => warn!("Round {}: node {} did not mine: {}", round, miner.id(), err),
        }

        tokio::time::sleep(PROPAGATION_DELAY).await;
    }

    let canonical = root.blockchain().chain();
    for node in &nodes {
        let info = node.wallet_info();
        info!(
            "Node {}: height {}, wallet {} balance {}",
            node.id(),
            node.blockchain().len() - 1,
            info.address,
            info.balance
        );
    }

    if !Blockchain::is_valid_chain(&canonical) {
        bail!("root chain failed validation");
    }

    if nodes.iter().all(|node| node.blockchain().chain() == canonical) {
        info!("All {} nodes agree on a chain of height {}", nodes.len(), canonical.len() - 1);
    } else {
        warn!("Nodes have not converged on a single chain");
    }

    info!("Known addresses: {}", root.known_addresses().len());
    Ok(())
}
