use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};

use super::block::Block;
use super::crypto::Address;
use super::transaction::Transaction;

/// Pending transactions keyed by id
pub type TransactionMap = HashMap<String, Transaction>;

/// Transactions waiting to be mined
///
/// Cloning gives another handle to the same pool. Every operation runs under a single
/// lock, so readers never observe a half-reconciled pool.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: Arc<RwLock<TransactionMap>>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TransactionMap> {
        self.transactions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TransactionMap> {
        self.transactions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts the transaction, replacing any pending one with the same id
    pub fn set_transaction(&self, transaction: Transaction) {
        debug!("Pooling transaction {}", transaction.id);
        self.write().insert(transaction.id.clone(), transaction);
    }

    /// A snapshot of every pending transaction
    pub fn transaction_map(&self) -> TransactionMap {
        self.read().clone()
    }

    /// Swaps in a whole new set of pending transactions, e.g. a peer's pool
    pub fn replace_transaction_map(&self, transaction_map: TransactionMap) {
        let mut transactions = self.write();
        *transactions = transaction_map;
        info!("Transaction pool replaced, {} pending", transactions.len());
    }

    /// A pending transaction sent by `address`, if there is one
    pub fn existing_transaction(&self, address: &Address) -> Option<Transaction> {
        self.read()
            .values()
            .find(|transaction| transaction.sender() == Some(address))
            .cloned()
    }

    /// The pending transactions that pass validation
    ///
    /// Invalid transactions are logged and left out of the result, but stay in the pool.
    pub fn valid_transactions(&self) -> Vec<Transaction> {
        self.read()
            .values()
            .filter(|transaction| match transaction.validate() {
                Ok(()) => true,
                Err(err) => {
                    warn!("Skipping pooled transaction {}: {}", transaction.id, err);
                    false
                }
            })
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Drops every transaction recorded in `chain` after genesis
    pub fn clear_blockchain_transactions(&self, chain: &[Block]) {
        let mut transactions = self.write();
        let before = transactions.len();

        for block in chain.iter().skip(1) {
            for transaction in &block.data {
                transactions.remove(&transaction.id);
            }
        }

        info!(
            "Cleared {} recorded transactions from the pool, {} pending",
            before - transactions.len(),
            transactions.len()
        );
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::transaction::TransactionInput;
    use crate::blockchain::{Blockchain, Wallet};

    fn transaction_from(sender: &mut Wallet) -> Transaction {
        sender
            .create_transaction(30, Wallet::new().address().clone(), None)
            .unwrap()
    }

    #[test]
    fn test_set_transaction() {
        let pool = TransactionPool::new();
        let transaction = transaction_from(&mut Wallet::new());

        pool.set_transaction(transaction.clone());

        assert_eq!(pool.transaction_map()[&transaction.id], transaction);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_set_transaction_upserts_by_id() {
        let pool = TransactionPool::new();
        let mut sender = Wallet::new();
        let mut transaction = transaction_from(&mut sender);
        pool.set_transaction(transaction.clone());

        transaction
            .update(&sender, Wallet::new().address().clone(), 5)
            .unwrap();
        pool.set_transaction(transaction.clone());

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.transaction_map()[&transaction.id], transaction);
    }

    #[test]
    fn test_existing_transaction() {
        let pool = TransactionPool::new();
        let mut sender = Wallet::new();
        let transaction = transaction_from(&mut sender);
        pool.set_transaction(transaction.clone());
        pool.set_transaction(transaction_from(&mut Wallet::new()));

        assert_eq!(pool.existing_transaction(sender.address()), Some(transaction));
        assert_eq!(pool.existing_transaction(Wallet::new().address()), None);
    }

    #[test]
    fn test_valid_transactions() {
        let pool = TransactionPool::new();
        let mut valid = Vec::new();

        for i in 0..10 {
            let mut transaction = transaction_from(&mut Wallet::new());
            if i % 3 == 0 {
                if let TransactionInput::Transfer(input) = &mut transaction.input {
                    input.amount = 999_999;
                }
            } else if i % 3 == 1 {
                if let TransactionInput::Transfer(input) = &mut transaction.input {
                    input.signature = Wallet::new().sign(b"foo");
                }
            } else {
                valid.push(transaction.clone());
            }
            pool.set_transaction(transaction);
        }

        let mut result = pool.valid_transactions();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        valid.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(result, valid);
        // invalid entries stay pooled
        assert_eq!(pool.len(), 10);
    }

    #[test]
    fn test_clear() {
        let pool = TransactionPool::new();
        pool.set_transaction(transaction_from(&mut Wallet::new()));
        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_clear_blockchain_transactions() {
        let pool = TransactionPool::new();
        let blockchain = Blockchain::new();
        let mut expected = TransactionMap::new();

        for i in 0..6 {
            let transaction = transaction_from(&mut Wallet::new());
            pool.set_transaction(transaction.clone());

            match i % 2 {
                0 => {
                    blockchain.add_block(vec![transaction]).unwrap();
                }
                _ => {
                    expected.insert(transaction.id.clone(), transaction);
                }
            }
        }

        pool.clear_blockchain_transactions(&blockchain.chain());

        assert_eq!(pool.transaction_map(), expected);
    }

    #[test]
    fn test_replace_transaction_map() {
        let pool = TransactionPool::new();
        pool.set_transaction(transaction_from(&mut Wallet::new()));

        let replacement = transaction_from(&mut Wallet::new());
        let mut map = TransactionMap::new();
        map.insert(replacement.id.clone(), replacement);

        pool.replace_transaction_map(map.clone());
        assert_eq!(pool.transaction_map(), map);
    }
}
