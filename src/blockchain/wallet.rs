use log::info;

use super::block::Block;
use super::crypto::{Address, DigitalSignature, KeyPair};
use super::transaction::{Transaction, TransactionError};
use crate::config::STARTING_BALANCE;

/// A keypair plus the balance its owner last knew about
#[derive(Debug, Clone)]
pub struct Wallet {
    keypair: KeyPair,
    balance: u64,
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallet {
    /// Creates a wallet with a fresh keypair and the starting balance
    pub fn new() -> Self {
        Self::from_keypair(KeyPair::generate())
    }

    pub fn from_keypair(keypair: KeyPair) -> Self {
        Wallet {
            keypair,
            balance: STARTING_BALANCE,
        }
    }

    pub fn address(&self) -> &Address {
        self.keypair.address()
    }

    /// The cached balance, see [`Wallet::refresh_balance`]
    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn sign(&self, data: &[u8]) -> DigitalSignature {
        self.keypair.sign(data)
    }

    /// Recomputes the cached balance from `chain`
    pub fn refresh_balance(&mut self, chain: &[Block]) -> u64 {
        self.balance = Self::calculate_balance(chain, self.address());
        self.balance
    }

    /// Creates a transfer from this wallet
    ///
    /// # Arguments
    ///
    /// * `amount` - The amount to transfer
    /// * `recipient` - The address receiving the funds
    /// * `chain` - When given, the balance is recomputed from it first; otherwise the
    ///   cached balance is trusted
    ///
    /// # Returns
    ///
    /// The signed transaction, or `InsufficientBalance` if `amount` exceeds the balance
    pub fn create_transaction(
        &mut self,
        amount: u64,
        recipient: Address,
        chain: Option<&[Block]>,
    ) -> Result<Transaction, TransactionError> {
        if let Some(chain) = chain {
            self.refresh_balance(chain);
        }

        if amount > self.balance {
            return Err(TransactionError::InsufficientBalance {
                amount,
                balance: self.balance,
            });
        }

        let transaction = Transaction::new(self, recipient, amount)?;
        info!(
            "Wallet {} created transaction {} for {}",
            self.address(),
            transaction.id,
            amount
        );
        Ok(transaction)
    }

    /// Replays `chain` to find the balance of `address`
    ///
    /// Blocks are walked from the newest back to the first one after genesis. Every
    /// output paying `address` is added up. Once a block containing a transaction sent
    /// by `address` has been fully counted the walk stops: the sender's remainder in
    /// that transaction already accounts for everything before it.
    ///
    /// # Returns
    ///
    /// The summed outputs if `address` has ever sent a transaction, otherwise the
    /// starting balance plus everything it received
    pub fn calculate_balance(chain: &[Block], address: &Address) -> u64 {
        let mut has_conducted_transaction = false;
        let mut outputs_total: u64 = 0;

        for block in chain.iter().skip(1).rev() {
            for transaction in &block.data {
                if transaction.sender() == Some(address) {
                    has_conducted_transaction = true;
                }

                if let Some(amount) = transaction.output_map.get(address) {
                    outputs_total = outputs_total.saturating_add(*amount);
                }
            }

            if has_conducted_transaction {
                break;
            }
        }

        if has_conducted_transaction {
            outputs_total
        } else {
            STARTING_BALANCE.saturating_add(outputs_total)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use crate::config::MINING_REWARD;

    #[test]
    fn test_new_wallet() {
        let wallet = Wallet::new();
        assert_eq!(wallet.balance(), STARTING_BALANCE);
        assert!(wallet.address().to_public_key().is_ok());
    }

    #[test]
    fn test_create_transaction_exceeding_balance() {
        let mut wallet = Wallet::new();
        let result = wallet.create_transaction(
            STARTING_BALANCE + 1,
            Wallet::new().address().clone(),
            None,
        );

        assert!(matches!(
            result,
            Err(TransactionError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_create_transaction() {
        let mut wallet = Wallet::new();
        let recipient = Wallet::new().address().clone();

        let transaction = wallet.create_transaction(50, recipient.clone(), None).unwrap();

        assert_eq!(transaction.sender(), Some(wallet.address()));
        assert_eq!(transaction.output_map[&recipient], 50);
        assert!(transaction.validate().is_ok());
    }

    #[test]
    fn test_create_transaction_refreshes_balance_from_chain() {
        let blockchain = Blockchain::new();
        let mut wallet = Wallet::new();

        let mut funder = Wallet::new();
        let gift = funder.create_transaction(500, wallet.address().clone(), None).unwrap();
        blockchain.add_block(vec![gift]).unwrap();

        // the cached balance alone does not allow this spend
        assert!(wallet.create_transaction(1200, Wallet::new().address().clone(), None).is_err());

        let chain = blockchain.chain();
        let transaction = wallet
            .create_transaction(1200, Wallet::new().address().clone(), Some(&chain))
            .unwrap();

        assert_eq!(wallet.balance(), STARTING_BALANCE + 500);
        assert_eq!(transaction.output_map[wallet.address()], 300);
    }

    #[test]
    fn test_balance_without_outputs_is_starting_balance() {
        let blockchain = Blockchain::new();
        let wallet = Wallet::new();

        assert_eq!(
            Wallet::calculate_balance(&blockchain.chain(), wallet.address()),
            STARTING_BALANCE
        );
    }

    #[test]
    fn test_balance_adds_incoming_outputs() {
        let blockchain = Blockchain::new();
        let wallet = Wallet::new();

        let one = Wallet::new()
            .create_transaction(30, wallet.address().clone(), None)
            .unwrap();
        let two = Wallet::new()
            .create_transaction(20, wallet.address().clone(), None)
            .unwrap();
        blockchain.add_block(vec![one, two]).unwrap();

        assert_eq!(
            Wallet::calculate_balance(&blockchain.chain(), wallet.address()),
            STARTING_BALANCE + 50
        );
    }

    #[test]
    fn test_balance_after_own_spend_is_remainder() {
        let blockchain = Blockchain::new();
        let mut wallet = Wallet::new();

        let one = Wallet::new()
            .create_transaction(30, wallet.address().clone(), None)
            .unwrap();
        let two = Wallet::new()
            .create_transaction(20, wallet.address().clone(), None)
            .unwrap();
        blockchain.add_block(vec![one, two]).unwrap();

        let chain = blockchain.chain();
        let spend = wallet
            .create_transaction(30, Wallet::new().address().clone(), Some(&chain))
            .unwrap();
        let remainder = spend.output_map[wallet.address()];
        blockchain.add_block(vec![spend]).unwrap();

        assert_eq!(remainder, STARTING_BALANCE + 50 - 30);
        assert_eq!(
            Wallet::calculate_balance(&blockchain.chain(), wallet.address()),
            remainder
        );
    }

    #[test]
    fn test_balance_counts_incoming_in_same_block_as_spend() {
        let blockchain = Blockchain::new();
        let mut wallet = Wallet::new();

        let spend = wallet
            .create_transaction(100, Wallet::new().address().clone(), None)
            .unwrap();
        let remainder = spend.output_map[wallet.address()];

        // placed before the spend inside the block: still counted
        let before = Wallet::new()
            .create_transaction(7, wallet.address().clone(), None)
            .unwrap();
        let reward = Transaction::reward(wallet.address());
        blockchain.add_block(vec![before, spend, reward]).unwrap();

        assert_eq!(
            Wallet::calculate_balance(&blockchain.chain(), wallet.address()),
            remainder + 7 + MINING_REWARD
        );
    }

    #[test]
    fn test_balance_counts_incoming_after_spend() {
        let blockchain = Blockchain::new();
        let mut wallet = Wallet::new();

        let spend = wallet
            .create_transaction(100, Wallet::new().address().clone(), None)
            .unwrap();
        let remainder = spend.output_map[wallet.address()];
        blockchain.add_block(vec![spend]).unwrap();

        let later = Wallet::new()
            .create_transaction(75, wallet.address().clone(), None)
            .unwrap();
        blockchain.add_block(vec![later]).unwrap();

        assert_eq!(
            Wallet::calculate_balance(&blockchain.chain(), wallet.address()),
            remainder + 75
        );
    }

    #[test]
    fn test_balance_ignores_incoming_before_last_spend() {
        let blockchain = Blockchain::new();
        let mut wallet = Wallet::new();

        let early = Wallet::new()
            .create_transaction(40, wallet.address().clone(), None)
            .unwrap();
        blockchain.add_block(vec![early]).unwrap();

        let chain = blockchain.chain();
        let spend = wallet
            .create_transaction(10, Wallet::new().address().clone(), Some(&chain))
            .unwrap();
        let remainder = spend.output_map[wallet.address()];
        blockchain.add_block(vec![spend]).unwrap();

        // the early 40 is folded into the remainder and must not be counted twice
        assert_eq!(remainder, STARTING_BALANCE + 40 - 10);
        assert_eq!(
            Wallet::calculate_balance(&blockchain.chain(), wallet.address()),
            remainder
        );
    }
}
