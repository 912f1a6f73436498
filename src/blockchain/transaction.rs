use std::collections::BTreeMap;

use chrono::Utc;
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::crypto::{verify_signature, Address, DigitalSignature};
use super::wallet::Wallet;
use crate::config::MINING_REWARD;
use crate::crypto_hash;

/// Amount credited to each address by a transaction
pub type OutputMap = BTreeMap<Address, u64>;

/// Errors that can occur during transaction operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Insufficient balance: required {amount}, available {balance}")]
    InsufficientBalance { amount: u64, balance: u64 },

    #[error("Amount mismatch from address {address}: input {expected}, outputs {actual}")]
    AmountMismatch {
        address: Address,
        expected: u64,
        actual: u128,
    },

    #[error("Invalid signature from address {0}")]
    BadSignature(Address),

    #[error("Invalid reward transaction: {0}")]
    InvalidReward(String),
}

/// Snapshot of the sender taken when a transfer is signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInput {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Balance of the sender at signing time
    pub amount: u64,

    /// The sender, which is also the key the signature is checked against
    pub address: Address,

    /// Signature over the hash of the output map
    pub signature: DigitalSignature,
}

/// Where the value of a transaction comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionInput {
    /// Value moved out of a wallet
    Transfer(TransferInput),

    /// Newly minted value paid to the miner of a block
    Reward,
}

/// Represents a transaction in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,

    /// Recipients and amounts, including the sender's own remainder
    pub output_map: OutputMap,

    pub input: TransactionInput,
}

impl Transaction {
    /// Creates a signed transfer of `amount` from `sender` to `recipient`
    ///
    /// # Arguments
    ///
    /// * `sender` - The wallet paying, its cached balance is the amount spent from
    /// * `recipient` - The address receiving the funds
    /// * `amount` - The amount to transfer
    ///
    /// # Returns
    ///
    /// The transaction, or `InsufficientBalance` if `amount` exceeds the sender's balance
    pub fn new(sender: &Wallet, recipient: Address, amount: u64) -> Result<Self, TransactionError> {
        if amount > sender.balance() {
            return Err(TransactionError::InsufficientBalance {
                amount,
                balance: sender.balance(),
            });
        }

        let output_map = Self::create_output_map(sender, recipient, amount);
        let input = Self::create_input(sender, &output_map);

        Ok(Transaction {
            id: Uuid::new_v4().to_string(),
            output_map,
            input,
        })
    }

    /// Creates the reward transaction paying the miner of a block
    pub fn reward(miner: &Address) -> Self {
        let mut output_map = OutputMap::new();
        output_map.insert(miner.clone(), MINING_REWARD);

        Transaction {
            id: Uuid::new_v4().to_string(),
            output_map,
            input: TransactionInput::Reward,
        }
    }

    fn create_output_map(sender: &Wallet, recipient: Address, amount: u64) -> OutputMap {
        let mut output_map = OutputMap::new();
        output_map.insert(recipient, amount);
        *output_map.entry(sender.address().clone()).or_insert(0) += sender.balance() - amount;
        output_map
    }

    fn create_input(sender: &Wallet, output_map: &OutputMap) -> TransactionInput {
        TransactionInput::Transfer(TransferInput {
            timestamp: Utc::now().timestamp_millis(),
            amount: sender.balance(),
            address: sender.address().clone(),
            signature: sender.sign(crypto_hash!(output_map).as_bytes()),
        })
    }

    /// Adds `amount` for `recipient` to a pending transfer and signs it again
    ///
    /// The amount is taken from the sender's remaining output. If that remainder is
    /// too small the transaction is left untouched.
    pub fn update(
        &mut self,
        sender: &Wallet,
        recipient: Address,
        amount: u64,
    ) -> Result<(), TransactionError> {
        let remainder = self.output_map.get(sender.address()).copied().unwrap_or(0);
        if amount > remainder {
            return Err(TransactionError::InsufficientBalance {
                amount,
                balance: remainder,
            });
        }

        *self.output_map.entry(recipient).or_insert(0) += amount;
        // the recipient may be the sender itself, so look the remainder up again
        if let Some(own) = self.output_map.get_mut(sender.address()) {
            *own -= amount;
        }

        self.input = Self::create_input(sender, &self.output_map);
        Ok(())
    }

    /// Checks the internal consistency of the transaction
    ///
    /// Transfers must spend exactly the input amount and carry a valid signature of the
    /// sender. Rewards must pay exactly the mining reward to a single address.
    pub fn validate(&self) -> Result<(), TransactionError> {
        match &self.input {
            TransactionInput::Transfer(input) => {
                let total: u128 = self.output_map.values().map(|v| u128::from(*v)).sum();
                if total != u128::from(input.amount) {
                    return Err(TransactionError::AmountMismatch {
                        address: input.address.clone(),
                        expected: input.amount,
                        actual: total,
                    });
                }

                let message = crypto_hash!(self.output_map);
                match verify_signature(&input.address, message.as_bytes(), &input.signature) {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(TransactionError::BadSignature(input.address.clone())),
                    Err(err) => {
                        error!("Undecodable signature material from {}: {}", input.address, err);
                        Err(TransactionError::BadSignature(input.address.clone()))
                    }
                }
            }
            TransactionInput::Reward => {
                let mut outputs = self.output_map.values();
                match (outputs.next(), outputs.next()) {
                    (Some(&MINING_REWARD), None) => Ok(()),
                    (Some(amount), None) => Err(TransactionError::InvalidReward(format!(
                        "pays {} instead of {}",
                        amount, MINING_REWARD
                    ))),
                    _ => Err(TransactionError::InvalidReward(format!(
                        "must have exactly one output, has {}",
                        self.output_map.len()
                    ))),
                }
            }
        }
    }

    /// Validates the transaction, logging the reason when it is rejected
    pub fn is_valid(&self) -> bool {
        match self.validate() {
            Ok(()) => true,
            Err(err) => {
                error!("Transaction {} is invalid: {}", self.id, err);
                false
            }
        }
    }

    /// The sender of a transfer, `None` for rewards
    pub fn sender(&self) -> Option<&Address> {
        match &self.input {
            TransactionInput::Transfer(input) => Some(&input.address),
            TransactionInput::Reward => None,
        }
    }

    pub fn is_reward(&self) -> bool {
        matches!(self.input, TransactionInput::Reward)
    }
}
