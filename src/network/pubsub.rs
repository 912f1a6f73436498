use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::blockchain::{Block, Transaction};

/// Number of undelivered messages a slow subscriber may fall behind by
const BUS_CAPACITY: usize = 256;

/// Errors that can occur while publishing
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("Failed to encode message: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Topics peers exchange data on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    /// A full chain, JSON encoded
    Blockchain,

    /// A single transaction, JSON encoded
    Transaction,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Blockchain => write!(f, "BLOCKCHAIN"),
            Channel::Transaction => write!(f, "TRANSACTION"),
        }
    }
}

/// A message as it travels over the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The node that published the message
    pub origin: Uuid,
    pub channel: Channel,
    pub payload: String,
}

/// A fire-and-forget publish primitive
///
/// Delivery is at most once and unordered; receivers must validate everything they get.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, message: Message);
}

/// An in-process bus connecting every node that subscribes to it
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<Message>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        LocalBus { sender }
    }

    /// Receives every message published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }
}

impl Broadcaster for LocalBus {
    fn publish(&self, message: Message) {
        let channel = message.channel;
        match self.sender.send(message) {
            Ok(receivers) => debug!("Published on {} to {} subscribers", channel, receivers),
            Err(_) => debug!("Published on {} with nobody listening", channel),
        }
    }
}

/// Publishes ledger data on behalf of one node
#[derive(Clone)]
pub struct Publisher {
    origin: Uuid,
    bus: Arc<dyn Broadcaster>,
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher").field("origin", &self.origin).finish()
    }
}

impl Publisher {
    pub fn new(origin: Uuid, bus: Arc<dyn Broadcaster>) -> Self {
        Publisher { origin, bus }
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    fn publish<T: Serialize + ?Sized>(&self, channel: Channel, value: &T) -> Result<(), PubSubError> {
        let payload = serde_json::to_string(value)?;
        self.bus.publish(Message {
            origin: self.origin,
            channel,
            payload,
        });
        Ok(())
    }

    /// Sends the whole chain to every peer
    pub fn broadcast_chain(&self, chain: &[Block]) -> Result<(), PubSubError> {
        self.publish(Channel::Blockchain, chain)
    }

    pub fn broadcast_transaction(&self, transaction: &Transaction) -> Result<(), PubSubError> {
        self.publish(Channel::Transaction, transaction)
    }
}
