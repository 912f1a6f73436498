//! A proof-of-work ledger: signed transfers, a pending pool, mining with a per-block
//! difficulty retarget, and longest-valid-chain fork choice between peers.

pub mod blockchain;
pub mod config;
pub mod network;
