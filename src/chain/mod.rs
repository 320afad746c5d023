//! Chain Layer
//!
//! JSON-RPC client for the UTXO chain, the notification observer that turns
//! raw chain data into swap-relevant events, and the claim/refund
//! transaction builder.

pub mod builder;
pub mod client;
pub mod observer;

pub use client::{
    BlockchainInfo, ChainCapabilities, ChainClient, ChainError, ChainNotification, CoreRpcClient,
    VerboseBlock, ZmqNotification,
};
pub use observer::{ChainEvent, ChainObserver};
