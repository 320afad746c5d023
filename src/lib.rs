//! swapd - Swap Coordination Engine
//!
//! The core of a non-custodial atomic-swap service bridging a Bitcoin-like
//! chain and a Lightning-style payment network. Users run two directions of
//! swap:
//!
//! 1. **Submarine**: the user locks coins in an on-chain HTLC; once the
//!    lockup confirms the service pays their Lightning invoice and claims the
//!    lockup with the revealed preimage.
//! 2. **Reverse submarine**: the service locks coins on-chain; the user pays
//!    a hold-invoice, claims the lockup revealing their preimage, and the
//!    service settles the invoice with it.
//!
//! The heart is the [`swap::SwapNursery`]: it builds scripts and
//! transactions, tracks every live swap through a strict state machine,
//! reacts to chain and Lightning events, and drives claim or refund
//! deterministically. The chain daemon, Lightning node, wallet and rate
//! oracle are consumed behind traits.
//!
//! ## Module Organization
//!
//! - `common/` - root error type and its `{code, message}` surface
//! - `config` - environment-based configuration
//! - `logging` - tracing initialization
//! - `types/` - swap entities and the lifecycle state machine
//! - `script` - HTLC redeem scripts and lockup addresses
//! - `chain/` - RPC client, notification observer, claim/refund builder
//! - `lightning/` - adapter over the consumed Lightning client
//! - `rates` - fee & rate oracle interfaces
//! - `wallet` - wallet interface and BIP32 derivation
//! - `storage/` - repository traits, SQLite and in-memory stores
//! - `swap/` - the nursery, per-swap locks, cache and event bus

pub mod chain;
pub mod common;
pub mod config;
pub mod lightning;
pub mod logging;
pub mod rates;
pub mod script;
pub mod storage;
pub mod swap;
pub mod types;
pub mod wallet;

// Re-exports: errors and configuration
pub use common::{ErrorResponse, SwapdError};
pub use config::{Config, ConfigError, Network};
pub use logging::{init_from_config, init_logging, LoggingError};

// Re-exports: the nursery and its collaborator interfaces
pub use chain::{ChainClient, ChainObserver, CoreRpcClient};
pub use lightning::{LightningAdapter, LightningClient};
pub use rates::{ChainFeeEstimator, FeeEstimator, RateProvider};
pub use storage::{MemoryRepository, SqliteRepository, SwapRepository};
pub use swap::{
    CreateReverseSwap, CreateSwap, EventBus, NurseryConfig, SwapEvent, SwapNursery, SwapUpdate,
};
pub use types::{OrderSide, Pair, ReverseSwap, Swap, SwapStatus};
pub use wallet::{KeyProvider, Wallet};

/// Satoshi conversion helpers
pub mod units {
    pub const SATS_PER_BTC: u64 = 100_000_000;
    pub const MSATS_PER_SAT: u64 = 1_000;

    pub fn btc_to_sats(btc: f64) -> u64 {
        (btc * SATS_PER_BTC as f64).round() as u64
    }

    pub fn sats_to_btc(sats: u64) -> f64 {
        sats as f64 / SATS_PER_BTC as f64
    }

    pub fn sats_to_msats(sats: u64) -> u64 {
        sats * MSATS_PER_SAT
    }
}
