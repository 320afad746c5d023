//! Shared data types

pub mod swap;

pub use swap::{
    generate_swap_id, OrderSide, Pair, ReverseSwap, Swap, SwapStatus, TransactionInfo,
};
pub(crate) use swap::unix_now;
