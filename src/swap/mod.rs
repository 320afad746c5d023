//! Swap Orchestration
//!
//! The nursery and its supporting pieces: per-swap named locks and the
//! outbound event bus.

pub mod cache;
pub mod events;
pub mod locks;
pub mod nursery;

pub use cache::SwapCache;
pub use events::{EventBus, SwapEvent, SwapUpdate};
pub use locks::LockMap;
pub use nursery::{CreateReverseSwap, CreateSwap, NurseryConfig, NurseryError, SwapNursery};
