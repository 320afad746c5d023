//! Configuration-independent shared pieces: the root error type and its
//! wire-facing `{code, message}` surface.

pub mod error;

pub use error::{ErrorResponse, Result, SwapdError};
