//! Shared types for the keeper agents: the pending-call builder, gas quotes,
//! the broadcast error taxonomy, revert-reason decoding and the alert sink
//! boundary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use error::*;
pub use traits::*;
pub use types::*;
pub use utils::*;

mod error;
mod traits;
mod types;
/// Revert-reason decoding helpers
pub mod utils;
