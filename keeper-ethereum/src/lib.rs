//! Ethereum-side machinery for the keeper jobs: the multi-endpoint RPC pool,
//! endpoint health monitoring, gas price strategies, nonce sequencing and the
//! transaction broadcaster.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use gas::*;
pub use health::*;
pub use nonce::*;
pub use rpc_clients::*;
pub use tx::*;

mod gas;
mod health;
mod nonce;
mod rpc_clients;
mod tx;

#[cfg(test)]
pub(crate) mod test_utils;
