//! Read-only monitoring jobs: contract liveness and wallet balances.

pub use balance::BalanceChecker;
pub use liveness::LivenessChecker;

mod balance;
mod liveness;
