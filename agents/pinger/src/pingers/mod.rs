//! The maintenance jobs that keep the protocol's periodic machinery moving.

pub use debt_settler::DebtSettlerPinger;
pub use fsm::CollateralFsmPinger;
pub use pause_executor::PauseExecutorPinger;
pub use stability_fee_treasury::StabilityFeeTreasuryPinger;
pub use tax_collector::TaxCollectorPinger;

mod debt_settler;
mod fsm;
mod pause_executor;
mod stability_fee_treasury;
mod tax_collector;
