//! Hand-written call builders for the protocol contracts the jobs touch.
//!
//! Each method encodes its selector and arguments into a [`PendingCall`],
//! carrying the fixed gas budget known to be sufficient for that call.

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::id;

use keeper_core::PendingCall;

/// Gas budgets per contract call.
pub const COLLATERAL_FSM_UPDATE_RESULT_GAS: u64 = 300_000;
/// `OracleRelayer.updateCollateralPrice`
pub const ORACLE_RELAYER_UPDATE_COLLATERAL_PRICE_GAS: u64 = 200_000;
/// `TaxCollector.taxSingle`
pub const TAX_COLLECTOR_TAX_SINGLE_GAS: u64 = 200_000;
/// `AccountingEngine.popDebtFromQueue`
pub const ACCOUNTING_ENGINE_POP_DEBT_FROM_QUEUE_GAS: u64 = 200_000;
/// `AccountingEngine.settleDebt`
pub const ACCOUNTING_ENGINE_SETTLE_DEBT_GAS: u64 = 200_000;
/// `StabilityFeeTreasury.transferSurplusFunds`
pub const STABILITY_FEE_TREASURY_TRANSFER_SURPLUS_FUNDS_GAS: u64 = 400_000;

fn encode_call(to: Address, signature: &str, args: &[Token]) -> PendingCall {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(args));
    PendingCall::new(to, Bytes::from(data))
}

/// A call to a no-argument view getter, by method name.
pub fn view_call(to: Address, method: &str) -> PendingCall {
    encode_call(to, &format!("{method}()"), &[])
}

/// An oracle security module feeding one collateral's price.
#[derive(Debug, Clone, Copy)]
pub struct Osm(pub Address);

impl Osm {
    /// Pull the next result from the price feed.
    pub fn update_result(&self) -> PendingCall {
        encode_call(self.0, "updateResult()", &[])
            .gas_limit(U256::from(COLLATERAL_FSM_UPDATE_RESULT_GAS))
    }

    /// Timestamp of the last accepted result.
    pub fn last_update_time(&self) -> PendingCall {
        view_call(self.0, "lastUpdateTime")
    }
}

/// The oracle relayer pushing FSM prices into the core engine.
#[derive(Debug, Clone, Copy)]
pub struct OracleRelayer(pub Address);

impl OracleRelayer {
    /// Recompute the safety price of `collateral_type` from its FSM.
    pub fn update_collateral_price(&self, collateral_type: [u8; 32]) -> PendingCall {
        encode_call(
            self.0,
            "updateCollateralPrice(bytes32)",
            &[Token::FixedBytes(collateral_type.to_vec())],
        )
        .gas_limit(U256::from(ORACLE_RELAYER_UPDATE_COLLATERAL_PRICE_GAS))
    }
}

/// The stability-fee tax collector.
#[derive(Debug, Clone, Copy)]
pub struct TaxCollector(pub Address);

impl TaxCollector {
    /// Collect the accrued stability fee for one collateral type.
    pub fn tax_single(&self, collateral_type: [u8; 32]) -> PendingCall {
        encode_call(
            self.0,
            "taxSingle(bytes32)",
            &[Token::FixedBytes(collateral_type.to_vec())],
        )
        .gas_limit(U256::from(TAX_COLLECTOR_TAX_SINGLE_GAS))
    }
}

/// The accounting engine managing the protocol's debt queue.
#[derive(Debug, Clone, Copy)]
pub struct AccountingEngine(pub Address);

impl AccountingEngine {
    /// Seconds a queued debt block must wait before it can be popped.
    pub fn pop_debt_delay(&self) -> PendingCall {
        view_call(self.0, "popDebtDelay")
    }

    /// Debt queued at `timestamp`, zero once popped.
    pub fn debt_queue(&self, timestamp: u64) -> PendingCall {
        encode_call(
            self.0,
            "debtQueue(uint256)",
            &[Token::Uint(U256::from(timestamp))],
        )
    }

    /// Debt neither queued nor on auction.
    pub fn unqueued_unauctioned_debt(&self) -> PendingCall {
        view_call(self.0, "unqueuedUnauctionedDebt")
    }

    /// Pop the debt block queued at `timestamp`.
    pub fn pop_debt_from_queue(&self, timestamp: u64) -> PendingCall {
        encode_call(
            self.0,
            "popDebtFromQueue(uint256)",
            &[Token::Uint(U256::from(timestamp))],
        )
        .gas_limit(U256::from(ACCOUNTING_ENGINE_POP_DEBT_FROM_QUEUE_GAS))
    }

    /// Cancel `amount` of debt against the engine's surplus.
    pub fn settle_debt(&self, amount: U256) -> PendingCall {
        encode_call(self.0, "settleDebt(uint256)", &[Token::Uint(amount)])
            .gas_limit(U256::from(ACCOUNTING_ENGINE_SETTLE_DEBT_GAS))
    }
}

/// The core collateral/debt ledger.
#[derive(Debug, Clone, Copy)]
pub struct SafeEngine(pub Address);

impl SafeEngine {
    /// System-coin balance of `owner`.
    pub fn coin_balance(&self, owner: Address) -> PendingCall {
        encode_call(self.0, "coinBalance(address)", &[Token::Address(owner)])
    }
}

/// The treasury holding accrued stability fees.
#[derive(Debug, Clone, Copy)]
pub struct StabilityFeeTreasury(pub Address);

impl StabilityFeeTreasury {
    /// Transfer surplus above the treasury's buffer to the accounting engine.
    pub fn transfer_surplus_funds(&self) -> PendingCall {
        encode_call(self.0, "transferSurplusFunds()", &[])
            .gas_limit(U256::from(STABILITY_FEE_TREASURY_TRANSFER_SURPLUS_FUNDS_GAS))
    }
}

/// The governance delay module.
#[derive(Debug, Clone, Copy)]
pub struct DsPause(pub Address);

impl DsPause {
    /// Whether the transaction with `full_hash` is scheduled.
    pub fn scheduled_transactions(&self, full_hash: H256) -> PendingCall {
        encode_call(
            self.0,
            "scheduledTransactions(bytes32)",
            &[Token::FixedBytes(full_hash.as_bytes().to_vec())],
        )
    }

    /// Execute a scheduled proposal once its delay has elapsed.
    pub fn execute_transaction(
        &self,
        usr: Address,
        code_hash: H256,
        parameters: Bytes,
        earliest_execution_time: u64,
    ) -> PendingCall {
        encode_call(
            self.0,
            "executeTransaction(address,bytes32,bytes,uint256)",
            &[
                Token::Address(usr),
                Token::FixedBytes(code_hash.as_bytes().to_vec()),
                Token::Bytes(parameters.to_vec()),
                Token::Uint(U256::from(earliest_execution_time)),
            ],
        )
    }
}
