use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionRequest, U256};

use crate::FeeEstimate;

/// A contract call being threaded through gas and nonce resolution before it
/// is signed. Built by a typed call-builder, completed by the transactor.
#[derive(Debug, Clone, Default)]
pub struct PendingCall {
    /// Destination contract. A call without one cannot be sent.
    pub to: Option<Address>,
    /// ABI-encoded calldata
    pub data: Bytes,
    /// Ether attached to the call
    pub value: Option<U256>,
    /// Fixed gas budget; when unset the transactor estimates one
    pub gas_limit: Option<U256>,
    /// Resolved pricing scheme, set by the transactor before signing
    pub fee: Option<FeeEstimate>,
    /// Resolved nonce, set by the transactor before signing
    pub nonce: Option<u64>,
}

impl PendingCall {
    /// A call to `to` with the given calldata.
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to: Some(to),
            data,
            ..Default::default()
        }
    }

    /// Attach ether to the call.
    pub fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    /// Use a fixed gas budget instead of estimating one.
    pub fn gas_limit(mut self, gas_limit: U256) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    /// Assemble the wire transaction for the current state of the call. The
    /// variant follows the pricing scheme; a call that has not been priced yet
    /// assembles as a legacy transaction with no price, which is sufficient
    /// for simulation and gas estimation.
    pub fn to_typed(&self, from: Option<Address>) -> TypedTransaction {
        match self.fee {
            Some(FeeEstimate::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }) => {
                let mut tx = Eip1559TransactionRequest::new()
                    .data(self.data.clone())
                    .max_fee_per_gas(max_fee_per_gas)
                    .max_priority_fee_per_gas(max_priority_fee_per_gas);
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                if let Some(from) = from {
                    tx = tx.from(from);
                }
                if let Some(value) = self.value {
                    tx = tx.value(value);
                }
                if let Some(gas) = self.gas_limit {
                    tx = tx.gas(gas);
                }
                if let Some(nonce) = self.nonce {
                    tx = tx.nonce(nonce);
                }
                TypedTransaction::Eip1559(tx)
            }
            fee => {
                let mut tx = TransactionRequest::new().data(self.data.clone());
                if let Some(FeeEstimate::Legacy { gas_price }) = fee {
                    tx = tx.gas_price(gas_price);
                }
                if let Some(to) = self.to {
                    tx = tx.to(to);
                }
                if let Some(from) = from {
                    tx = tx.from(from);
                }
                if let Some(value) = self.value {
                    tx = tx.value(value);
                }
                if let Some(gas) = self.gas_limit {
                    tx = tx.gas(gas);
                }
                if let Some(nonce) = self.nonce {
                    tx = tx.nonce(nonce);
                }
                TypedTransaction::Legacy(tx)
            }
        }
    }
}
