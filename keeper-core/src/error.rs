use ethers::providers::ProviderError;

/// Errors returned when broadcasting a transaction.
///
/// Only `SimulationReverted` is subject to the caller's expected-revert
/// classification; everything else is either a fatal precondition failure or
/// an infrastructure error that the next scheduled run will retry. A missing
/// signer is not represented here: signer configuration is validated when the
/// transactor is assembled, before anything touches the network.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The call has no destination address
    #[error("incomplete transaction: no destination address")]
    IncompleteTransaction,
    /// A network-level failure talking to the endpoints. Propagated without
    /// alerting since transient infrastructure errors are expected.
    #[error(transparent)]
    Network(#[from] ProviderError),
    /// The read-only pre-check (or gas estimation) reverted
    #[error("simulation reverted: {0}")]
    SimulationReverted(String),
    /// Neither the gas oracle nor the node fallback produced a usable price
    #[error("could not determine a gas price from any source")]
    UndeterminedGasPrice,
    /// The signed transaction was rejected at broadcast
    #[error("transaction broadcast failed: {0}")]
    SendFailed(String),
}

/// Errors returned by a read-only `eth_call` pre-check.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The node executed the call and rejected it. Carries the decoded
    /// require/revert string when the payload matches `Error(string)`,
    /// otherwise the raw node message.
    #[error("reverted: {0}")]
    Reverted(String),
    /// A transport-level failure; the call never executed
    #[error(transparent)]
    Network(#[from] ProviderError),
}
