use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use ethers::signers::Signer;
use eyre::Result;
use tracing::info;

use keeper_base::Job;
use keeper_core::SendError;
use keeper_ethereum::Transactor;

use crate::contracts::StabilityFeeTreasury;

/// Revert meaning the treasury transferred recently and is still cooling down.
const EXPECTED_REVERTS: &[&str] = &["StabilityFeeTreasury/transfer-cooldown-not-passed"];

/// Moves the treasury's surplus above its buffer into the accounting engine.
pub struct StabilityFeeTreasuryPinger<P, S> {
    transactor: Transactor<P, S>,
    treasury: StabilityFeeTreasury,
}

impl<P, S> StabilityFeeTreasuryPinger<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer,
{
    pub fn new(transactor: Transactor<P, S>, treasury: StabilityFeeTreasury) -> Self {
        Self { transactor, treasury }
    }
}

#[async_trait]
impl<P, S> Job for StabilityFeeTreasuryPinger<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer + 'static,
{
    fn name(&self) -> &'static str {
        "stability-fee-treasury"
    }

    async fn run(&mut self) -> Result<()> {
        let call = self.treasury.transfer_surplus_funds();
        match self.transactor.send_expecting(call, true, EXPECTED_REVERTS).await {
            Ok(Some(hash)) => {
                info!(?hash, "surplus transfer submitted");
                Ok(())
            }
            Ok(None) | Err(SendError::SimulationReverted(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use ethers::types::{Address, Bytes, H256, U256};

    use keeper_core::encode_revert;

    use super::*;
    use crate::test_utils::{mock_transactor, ProviderMock, RecordingAlerts};

    const TX_COUNT: &str = "eth_getTransactionCount";

    fn pinger(
        mock: &ProviderMock,
        alerts: &RecordingAlerts,
    ) -> StabilityFeeTreasuryPinger<ProviderMock, ethers::signers::LocalWallet> {
        StabilityFeeTreasuryPinger::new(
            mock_transactor(mock, alerts),
            StabilityFeeTreasury(Address::repeat_byte(0x06)),
        )
    }

    #[tokio::test]
    async fn transfers_when_the_cooldown_has_passed() {
        let mock = ProviderMock::new();
        mock.push(TX_COUNT, U256::from(1u64));
        mock.push(TX_COUNT, U256::from(1u64));
        mock.push("eth_call", Bytes::default());
        mock.push("eth_sendRawTransaction", H256::repeat_byte(0x0d));
        let alerts = RecordingAlerts::new();

        pinger(&mock, &alerts).run().await.unwrap();

        assert_eq!(mock.requests_for("eth_sendRawTransaction").len(), 1);
        assert!(alerts.errors().is_empty());
    }

    #[tokio::test]
    async fn cooldown_revert_is_a_quiet_no_op() {
        let mock = ProviderMock::new();
        mock.push(TX_COUNT, U256::from(1u64));
        mock.push(TX_COUNT, U256::from(1u64));
        mock.push_error(
            "eth_call",
            "execution reverted",
            Some(serde_json::Value::String(format!(
                "0x{}",
                hex::encode(encode_revert(
                    "StabilityFeeTreasury/transfer-cooldown-not-passed"
                ))
            ))),
        );
        let alerts = RecordingAlerts::new();

        pinger(&mock, &alerts).run().await.unwrap();

        assert!(mock.requests_for("eth_sendRawTransaction").is_empty());
        assert!(alerts.errors().is_empty());
        assert!(alerts.infos().is_empty());
    }
}
