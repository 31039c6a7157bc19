use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use ethers::signers::Signer;
use eyre::Result;
use tracing::info;

use keeper_base::Job;
use keeper_core::SendError;
use keeper_ethereum::Transactor;

use crate::contracts::{OracleRelayer, Osm};

/// Reverts meaning the price feed has no new result to pull yet.
const EXPECTED_REVERTS: &[&str] = &["OSM/not-passed", "DSM/not-passed"];

/// Pulls the next price into one collateral's FSM, then relays it into the
/// core engine.
///
/// The two calls are chained: the relayer update only makes sense on top of a
/// fresh FSM result, so it is skipped whenever the FSM update is skipped.
pub struct CollateralFsmPinger<P, S> {
    transactor: Transactor<P, S>,
    osm: Osm,
    oracle_relayer: OracleRelayer,
    collateral_type: [u8; 32],
    min_update_interval: Duration,
}

impl<P, S> CollateralFsmPinger<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer,
{
    pub fn new(
        transactor: Transactor<P, S>,
        osm: Osm,
        oracle_relayer: OracleRelayer,
        collateral_type: [u8; 32],
        min_update_interval: Duration,
    ) -> Self {
        Self {
            transactor,
            osm,
            oracle_relayer,
            collateral_type,
            min_update_interval,
        }
    }

    /// Whether an update should be attempted this run. Inside the interval an
    /// attempt is still due if the signer has a transaction stuck in the
    /// mempool, since that one needs to be displaced with a higher price.
    async fn due(&self) -> Result<bool> {
        let call = self.osm.last_update_time();
        let last_update = self.transactor.read_uint(&call).await?.as_u64();
        let now = self.transactor.latest_block_timestamp().await?;
        if now.saturating_sub(last_update) >= self.min_update_interval.as_secs() {
            return Ok(true);
        }
        Ok(self.transactor.is_pending().await?)
    }
}

#[async_trait]
impl<P, S> Job for CollateralFsmPinger<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer + 'static,
{
    fn name(&self) -> &'static str {
        "collateral-fsm"
    }

    async fn run(&mut self) -> Result<()> {
        if !self.due().await? {
            info!("last update is recent and nothing is pending, skipping");
            return Ok(());
        }

        let update = self.osm.update_result();
        let hash = match self.transactor.send_expecting(update, true, EXPECTED_REVERTS).await {
            Ok(Some(hash)) => hash,
            // Feed delay not elapsed, or an unexpected revert already alerted.
            Ok(None) | Err(SendError::SimulationReverted(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        info!(?hash, "fsm update submitted");

        let relay = self.oracle_relayer.update_collateral_price(self.collateral_type);
        let hash = self.transactor.send(relay, false).await?;
        info!(?hash, "oracle relayer update submitted");
        Ok(())
    }
}
