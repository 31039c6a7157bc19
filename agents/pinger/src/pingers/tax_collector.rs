use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use ethers::signers::Signer;
use eyre::Result;
use tracing::info;

use keeper_base::Job;
use keeper_core::SendError;
use keeper_ethereum::Transactor;

use crate::contracts::TaxCollector;

/// Collects the accrued stability fee for one collateral type.
///
/// `taxSingle` is always worth calling, so every run broadcasts with an
/// override, displacing whatever previous attempt is still in the mempool.
pub struct TaxCollectorPinger<P, S> {
    transactor: Transactor<P, S>,
    tax_collector: TaxCollector,
    collateral_type: [u8; 32],
}

impl<P, S> TaxCollectorPinger<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer,
{
    pub fn new(
        transactor: Transactor<P, S>,
        tax_collector: TaxCollector,
        collateral_type: [u8; 32],
    ) -> Self {
        Self {
            transactor,
            tax_collector,
            collateral_type,
        }
    }
}

#[async_trait]
impl<P, S> Job for TaxCollectorPinger<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer + 'static,
{
    fn name(&self) -> &'static str {
        "tax-collector"
    }

    async fn run(&mut self) -> Result<()> {
        let call = self.tax_collector.tax_single(self.collateral_type);
        match self.transactor.send_expecting(call, true, &[]).await {
            Ok(Some(hash)) => {
                info!(?hash, "tax collection submitted");
                Ok(())
            }
            // The revert was already alerted with its decoded reason.
            Ok(None) | Err(SendError::SimulationReverted(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
