use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use ethers::signers::Signer;
use ethers::types::U256;
use eyre::Result;
use tracing::info;

use keeper_base::{Job, SubgraphClient};
use keeper_ethereum::Transactor;

use crate::contracts::{AccountingEngine, SafeEngine};

const SECONDS_PER_DAY: u64 = 86_400;

/// Pops matured debt blocks out of the accounting engine's queue and settles
/// as much debt against the engine's surplus as possible.
///
/// Candidate queue entries come from the subgraph: every auction created since
/// the pop delay (plus two days of slack for missed runs) marks a timestamp at
/// which debt was queued.
pub struct DebtSettlerPinger<P, S> {
    transactor: Transactor<P, S>,
    accounting_engine: AccountingEngine,
    safe_engine: SafeEngine,
    subgraph: SubgraphClient,
}

impl<P, S> DebtSettlerPinger<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer,
{
    pub fn new(
        transactor: Transactor<P, S>,
        accounting_engine: AccountingEngine,
        safe_engine: SafeEngine,
        subgraph: SubgraphClient,
    ) -> Self {
        Self {
            transactor,
            accounting_engine,
            safe_engine,
            subgraph,
        }
    }

    async fn pop_and_settle(&mut self, now: u64, pop_delay: u64, timestamps: &[u64]) -> Result<()> {
        let mut did_pop = false;
        let mut unqueued = U256::zero();
        for &timestamp in timestamps {
            if now <= timestamp + pop_delay {
                continue;
            }
            let queued_call = self.accounting_engine.debt_queue(timestamp);
            let queued = self.transactor.read_uint(&queued_call).await?;
            if queued.is_zero() {
                continue;
            }
            let pop = self.accounting_engine.pop_debt_from_queue(timestamp);
            let hash = self.transactor.send(pop, false).await?;
            info!(timestamp, %queued, ?hash, "debt block popped from the queue");
            did_pop = true;
            unqueued += queued;
        }

        let amount = if unqueued.is_zero() {
            // Nothing popped this run; settle what earlier runs left behind,
            // bounded by the surplus available to burn against it.
            let surplus_call = self.safe_engine.coin_balance(self.accounting_engine.0);
            let surplus = self.transactor.read_uint(&surplus_call).await?;
            let debt_call = self.accounting_engine.unqueued_unauctioned_debt();
            let debt = self.transactor.read_uint(&debt_call).await?;
            surplus.min(debt)
        } else {
            unqueued
        };
        if amount.is_zero() {
            info!("no debt to settle");
            return Ok(());
        }

        // When a pop went out this run the settle must queue behind it rather
        // than displace it.
        let settle = self.accounting_engine.settle_debt(amount);
        let hash = self.transactor.send(settle, !did_pop).await?;
        info!(%amount, ?hash, "debt settled");
        Ok(())
    }
}

#[async_trait]
impl<P, S> Job for DebtSettlerPinger<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer + 'static,
{
    fn name(&self) -> &'static str {
        "debt-settler"
    }

    async fn run(&mut self) -> Result<()> {
        let delay_call = self.accounting_engine.pop_debt_delay();
        let pop_delay = self.transactor.read_uint(&delay_call).await?.as_u64();
        let now = self.transactor.latest_block_timestamp().await?;
        let since = now.saturating_sub(pop_delay + 2 * SECONDS_PER_DAY);
        let timestamps = self.subgraph.auction_timestamps(since).await?;
        info!(count = timestamps.len(), since, "auction timestamps fetched");
        self.pop_and_settle(now, pop_delay, &timestamps).await
    }
}
