use std::sync::Arc;

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::{Address, U256};
use eyre::{eyre, Result};
use tracing::{debug, warn};

use keeper_base::settings::WatchedWallet;
use keeper_base::Job;
use keeper_core::AlertSink;

/// Alerts when any watched bot wallet drops below the funding threshold.
pub struct BalanceChecker<P> {
    provider: Provider<P>,
    wallets: Vec<WatchedWallet>,
    min_balance: U256,
    alerts: Arc<dyn AlertSink>,
}

impl<P> BalanceChecker<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        provider: Provider<P>,
        wallets: Vec<WatchedWallet>,
        min_balance: U256,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            provider,
            wallets,
            min_balance,
            alerts,
        }
    }
}

#[async_trait]
impl<P> Job for BalanceChecker<P>
where
    P: JsonRpcClient + 'static,
{
    fn name(&self) -> &'static str {
        "balance-checker"
    }

    async fn run(&mut self) -> Result<()> {
        for wallet in &self.wallets {
            let address: Address = wallet
                .address
                .parse()
                .map_err(|e| eyre!("invalid address for wallet {} ({}): {e}", wallet.name, wallet.address))?;
            let balance = self.provider.get_balance(address, None).await?;
            if balance < self.min_balance {
                warn!(wallet = %wallet.name, %balance, "wallet underfunded");
                self.alerts
                    .send_error(&format!(
                        "bot {} with address {} is low on funds, balance: {balance} wei",
                        wallet.name, wallet.address
                    ))
                    .await;
            } else {
                debug!(wallet = %wallet.name, %balance, "wallet funded");
            }
        }
        Ok(())
    }
}
