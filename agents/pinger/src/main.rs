//! The pinger runs one maintenance job per invocation: it pokes the protocol
//! contracts that need periodic calls and runs the monitoring checkers.

#![forbid(unsafe_code)]
#![warn(unused_extern_crates)]

use std::env;
use std::sync::Arc;

use ethers::providers::Provider;
use ethers::utils::format_bytes32_string;
use eyre::{bail, eyre, Result};

use keeper_base::settings::Settings;
use keeper_base::{run_job, Job, LocalStorage, StatusStore, SubgraphClient};

use crate::checkers::{BalanceChecker, LivenessChecker};
use crate::contracts::{
    AccountingEngine, DsPause, OracleRelayer, Osm, SafeEngine, StabilityFeeTreasury, TaxCollector,
};
use crate::pingers::{
    CollateralFsmPinger, DebtSettlerPinger, PauseExecutorPinger, StabilityFeeTreasuryPinger,
    TaxCollectorPinger,
};

mod checkers;
mod contracts;
mod pingers;

#[cfg(test)]
mod test_utils;

fn collateral_type(settings: &Settings) -> Result<[u8; 32]> {
    let name = settings
        .collateral_type
        .as_deref()
        .ok_or_else(|| eyre!("no collateral_type configured"))?;
    format_bytes32_string(name).map_err(|e| eyre!("invalid collateral_type ({name}): {e}"))
}

fn subgraph(settings: &Settings, http: reqwest::Client) -> Result<SubgraphClient> {
    let urls = settings.subgraph_urls()?;
    if urls.is_empty() {
        bail!("no subgraph_urls configured");
    }
    Ok(SubgraphClient::new(http, urls))
}

fn build_job(name: &str, settings: &Settings) -> Result<Box<dyn Job>> {
    Ok(match name {
        "collateral-fsm" => {
            let core = settings.try_into_core()?;
            Box::new(CollateralFsmPinger::new(
                core.transactor,
                Osm(settings.contract("osm")?),
                OracleRelayer(settings.contract("oracle_relayer")?),
                collateral_type(settings)?,
                settings.min_update_interval()?,
            ))
        }
        "tax-collector" => {
            let core = settings.try_into_core()?;
            Box::new(TaxCollectorPinger::new(
                core.transactor,
                TaxCollector(settings.contract("tax_collector")?),
                collateral_type(settings)?,
            ))
        }
        "debt-settler" => {
            let core = settings.try_into_core()?;
            let subgraph = subgraph(settings, core.http.clone())?;
            Box::new(DebtSettlerPinger::new(
                core.transactor,
                AccountingEngine(settings.contract("accounting_engine")?),
                SafeEngine(settings.contract("safe_engine")?),
                subgraph,
            ))
        }
        "stability-fee-treasury" => {
            let core = settings.try_into_core()?;
            Box::new(StabilityFeeTreasuryPinger::new(
                core.transactor,
                StabilityFeeTreasury(settings.contract("stability_fee_treasury")?),
            ))
        }
        "pause-executor" => {
            let core = settings.try_into_core()?;
            let subgraph = subgraph(settings, core.http.clone())?;
            Box::new(PauseExecutorPinger::new(
                core.transactor,
                DsPause(settings.contract("ds_pause")?),
                subgraph,
            ))
        }
        "liveness-checker" => {
            let http = reqwest::Client::new();
            let pool = settings.pool(http.clone())?;
            let alerts = Arc::new(settings.notifier(http.clone())?);
            let store: Arc<dyn StatusStore> = Arc::new(LocalStorage::new(
                settings.status_store_path.as_deref().unwrap_or("status"),
            ));
            let subgraph = subgraph(settings, http).ok();
            Box::new(LivenessChecker::new(
                pool,
                settings.stale_threshold()?,
                settings.liveness_checks.clone(),
                subgraph,
                store,
                settings.network.clone(),
                alerts,
            ))
        }
        "balance-checker" => {
            let http = reqwest::Client::new();
            let pool = settings.pool(http.clone())?;
            let alerts = Arc::new(settings.notifier(http)?);
            let min_balance = settings
                .min_balance()?
                .ok_or_else(|| eyre!("no min_balance configured"))?;
            Box::new(BalanceChecker::new(
                Provider::new(pool),
                settings.watched_wallets.clone(),
                min_balance,
                alerts,
            ))
        }
        other => bail!(
            "unknown job {other}; expected one of collateral-fsm, tax-collector, \
             debt-settler, stability-fee-treasury, pause-executor, liveness-checker, \
             balance-checker"
        ),
    })
}

async fn _main() -> Result<()> {
    color_eyre::install()?;

    let settings = Settings::new()?;
    settings.tracing.start_tracing()?;

    let name = env::args()
        .nth(1)
        .ok_or_else(|| eyre!("usage: pinger <job>"))?;
    let alerts = settings.notifier(reqwest::Client::new())?;
    let mut job = build_job(&name, &settings)?;
    run_job(job.as_mut(), &alerts).await
}

fn main() -> Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(_main())
}
