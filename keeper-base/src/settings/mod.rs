//! Settings shared by every keeper job.
//!
//! Loaded from `config/default` plus an optional `config/<RUN_MODE>` file,
//! with `KEEPER_`-prefixed environment variables layered on top. Numeric knobs
//! are kept as strings and parsed at the point of use so a bad value names the
//! offending key instead of failing opaquely inside deserialization.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use ethers::providers::{Http, Provider};
use ethers::signers::coins_bip39::English;
use ethers::signers::{LocalWallet, MnemonicBuilder, Signer};
use ethers::types::{Address, U256};
use eyre::{bail, eyre, Report};
use serde::Deserialize;
use url::Url;

use keeper_core::{AlertSink, ConfidenceLevel};
use keeper_ethereum::{
    BroadcastPolicy, EndpointPool, ExternalPriceApi, GasPriceOracle, GasPriceStrategy,
    NodeFeeEstimate, Transactor, NODE_STALE_THRESHOLD, RPC_STALL_TIMEOUT,
};

use crate::notifier::Notifier;

/// Tracing subscriber management
pub mod trace;

pub use trace::TracingConfig;

/// Ethereum signer types
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignerConf {
    /// A local hex key
    HexKey {
        /// Hex string of the private key, with or without 0x prefix
        key: String,
    },
    /// A BIP-39 mnemonic phrase
    Mnemonic {
        /// Space-separated seed words
        phrase: String,
    },
    /// No local signing capability
    #[serde(other)]
    #[default]
    Node,
}

impl SignerConf {
    /// Build the local wallet, bound to `chain_id`. Jobs that sign
    /// transactions fail here before anything touches the network.
    pub fn try_into_wallet(&self, chain_id: u64) -> Result<LocalWallet, Report> {
        match self {
            SignerConf::HexKey { key } => Ok(key
                .trim_start_matches("0x")
                .parse::<LocalWallet>()?
                .with_chain_id(chain_id)),
            SignerConf::Mnemonic { phrase } => Ok(MnemonicBuilder::<English>::default()
                .phrase(phrase.as_str())
                .build()?
                .with_chain_id(chain_id)),
            SignerConf::Node => bail!("no local signer configured"),
        }
    }
}

/// One contract freshness check run by the liveness checker.
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessCheck {
    /// Contract name, used as the status-store key
    pub name: String,
    /// Contract address
    pub address: String,
    /// Alert once the contract has not updated for this many minutes
    pub max_delay_minutes: u64,
    /// Getter returning the last update timestamp; `lastUpdateTime` when unset
    #[serde(default)]
    pub method: Option<String>,
}

/// A wallet watched by the balance checker.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchedWallet {
    /// Bot name for the alert text
    pub name: String,
    /// Wallet address
    pub address: String,
}

/// Settings. Usually this should be treated as a base config and extended with
/// job-specific fields via `#[serde(flatten)]`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Network name, used in alert formatting and as the status-store key
    pub network: String,
    /// Bot name for alert formatting
    #[serde(default)]
    pub bot_name: String,
    /// Comma-separated RPC endpoint URLs, highest priority first
    pub rpc_urls: String,
    /// Agreeing endpoints required per read; derived from the endpoint count
    /// when unset
    #[serde(default)]
    pub quorum: Option<String>,
    /// Chain id the signer binds to
    #[serde(default)]
    pub chain_id: Option<String>,
    /// Transaction signer
    #[serde(default)]
    pub signer: SignerConf,
    /// External gas price API endpoint; the node's own estimation is used
    /// when unset
    #[serde(default)]
    pub gas_api_url: Option<String>,
    /// Confidence bucket requested from the gas price API
    #[serde(default)]
    pub gas_confidence: Option<ConfidenceLevel>,
    /// Use EIP-1559 fee estimation for the node fallback
    #[serde(default)]
    pub fee_market: Option<String>,
    /// Per-endpoint stall timeout, seconds
    #[serde(default)]
    pub rpc_stall_timeout: Option<String>,
    /// Latest-block age beyond which an endpoint counts as stale, seconds
    #[serde(default)]
    pub node_stale_threshold: Option<String>,
    /// Units added on top of every gas estimate
    #[serde(default)]
    pub gas_estimate_buffer: Option<String>,
    /// Gas price escalation when displacing a pending transaction, percent
    #[serde(default)]
    pub pending_bump_percent: Option<String>,
    /// Job cooldown, minutes
    #[serde(default)]
    pub min_update_interval: Option<String>,
    /// Slack webhook for operational errors
    #[serde(default)]
    pub error_slack_webhook: Option<String>,
    /// Slack webhook for informational/governance events
    #[serde(default)]
    pub multisig_slack_webhook: Option<String>,
    /// Comma-separated subgraph URLs, primary first
    #[serde(default)]
    pub subgraph_urls: Option<String>,
    /// Directory for the local status store
    #[serde(default)]
    pub status_store_path: Option<String>,
    /// Balance alert threshold, wei
    #[serde(default)]
    pub min_balance: Option<String>,
    /// Wallets watched by the balance checker
    #[serde(default)]
    pub watched_wallets: Vec<WatchedWallet>,
    /// Contract freshness checks run by the liveness checker
    #[serde(default)]
    pub liveness_checks: Vec<LivenessCheck>,
    /// Contract addresses by name
    #[serde(default)]
    pub contracts: HashMap<String, String>,
    /// Collateral type identifier for collateral-scoped jobs
    #[serde(default)]
    pub collateral_type: Option<String>,
    /// The tracing configuration
    #[serde(default)]
    pub tracing: TracingConfig,
}

fn parse_field<T>(field: &Option<String>, name: &str) -> Result<Option<T>, Report>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    field
        .as_deref()
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| eyre!("invalid setting {name} ({v}): {e}"))
        })
        .transpose()
}

impl Settings {
    /// The configured endpoint URLs, highest priority first.
    pub fn rpc_urls(&self) -> Result<Vec<Url>, Report> {
        let urls = self
            .rpc_urls
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Url::parse(s).map_err(|e| eyre!("invalid rpc url ({s}): {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        if urls.is_empty() {
            bail!("no rpc urls configured");
        }
        Ok(urls)
    }

    /// Explicit quorum threshold, if configured.
    pub fn quorum(&self) -> Result<Option<usize>, Report> {
        parse_field(&self.quorum, "quorum")
    }

    /// The chain id the signer binds to. Mainnet when unset.
    pub fn chain_id(&self) -> Result<u64, Report> {
        Ok(parse_field(&self.chain_id, "chain_id")?.unwrap_or(1))
    }

    /// Per-endpoint stall timeout.
    pub fn stall_timeout(&self) -> Result<Duration, Report> {
        Ok(parse_field(&self.rpc_stall_timeout, "rpc_stall_timeout")?
            .map(Duration::from_secs)
            .unwrap_or(RPC_STALL_TIMEOUT))
    }

    /// Latest-block age beyond which an endpoint counts as stale.
    pub fn stale_threshold(&self) -> Result<Duration, Report> {
        Ok(parse_field(&self.node_stale_threshold, "node_stale_threshold")?
            .map(Duration::from_secs)
            .unwrap_or(NODE_STALE_THRESHOLD))
    }

    /// Job cooldown window.
    pub fn min_update_interval(&self) -> Result<Duration, Report> {
        Ok(
            parse_field(&self.min_update_interval, "min_update_interval")?
                .map(|minutes: u64| Duration::from_secs(minutes * 60))
                .unwrap_or_default(),
        )
    }

    /// Balance alert threshold in wei.
    pub fn min_balance(&self) -> Result<Option<U256>, Report> {
        self.min_balance
            .as_deref()
            .map(|v| U256::from_dec_str(v).map_err(|e| eyre!("invalid setting min_balance ({v}): {e}")))
            .transpose()
    }

    /// The subgraph URLs, primary first. Empty when unconfigured.
    pub fn subgraph_urls(&self) -> Result<Vec<Url>, Report> {
        self.subgraph_urls
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Url::parse(s).map_err(|e| eyre!("invalid subgraph url ({s}): {e}")))
            .collect()
    }

    /// Address of the named contract.
    pub fn contract(&self, name: &str) -> Result<Address, Report> {
        let raw = self
            .contracts
            .get(name)
            .ok_or_else(|| eyre!("no address configured for contract {name}"))?;
        raw.parse()
            .map_err(|e| eyre!("invalid address for contract {name} ({raw}): {e}"))
    }

    /// The send tunables.
    pub fn broadcast_policy(&self) -> Result<BroadcastPolicy, Report> {
        let default = BroadcastPolicy::default();
        Ok(BroadcastPolicy {
            gas_estimate_buffer: parse_field(&self.gas_estimate_buffer, "gas_estimate_buffer")?
                .unwrap_or(default.gas_estimate_buffer),
            pending_bump_percent: parse_field(&self.pending_bump_percent, "pending_bump_percent")?
                .unwrap_or(default.pending_bump_percent),
            confidence: self.gas_confidence.unwrap_or_default(),
        })
    }

    /// Build the endpoint pool over the configured URLs.
    pub fn pool(&self, client: reqwest::Client) -> Result<EndpointPool<Http>, Report> {
        Ok(EndpointPool::http(
            self.rpc_urls()?,
            client,
            self.stall_timeout()?,
            self.quorum()?,
        ))
    }

    /// Build the Slack notifier.
    pub fn notifier(&self, client: reqwest::Client) -> Result<Notifier, Report> {
        let error = self
            .error_slack_webhook
            .as_deref()
            .map(Url::parse)
            .transpose()?;
        let multisig = self
            .multisig_slack_webhook
            .as_deref()
            .map(Url::parse)
            .transpose()?;
        Ok(Notifier::new(
            client,
            self.network.clone(),
            self.bot_name.clone(),
            error,
            multisig,
        ))
    }

    /// Build the gas pricing chain: the external price API when configured,
    /// the node's own estimation as the fallback.
    pub fn gas_oracle(
        &self,
        client: reqwest::Client,
        provider: Provider<EndpointPool<Http>>,
    ) -> Result<GasPriceOracle, Report> {
        let mut strategies: Vec<Box<dyn GasPriceStrategy>> = Vec::new();
        if let Some(url) = &self.gas_api_url {
            strategies.push(Box::new(ExternalPriceApi::new(client, Url::parse(url)?)));
        }
        let fee_market = parse_field(&self.fee_market, "fee_market")?.unwrap_or(false);
        strategies.push(Box::new(NodeFeeEstimate::new(provider, fee_market)));
        Ok(GasPriceOracle::new(strategies))
    }

    /// Assemble everything a job needs to read, price, sign and send.
    pub fn try_into_core(&self) -> Result<JobCore, Report> {
        let http = reqwest::Client::new();
        let pool = self.pool(http.clone())?;
        let provider = Provider::new(pool.clone());
        let alerts: Arc<dyn AlertSink> = Arc::new(self.notifier(http.clone())?);
        let wallet = self.signer.try_into_wallet(self.chain_id()?)?;
        let gas_oracle = self.gas_oracle(http.clone(), provider.clone())?;
        let transactor = Transactor::new(
            provider,
            wallet,
            gas_oracle,
            self.broadcast_policy()?,
            alerts.clone(),
        );
        Ok(JobCore {
            transactor,
            pool,
            alerts,
            http,
        })
    }

    /// Read settings from the config files and the environment.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // E.g. KEEPER_RPC_URLS sets the rpc_urls key
            .add_source(Environment::with_prefix("KEEPER"))
            .build()?
            .try_deserialize()
    }
}

/// The assembled per-job context.
pub struct JobCore {
    /// Signs and broadcasts through the pool
    pub transactor: Transactor<EndpointPool<Http>, LocalWallet>,
    /// The shared endpoint pool, for health checks and raw reads
    pub pool: EndpointPool<Http>,
    /// The alert sink every component reports through
    pub alerts: Arc<dyn AlertSink>,
    /// Shared HTTP client for the notifier, gas API and subgraph
    pub http: reqwest::Client,
}
