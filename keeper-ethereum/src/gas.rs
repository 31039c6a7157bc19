use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::types::U256;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use keeper_core::{ConfidenceLevel, FeeEstimate, GasQuote, QuoteSource};

/// Units added on top of a node gas estimate before sending.
pub const GAS_ESTIMATE_BUFFER: u64 = 100_000;

/// Percentage added to the offered gas price when displacing a transaction
/// stuck in the mempool.
pub const PENDING_TX_GAS_BUMP_PERCENT: u64 = 30;

/// Errors from the gas price oracle and its strategies.
#[derive(Debug, thiserror::Error)]
pub enum GasOracleError {
    /// The external price source errored or returned an unusable payload
    #[error("gas price source unavailable: {0}")]
    Unavailable(String),
    /// The source answered but had no bucket for the requested confidence
    #[error("gas price source has no quote for {0:?} confidence")]
    UnknownConfidence(ConfidenceLevel),
    /// The node-side estimation failed
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The HTTP request to the external source failed
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The oracle was constructed without any strategy
    #[error("no gas price strategy configured")]
    NoStrategies,
}

/// One way of producing a fee quote.
#[async_trait]
pub trait GasPriceStrategy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Produce a quote for the requested confidence bucket.
    async fn quote(&self, confidence: ConfidenceLevel) -> Result<GasQuote, GasOracleError>;
}

/// An ordered chain of pricing strategies, tried in sequence until one
/// produces a quote. The broadcaster configures this as external source first,
/// node estimation second, so losing the external source degrades to node
/// pricing instead of failing the send.
pub struct GasPriceOracle {
    strategies: Vec<Box<dyn GasPriceStrategy>>,
}

impl GasPriceOracle {
    /// An oracle over the given strategy chain, most preferred first.
    pub fn new(strategies: Vec<Box<dyn GasPriceStrategy>>) -> Self {
        Self { strategies }
    }

    /// Ask each strategy in order, returning the first quote produced. Fails
    /// with the last strategy's error once the chain is exhausted.
    pub async fn quote(&self, confidence: ConfidenceLevel) -> Result<GasQuote, GasOracleError> {
        let mut last_error = None;
        for strategy in &self.strategies {
            match strategy.quote(confidence).await {
                Ok(quote) => {
                    debug!(strategy = strategy.name(), ?quote, "gas price resolved");
                    return Ok(quote);
                }
                Err(err) => {
                    warn!(strategy = strategy.name(), error = %err, "gas price strategy failed, falling back");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or(GasOracleError::NoStrategies))
    }
}

#[derive(Debug, Deserialize)]
struct PriceApiResponse {
    data: PriceApiLevels,
}

/// Price buckets served by a gasnow-style price API, in wei.
#[derive(Debug, Deserialize)]
struct PriceApiLevels {
    slow: Option<u64>,
    standard: Option<u64>,
    fast: Option<u64>,
    rapid: Option<u64>,
}

/// An external HTTP gas price API serving confidence-bucketed legacy prices.
#[derive(Debug, Clone)]
pub struct ExternalPriceApi {
    client: reqwest::Client,
    url: Url,
}

impl ExternalPriceApi {
    /// A strategy fetching quotes from `url`.
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl GasPriceStrategy for ExternalPriceApi {
    fn name(&self) -> &'static str {
        "external-price-api"
    }

    async fn quote(&self, confidence: ConfidenceLevel) -> Result<GasQuote, GasOracleError> {
        let resp: PriceApiResponse = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()
            .map_err(|e| GasOracleError::Unavailable(e.to_string()))?
            .json()
            .await?;
        let bucket = match confidence {
            ConfidenceLevel::Slow => resp.data.slow,
            ConfidenceLevel::Standard => resp.data.standard,
            ConfidenceLevel::Fast => resp.data.fast,
            ConfidenceLevel::Rapid => resp.data.rapid,
        };
        let gas_price = bucket.ok_or(GasOracleError::UnknownConfidence(confidence))?;
        Ok(GasQuote {
            fee: FeeEstimate::Legacy {
                gas_price: U256::from(gas_price),
            },
            source: QuoteSource::Oracle { confidence },
        })
    }
}

/// The node's own price estimation, used as the deterministic fallback when
/// the external source is down or unconfigured.
#[derive(Debug, Clone)]
pub struct NodeFeeEstimate<P> {
    provider: Provider<P>,
    fee_market: bool,
}

impl<P: JsonRpcClient> NodeFeeEstimate<P> {
    /// A strategy asking the node. With `fee_market` set it estimates an
    /// EIP-1559 fee pair, otherwise a legacy gas price.
    pub fn new(provider: Provider<P>, fee_market: bool) -> Self {
        Self {
            provider,
            fee_market,
        }
    }
}

#[async_trait]
impl<P: JsonRpcClient + 'static> GasPriceStrategy for NodeFeeEstimate<P> {
    fn name(&self) -> &'static str {
        "node-fee-estimate"
    }

    async fn quote(&self, _confidence: ConfidenceLevel) -> Result<GasQuote, GasOracleError> {
        let fee = if self.fee_market {
            let (max_fee_per_gas, max_priority_fee_per_gas) =
                self.provider.estimate_eip1559_fees(None).await?;
            FeeEstimate::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }
        } else {
            FeeEstimate::Legacy {
                gas_price: self.provider.get_gas_price().await?,
            }
        };
        Ok(GasQuote {
            fee,
            source: QuoteSource::NodeDefault,
        })
    }
}
