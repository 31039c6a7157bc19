use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, JsonRpcClient, JsonRpcError, ProviderError, RpcError};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

/// If an endpoint did not reply within this window, the pool moves on to the
/// other endpoints for that call.
pub const RPC_STALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Methods that consume a nonce or otherwise mutate node state. These resolve
/// on the first successful endpoint rather than waiting for quorum agreement:
/// a second matching answer would mean broadcasting twice.
const FIRST_WINS_METHODS: &[&str] = &["eth_sendRawTransaction", "eth_sendTransaction"];

/// A single RPC endpoint in the pool.
#[derive(Debug)]
pub struct Endpoint<C> {
    client: C,
    url: Url,
    priority: usize,
    stall_timeout: Duration,
}

impl<C> Endpoint<C> {
    /// Wrap a JSON-RPC client reachable at `url`.
    pub fn new(client: C, url: Url) -> Self {
        Self {
            client,
            url,
            priority: 0,
            stall_timeout: RPC_STALL_TIMEOUT,
        }
    }

    /// Override the default stall timeout for this endpoint.
    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    /// The endpoint's URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Position in the pool's preference order; lower is preferred.
    pub fn priority(&self) -> usize {
        self.priority
    }

    /// The inner JSON-RPC client. Used by the health monitor to address one
    /// endpoint in isolation, bypassing quorum.
    pub fn client(&self) -> &C {
        &self.client
    }
}

/// A single logical read/write view over several RPC endpoints.
///
/// Reads fan out over all endpoints concurrently, each bounded by its own
/// stall timeout, and resolve as soon as the quorum threshold of endpoints
/// agree on the response value. A stalled or erroring endpoint is skipped for
/// that call only; it stays in the pool. Implements [`JsonRpcClient`] so the
/// full typed provider surface sits on top of it.
pub struct EndpointPool<C> {
    endpoints: Arc<Vec<Endpoint<C>>>,
    quorum: usize,
}

impl<C> Clone for EndpointPool<C> {
    fn clone(&self) -> Self {
        Self {
            endpoints: self.endpoints.clone(),
            quorum: self.quorum,
        }
    }
}

impl<C> Debug for EndpointPool<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EndpointPool {{ quorum: {}, endpoints: [{}] }}",
            self.quorum,
            self.endpoints
                .iter()
                .map(|e| e.url.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// The quorum used when none is configured: a majority of the remaining
/// endpoints once one is assumed faulty, but never less than one.
pub fn default_quorum(endpoint_count: usize) -> usize {
    std::cmp::max(endpoint_count.saturating_sub(1) / 2, 1)
}

impl<C> EndpointPool<C> {
    /// Start building a pool.
    pub fn builder() -> EndpointPoolBuilder<C> {
        EndpointPoolBuilder::default()
    }

    /// The endpoints in preference order.
    pub fn endpoints(&self) -> &[Endpoint<C>] {
        &self.endpoints
    }

    /// The configured quorum threshold.
    pub fn quorum(&self) -> usize {
        self.quorum
    }
}

impl EndpointPool<Http> {
    /// Build an HTTP pool over `urls`, highest priority first, sharing one
    /// reqwest client.
    pub fn http(
        urls: impl IntoIterator<Item = Url>,
        client: reqwest::Client,
        stall_timeout: Duration,
        quorum: Option<usize>,
    ) -> Self {
        let mut builder = Self::builder();
        for url in urls {
            let http = Http::new_with_client(url.clone(), client.clone());
            builder = builder.add_endpoint(Endpoint::new(http, url).with_stall_timeout(stall_timeout));
        }
        if let Some(quorum) = quorum {
            builder = builder.quorum(quorum);
        }
        builder.build()
    }
}

/// Builder for [`EndpointPool`]. Endpoints are added highest priority first.
pub struct EndpointPoolBuilder<C> {
    endpoints: Vec<Endpoint<C>>,
    quorum: Option<usize>,
}

impl<C> Default for EndpointPoolBuilder<C> {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            quorum: None,
        }
    }
}

impl<C> EndpointPoolBuilder<C> {
    /// Add an endpoint at the next lower priority.
    pub fn add_endpoint(mut self, mut endpoint: Endpoint<C>) -> Self {
        endpoint.priority = self.endpoints.len();
        self.endpoints.push(endpoint);
        self
    }

    /// Require `quorum` agreeing endpoints per read instead of the derived
    /// default.
    pub fn quorum(mut self, quorum: usize) -> Self {
        self.quorum = Some(quorum);
        self
    }

    /// Finish the pool.
    pub fn build(self) -> EndpointPool<C> {
        let quorum = self
            .quorum
            .unwrap_or_else(|| default_quorum(self.endpoints.len()))
            .clamp(1, self.endpoints.len().max(1));
        EndpointPool {
            endpoints: Arc::new(self.endpoints),
            quorum,
        }
    }
}

/// Errors specific to the endpoint pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Fewer endpoints than the quorum threshold agreed on an answer. Carries
    /// every per-endpoint error observed during the attempt.
    #[error("endpoint quorum failure on {method}: {required} agreeing answers required, errors: {errors:?}")]
    EndpointQuorumFailure {
        /// The RPC method that failed
        method: String,
        /// The quorum threshold that was not met
        required: usize,
        /// One error per endpoint that failed or stalled
        errors: Vec<ProviderError>,
    },
}

impl RpcError for PoolError {
    fn as_error_response(&self) -> Option<&JsonRpcError> {
        let PoolError::EndpointQuorumFailure { errors, .. } = self;
        errors.iter().find_map(|e| e.as_error_response())
    }

    fn as_serde_error(&self) -> Option<&serde_json::Error> {
        None
    }
}

impl From<PoolError> for ProviderError {
    fn from(src: PoolError) -> Self {
        ProviderError::JsonRpcClientError(Box::new(src))
    }
}

#[async_trait]
impl<C> JsonRpcClient for EndpointPool<C>
where
    C: JsonRpcClient + 'static,
{
    type Error = ProviderError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let params = serde_json::to_value(params).map_err(ProviderError::SerdeJson)?;
        let quorum = if FIRST_WINS_METHODS.contains(&method) {
            1
        } else {
            self.quorum
        };

        let mut in_flight: FuturesUnordered<_> = self
            .endpoints
            .iter()
            .map(|endpoint| {
                let params = params.clone();
                async move {
                    let request = async {
                        match params {
                            Value::Null => endpoint.client.request::<_, Value>(method, ()).await,
                            ref p => endpoint.client.request::<_, Value>(method, p).await,
                        }
                    };
                    let outcome = match timeout(endpoint.stall_timeout, request).await {
                        Ok(res) => res.map_err(Into::into),
                        Err(_) => Err(ProviderError::CustomError(format!(
                            "endpoint {} stalled: no response within {:?}",
                            endpoint.url, endpoint.stall_timeout
                        ))),
                    };
                    (endpoint, outcome)
                }
            })
            .collect();

        let mut errors = Vec::new();
        let mut tally: Vec<(Value, usize)> = Vec::new();
        while let Some((endpoint, outcome)) = in_flight.next().await {
            match outcome {
                Ok(value) => {
                    debug!(method, url = %endpoint.url, "endpoint answered");
                    let agreeing = match tally.iter_mut().find(|(v, _)| *v == value) {
                        Some((_, count)) => {
                            *count += 1;
                            *count
                        }
                        None => {
                            tally.push((value.clone(), 1));
                            1
                        }
                    };
                    if agreeing >= quorum {
                        return serde_json::from_value(value).map_err(ProviderError::SerdeJson);
                    }
                }
                Err(err) => {
                    warn!(method, url = %endpoint.url, error = %err, "endpoint call failed, trying the others");
                    errors.push(err);
                }
            }
        }

        Err(PoolError::EndpointQuorumFailure {
            method: method.to_owned(),
            required: quorum,
            errors,
        }
        .into())
    }
}
