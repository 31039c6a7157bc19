use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ethers::providers::JsonRpcClient;
use ethers::types::{Block, H256};
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use keeper_core::AlertSink;

use crate::rpc_clients::EndpointPool;

/// Hard deadline for a single endpoint health probe.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// A node whose latest block is older than this is considered out of sync.
pub const NODE_STALE_THRESHOLD: Duration = Duration::from_secs(300);

/// The health classification of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointStatus {
    /// Answered in time with a recent block
    Healthy,
    /// Answered, but its latest block timestamp lags the wall clock
    Stale {
        /// Seconds between the latest block timestamp and now
        behind_secs: u64,
    },
    /// Timed out or errored
    Unreachable {
        /// The timeout or RPC error observed
        reason: String,
    },
}

/// The outcome of probing one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointReport {
    /// The endpoint that was probed
    pub url: Url,
    /// Its classification
    pub status: EndpointStatus,
}

impl EndpointReport {
    /// True when the endpoint answered in time with a fresh block.
    pub fn is_healthy(&self) -> bool {
        self.status == EndpointStatus::Healthy
    }
}

/// Probes every endpoint of a pool individually, bypassing quorum, so that a
/// single lagging node is visible even while the pool as a whole still
/// answers. Purely observational: it never touches broadcast state.
#[derive(Debug, Clone)]
pub struct HealthMonitor<C> {
    pool: EndpointPool<C>,
    check_timeout: Duration,
    stale_threshold: Duration,
}

impl<C: JsonRpcClient> HealthMonitor<C> {
    /// A monitor over `pool` with the default timeout and stale threshold.
    pub fn new(pool: EndpointPool<C>) -> Self {
        Self {
            pool,
            check_timeout: HEALTH_CHECK_TIMEOUT,
            stale_threshold: NODE_STALE_THRESHOLD,
        }
    }

    /// Override the per-endpoint probe deadline.
    pub fn with_check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    /// Override the block age beyond which a node counts as stale.
    pub fn with_stale_threshold(mut self, stale_threshold: Duration) -> Self {
        self.stale_threshold = stale_threshold;
        self
    }

    /// Probe every endpoint concurrently and classify each one. Every
    /// unhealthy endpoint raises exactly one alert; healthy endpoints are
    /// silent apart from a debug log line.
    pub async fn check_all(&self, alerts: &dyn AlertSink) -> Vec<EndpointReport> {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let probes = self.pool.endpoints().iter().map(|endpoint| async move {
            let request = endpoint
                .client()
                .request::<_, Block<H256>>("eth_getBlockByNumber", ("latest", false));
            let status = match timeout(self.check_timeout, request).await {
                Ok(Ok(block)) => {
                    let behind_secs = now_secs.saturating_sub(block.timestamp.as_u64());
                    if Duration::from_secs(behind_secs) > self.stale_threshold {
                        EndpointStatus::Stale { behind_secs }
                    } else {
                        EndpointStatus::Healthy
                    }
                }
                Ok(Err(err)) => {
                    let err: ethers::providers::ProviderError = err.into();
                    EndpointStatus::Unreachable {
                        reason: err.to_string(),
                    }
                }
                Err(_) => EndpointStatus::Unreachable {
                    reason: format!("no response within {:?}", self.check_timeout),
                },
            };
            EndpointReport {
                url: endpoint.url().clone(),
                status,
            }
        });

        let reports = join_all(probes).await;
        for report in &reports {
            match &report.status {
                EndpointStatus::Healthy => {
                    debug!(url = %report.url, "endpoint healthy");
                }
                EndpointStatus::Stale { behind_secs } => {
                    warn!(url = %report.url, behind_secs, "endpoint is stale");
                    alerts
                        .send_error(&format!(
                            "RPC endpoint {} is stale: latest block is {behind_secs}s behind",
                            report.url
                        ))
                        .await;
                }
                EndpointStatus::Unreachable { reason } => {
                    warn!(url = %report.url, reason, "endpoint is unreachable");
                    alerts
                        .send_error(&format!(
                            "RPC endpoint {} is unreachable: {reason}",
                            report.url
                        ))
                        .await;
                }
            }
        }
        reports
    }
}
