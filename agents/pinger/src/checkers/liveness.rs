use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::Address;
use eyre::Result;
use serde_json::{json, Map, Value};
use tracing::debug;

use keeper_base::settings::LivenessCheck;
use keeper_base::{Job, StatusStore, SubgraphClient, STATUS_KEY};
use keeper_core::AlertSink;
use keeper_ethereum::{read_uint, EndpointPool, HealthMonitor};

use crate::contracts::view_call;

/// Graph-node freshness threshold. The indexer refreshes the system state
/// every hour; two missed refreshes mean it fell behind the chain.
const GRAPH_STALE_THRESHOLD_SECS: u64 = 7_200;

const DEFAULT_TIMESTAMP_METHOD: &str = "lastUpdateTime";

/// Checks that every watched contract has been poked recently, that the graph
/// node is in sync and that every RPC endpoint is healthy, then publishes the
/// combined status document for the network.
pub struct LivenessChecker<C: JsonRpcClient> {
    provider: Provider<EndpointPool<C>>,
    health: HealthMonitor<C>,
    checks: Vec<LivenessCheck>,
    subgraph: Option<SubgraphClient>,
    store: Arc<dyn StatusStore>,
    network: String,
    alerts: Arc<dyn AlertSink>,
}

impl<C> LivenessChecker<C>
where
    C: JsonRpcClient + 'static,
{
    pub fn new(
        pool: EndpointPool<C>,
        stale_threshold: Duration,
        checks: Vec<LivenessCheck>,
        subgraph: Option<SubgraphClient>,
        store: Arc<dyn StatusStore>,
        network: String,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            provider: Provider::new(pool.clone()),
            health: HealthMonitor::new(pool).with_stale_threshold(stale_threshold),
            checks,
            subgraph,
            store,
            network,
            alerts,
        }
    }

    async fn check_contract(&self, check: &LivenessCheck, now: u64) -> Option<(u64, bool)> {
        let address: Address = match check.address.parse() {
            Ok(address) => address,
            Err(err) => {
                self.alerts
                    .send_error(&format!(
                        "invalid address for liveness check {} ({}): {err}",
                        check.name, check.address
                    ))
                    .await;
                return None;
            }
        };
        let method = check.method.as_deref().unwrap_or(DEFAULT_TIMESTAMP_METHOD);
        let call = view_call(address, method);
        let last_updated = match read_uint(&self.provider, &call, None).await {
            Ok(value) => value.as_u64(),
            Err(err) => {
                self.alerts
                    .send_error(&format!(
                        "could not fetch the last update time of {}: {err}",
                        check.name
                    ))
                    .await;
                return None;
            }
        };
        let behind = now.saturating_sub(last_updated);
        let fresh = behind <= check.max_delay_minutes * 60;
        if !fresh {
            self.alerts
                .send_error(&format!(
                    "{} at {} has not been updated for {} minutes",
                    check.name,
                    check.address,
                    behind / 60
                ))
                .await;
        }
        Some((last_updated, fresh))
    }
}

#[async_trait]
impl<C> Job for LivenessChecker<C>
where
    C: JsonRpcClient + 'static,
{
    fn name(&self) -> &'static str {
        "liveness-checker"
    }

    async fn run(&mut self) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let last_block = self.provider.get_block_number().await?.as_u64();

        let mut status = Map::new();
        let mut last_updated = Map::new();
        for check in &self.checks {
            status.insert(check.name.clone(), json!(false));
            if let Some((updated_at, fresh)) = self.check_contract(check, now).await {
                last_updated.insert(check.name.clone(), json!(updated_at));
                status.insert(check.name.clone(), json!(fresh));
            }
        }

        if let Some(subgraph) = &self.subgraph {
            match subgraph.last_periodic_refresh().await {
                Ok(refreshed_at) => {
                    last_updated.insert("graph_node".to_owned(), json!(refreshed_at));
                    let fresh = now.saturating_sub(refreshed_at) <= GRAPH_STALE_THRESHOLD_SECS;
                    status.insert("graph_node".to_owned(), json!(fresh));
                    if !fresh {
                        self.alerts
                            .send_error(&format!(
                                "graph node may be out of sync, last periodic refresh at {refreshed_at}"
                            ))
                            .await;
                    }
                }
                Err(err) => {
                    status.insert("graph_node".to_owned(), json!(false));
                    self.alerts
                        .send_error(&format!("could not query the graph node: {err}"))
                        .await;
                }
            }
        }

        // One entry per endpoint; the monitor alerts for the unhealthy ones.
        for report in self.health.check_all(self.alerts.as_ref()).await {
            let key = format!("rpc_{}", report.url.host_str().unwrap_or("unknown"));
            status.insert(key, json!(report.is_healthy()));
        }

        let entry = json!({
            "timestamp": now,
            "lastBlock": last_block,
            "status": status,
            "lastUpdated": last_updated,
        });
        debug!(network = %self.network, %entry, "publishing status");
        let mut document = Map::new();
        document.insert(self.network.clone(), entry);
        self.store
            .merged_put_json(STATUS_KEY, &Value::Object(document))
            .await
    }
}

#[cfg(test)]
mod test {
    use ethers::types::{Block, H256, U256, U64};
    use keeper_base::LocalStorage;
    use keeper_ethereum::Endpoint;
    use url::Url;

    use super::*;
    use crate::test_utils::{uint_word, ProviderMock, RecordingAlerts};

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn fresh_block() -> Block<H256> {
        Block {
            timestamp: U256::from(now_secs()),
            ..Default::default()
        }
    }

    fn check(name: &str, max_delay_minutes: u64) -> LivenessCheck {
        LivenessCheck {
            name: name.to_owned(),
            address: format!("{:?}", Address::repeat_byte(0x21)),
            max_delay_minutes,
            method: None,
        }
    }

    fn checker(
        mock: &ProviderMock,
        checks: Vec<LivenessCheck>,
        store: Arc<dyn StatusStore>,
        alerts: &RecordingAlerts,
    ) -> LivenessChecker<ProviderMock> {
        let url: Url = "http://node0.example.com".parse().unwrap();
        let pool = EndpointPool::builder()
            .add_endpoint(Endpoint::new(mock.clone(), url))
            .build();
        LivenessChecker::new(
            pool,
            Duration::from_secs(300),
            checks,
            None,
            store,
            "mainnet".to_owned(),
            Arc::new(alerts.clone()),
        )
    }

    #[tokio::test]
    async fn publishes_the_merged_status_document() {
        let mock = ProviderMock::new();
        mock.push("eth_blockNumber", U64::from(12_345u64));
        // fresh contract: updated one minute ago
        mock.push("eth_call", uint_word(now_secs() - 60));
        // health probe
        mock.push("eth_getBlockByNumber", fresh_block());
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path()));
        let alerts = RecordingAlerts::new();

        checker(&mock, vec![check("osm", 90)], store.clone(), &alerts)
            .run()
            .await
            .unwrap();

        let doc = store.get_json(STATUS_KEY).await.unwrap().unwrap();
        assert_eq!(doc["mainnet"]["lastBlock"], json!(12_345));
        assert_eq!(doc["mainnet"]["status"]["osm"], json!(true));
        assert_eq!(
            doc["mainnet"]["status"]["rpc_node0.example.com"],
            json!(true)
        );
        assert!(doc["mainnet"]["lastUpdated"]["osm"].is_u64());
        assert!(alerts.errors().is_empty());
    }

    #[tokio::test]
    async fn late_contract_alerts_and_is_marked_false() {
        let mock = ProviderMock::new();
        mock.push("eth_blockNumber", U64::from(12_345u64));
        // updated two hours ago, 90 minute budget
        mock.push("eth_call", uint_word(now_secs() - 7_200));
        mock.push("eth_getBlockByNumber", fresh_block());
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path()));
        let alerts = RecordingAlerts::new();

        checker(&mock, vec![check("osm", 90)], store.clone(), &alerts)
            .run()
            .await
            .unwrap();

        let doc = store.get_json(STATUS_KEY).await.unwrap().unwrap();
        assert_eq!(doc["mainnet"]["status"]["osm"], json!(false));
        let errors = alerts.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("osm"));
        assert!(errors[0].contains("not been updated"));
    }

    #[tokio::test]
    async fn unreadable_contract_alerts_but_the_run_continues() {
        let mock = ProviderMock::new();
        mock.push("eth_blockNumber", U64::from(12_345u64));
        // nothing queued for eth_call: the read fails
        mock.push("eth_getBlockByNumber", fresh_block());
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path()));
        let alerts = RecordingAlerts::new();

        checker(&mock, vec![check("osm", 90)], store.clone(), &alerts)
            .run()
            .await
            .unwrap();

        let doc = store.get_json(STATUS_KEY).await.unwrap().unwrap();
        // Still published, with the unreadable contract reported down.
        assert_eq!(doc["mainnet"]["status"]["osm"], json!(false));
        assert_eq!(alerts.errors().len(), 1);
    }

    #[tokio::test]
    async fn successive_runs_merge_instead_of_clobbering() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStorage::new(dir.path()));
        store
            .put_json(STATUS_KEY, &json!({ "gnosis": { "status": { "osm": true } } }))
            .await
            .unwrap();
        let mock = ProviderMock::new();
        mock.push("eth_blockNumber", U64::from(1u64));
        mock.push("eth_getBlockByNumber", fresh_block());
        let alerts = RecordingAlerts::new();

        checker(&mock, vec![], store.clone(), &alerts)
            .run()
            .await
            .unwrap();

        let doc = store.get_json(STATUS_KEY).await.unwrap().unwrap();
        assert_eq!(doc["gnosis"]["status"]["osm"], json!(true));
        assert_eq!(doc["mainnet"]["lastBlock"], json!(1));
    }
}
