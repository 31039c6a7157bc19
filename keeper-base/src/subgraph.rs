use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

/// Errors querying the subgraph.
#[derive(Debug, thiserror::Error)]
pub enum SubgraphError {
    /// Every configured graph node errored for this query
    #[error("graph query failed against every configured node: {attempts:?}")]
    AllNodesFailed {
        /// One failure description per node tried
        attempts: Vec<String>,
    },
    /// A node answered with a payload the query does not produce
    #[error("graph node returned an unexpected shape: {0}")]
    UnexpectedShape(String),
}

/// A governance proposal scheduled in ds-pause, as indexed by the subgraph.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingProposal {
    /// Address that scheduled the proposal
    pub proposal_sender: String,
    /// Target contract of the delegatecall
    pub proposal_target: String,
    /// Hash of the target's code at scheduling time
    pub code_hash: String,
    /// ABI-encoded payload
    pub transaction_data: String,
    /// Hash identifying the scheduled transaction on chain
    pub full_transaction_hash: String,
    /// Unix timestamp after which the proposal may execute, decimal string
    pub earliest_execution_time: String,
    /// Human-readable description, may be empty
    #[serde(default)]
    pub transaction_description: String,
}

impl PendingProposal {
    /// The earliest execution time as a unix timestamp.
    pub fn earliest_execution_time(&self) -> Result<u64, SubgraphError> {
        self.earliest_execution_time.parse().map_err(|_| {
            SubgraphError::UnexpectedShape(format!(
                "non-numeric earliestExecutionTime: {}",
                self.earliest_execution_time
            ))
        })
    }
}

/// Read access to the protocol subgraph over a primary/fallback node list.
#[derive(Debug, Clone)]
pub struct SubgraphClient {
    client: reqwest::Client,
    urls: Vec<Url>,
}

impl SubgraphClient {
    /// A client over `urls`, primary first.
    pub fn new(client: reqwest::Client, urls: Vec<Url>) -> Self {
        Self { client, urls }
    }

    /// The configured node URLs.
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    /// POST a GraphQL query, returning the `data` object from the first node
    /// that answers. Nodes are tried in order; per-node failures are logged
    /// and only surface if every node fails.
    pub async fn query(&self, query: &str) -> Result<Value, SubgraphError> {
        let mut attempts = Vec::new();
        for url in &self.urls {
            match self.query_one(url, query).await {
                Ok(data) => return Ok(data),
                Err(err) => {
                    warn!(%url, error = %err, "graph node query failed, trying the next one");
                    attempts.push(format!("{url}: {err}"));
                }
            }
        }
        Err(SubgraphError::AllNodesFailed { attempts })
    }

    async fn query_one(&self, url: &Url, query: &str) -> Result<Value, String> {
        let resp: Value = self
            .client
            .post(url.clone())
            .json(&json!({ "query": query }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;
        resp.get("data")
            .cloned()
            .ok_or_else(|| "response carries no data field".to_owned())
    }

    /// Timestamp of the indexer's last periodic system-state refresh, used to
    /// judge graph-node freshness.
    pub async fn last_periodic_refresh(&self) -> Result<u64, SubgraphError> {
        let data = self
            .query(r#"{ systemState(id: "current") { lastPeriodicUpdate } }"#)
            .await?;
        parse_last_periodic_refresh(&data)
    }

    /// The proposals scheduled in ds-pause and not yet executed.
    pub async fn pending_proposals(&self) -> Result<Vec<PendingProposal>, SubgraphError> {
        let data = self
            .query(
                "{ dsPauseScheduledTransactions(where: {executed: false}) { \
                 proposalSender proposalTarget codeHash transactionData \
                 fullTransactionHash earliestExecutionTime transactionDescription } }",
            )
            .await?;
        parse_pending_proposals(&data)
    }

    /// Creation timestamps of auctions started at or after `since`,
    /// deduplicated. Auctions created in the same block share a timestamp and
    /// need a single debt-queue pop.
    pub async fn auction_timestamps(&self, since: u64) -> Result<Vec<u64>, SubgraphError> {
        let data = self
            .query(&format!(
                "{{ fixedDiscountAuctions(where: {{createdAt_gte: {since}}}) {{ createdAt }} }}"
            ))
            .await?;
        parse_auction_timestamps(&data)
    }
}

fn parse_last_periodic_refresh(data: &Value) -> Result<u64, SubgraphError> {
    data.pointer("/systemState/lastPeriodicUpdate")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SubgraphError::UnexpectedShape(format!("no systemState in {data}")))
}

fn parse_pending_proposals(data: &Value) -> Result<Vec<PendingProposal>, SubgraphError> {
    let list = data
        .get("dsPauseScheduledTransactions")
        .cloned()
        .ok_or_else(|| {
            SubgraphError::UnexpectedShape(format!("no dsPauseScheduledTransactions in {data}"))
        })?;
    serde_json::from_value(list).map_err(|e| SubgraphError::UnexpectedShape(e.to_string()))
}

fn parse_auction_timestamps(data: &Value) -> Result<Vec<u64>, SubgraphError> {
    let list = data
        .get("fixedDiscountAuctions")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SubgraphError::UnexpectedShape(format!("no fixedDiscountAuctions in {data}"))
        })?;
    let mut timestamps: Vec<u64> = list
        .iter()
        .filter_map(|a| a.get("createdAt"))
        .filter_map(Value::as_str)
        .filter_map(|s| s.parse().ok())
        .collect();
    timestamps.sort_unstable();
    timestamps.dedup();
    Ok(timestamps)
}
