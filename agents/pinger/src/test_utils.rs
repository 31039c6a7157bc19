//! Scriptable JSON-RPC and alert-sink mocks for the job tests.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, Provider, ProviderError, RpcError};
use ethers::signers::LocalWallet;
use ethers::types::U256;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use keeper_core::{AlertSink, ConfidenceLevel, FeeEstimate, GasQuote, QuoteSource};
use keeper_ethereum::{
    BroadcastPolicy, GasOracleError, GasPriceOracle, GasPriceStrategy, Transactor,
};

const KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

#[derive(Debug)]
enum MockResponse {
    Value(Value),
    Error(JsonRpcError),
}

/// Per-method FIFO queues of scripted responses.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProviderMock {
    responses: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl ProviderMock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push<T: Serialize>(&self, method: &str, response: T) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_owned())
            .or_default()
            .push_back(MockResponse::Value(
                serde_json::to_value(response).unwrap(),
            ));
    }

    pub(crate) fn push_error(&self, method: &str, message: &str, data: Option<Value>) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_owned())
            .or_default()
            .push_back(MockResponse::Error(JsonRpcError {
                code: 3,
                message: message.to_owned(),
                data,
            }));
    }

    pub(crate) fn requests_for(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{}", .0.message)]
struct MockRpcError(JsonRpcError);

impl RpcError for MockRpcError {
    fn as_error_response(&self) -> Option<&JsonRpcError> {
        Some(&self.0)
    }

    fn as_serde_error(&self) -> Option<&serde_json::Error> {
        None
    }
}

#[async_trait]
impl JsonRpcClient for ProviderMock {
    type Error = ProviderError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        self.requests.lock().unwrap().push((
            method.to_owned(),
            serde_json::to_value(params).unwrap(),
        ));
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        match next {
            Some(MockResponse::Value(value)) => {
                serde_json::from_value(value).map_err(ProviderError::SerdeJson)
            }
            Some(MockResponse::Error(err)) => {
                Err(ProviderError::JsonRpcClientError(Box::new(MockRpcError(err))))
            }
            None => Err(ProviderError::CustomError(format!(
                "no mock response queued for {method}"
            ))),
        }
    }
}

/// Records every alert for assertions.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingAlerts {
    pub errors: Arc<Mutex<Vec<String>>>,
    pub infos: Arc<Mutex<Vec<String>>>,
}

impl RecordingAlerts {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub(crate) fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn send_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_owned());
    }

    async fn send_info(&self, message: &str) {
        self.infos.lock().unwrap().push(message.to_owned());
    }
}

struct FixedPrice(u64);

#[async_trait]
impl GasPriceStrategy for FixedPrice {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn quote(&self, confidence: ConfidenceLevel) -> Result<GasQuote, GasOracleError> {
        Ok(GasQuote {
            fee: FeeEstimate::Legacy {
                gas_price: U256::from(self.0),
            },
            source: QuoteSource::Oracle { confidence },
        })
    }
}

/// A transactor over the mock with a fixed oracle price and default policy.
pub(crate) fn mock_transactor(
    mock: &ProviderMock,
    alerts: &RecordingAlerts,
) -> Transactor<ProviderMock, LocalWallet> {
    let wallet: LocalWallet = KEY.parse().unwrap();
    Transactor::new(
        Provider::new(mock.clone()),
        wallet,
        GasPriceOracle::new(vec![Box::new(FixedPrice(100))]),
        BroadcastPolicy::default(),
        Arc::new(alerts.clone()),
    )
}

/// A 32-byte big-endian word holding `value`, as an `eth_call` return.
pub(crate) fn uint_word(value: u64) -> ethers::types::Bytes {
    let mut word = [0u8; 32];
    U256::from(value).to_big_endian(&mut word);
    ethers::types::Bytes::from(word.to_vec())
}
