//! Hand-rolled JSON-RPC and alert-sink mocks shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, JsonRpcError, ProviderError, RpcError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::time::sleep;

use keeper_core::AlertSink;

#[derive(Debug)]
enum MockResponse {
    Value(Value),
    Error(JsonRpcError),
}

/// A scriptable JSON-RPC client. Responses are queued per method and served
/// in FIFO order; a method with an empty queue fails the request.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProviderMock {
    responses: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    delay: Option<Duration>,
}

impl ProviderMock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Delay every response, to simulate a slow or stalled endpoint.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
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

    /// Queue a JSON-RPC error response, e.g. a revert with an encoded payload.
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

    /// Every request made so far for `method`, in order.
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
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
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

/// An alert sink that records every message for assertions.
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
