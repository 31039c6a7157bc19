use std::sync::Arc;

use ethers::abi::{self, ParamType, Token};
use ethers::providers::{JsonRpcClient, Middleware, Provider, ProviderError, RpcError};
use ethers::signers::Signer;
use ethers::types::{Address, BlockNumber, Bytes, TxHash, U256};
use tracing::{debug, info, instrument, warn};

use keeper_core::{
    decode_revert, revert_reason, AlertSink, CallError, ConfidenceLevel, PendingCall, SendError,
};

use crate::gas::{GasPriceOracle, GAS_ESTIMATE_BUFFER, PENDING_TX_GAS_BUMP_PERCENT};
use crate::nonce::{is_pending, NonceSequencer};

/// Execute `call` read-only against current state. A revert, whether surfaced
/// as a thrown error or as an encoded return payload, is decoded to its
/// require/revert string. Checkers use this directly; the transactor wraps it
/// with its signer address as the caller.
pub async fn eth_call<P: JsonRpcClient>(
    provider: &Provider<P>,
    call: &PendingCall,
    from: Option<Address>,
) -> Result<Bytes, CallError> {
    let tx = call.to_typed(from);
    match provider.call(&tx, None).await {
        Ok(returned) => match decode_revert(&returned) {
            Some(reason) => Err(CallError::Reverted(reason)),
            None => Ok(returned),
        },
        Err(err) => match revert_reason(&err) {
            Some(reason) => Err(CallError::Reverted(reason)),
            None => match err.as_error_response() {
                Some(resp) if resp.message.contains("revert") => {
                    Err(CallError::Reverted(resp.message.clone()))
                }
                _ => Err(CallError::Network(err)),
            },
        },
    }
}

/// Execute `call` read-only and decode a single `uint256` return value.
pub async fn read_uint<P: JsonRpcClient>(
    provider: &Provider<P>,
    call: &PendingCall,
    from: Option<Address>,
) -> Result<U256, CallError> {
    let returned = eth_call(provider, call, from).await?;
    let tokens = abi::decode(&[ParamType::Uint(256)], &returned).map_err(|e| {
        CallError::Network(ProviderError::CustomError(format!(
            "could not decode uint256 return value: {e}"
        )))
    })?;
    match tokens.into_iter().next() {
        Some(Token::Uint(value)) => Ok(value),
        _ => Err(CallError::Network(ProviderError::CustomError(
            "could not decode uint256 return value".into(),
        ))),
    }
}

/// Tunables applied to every send.
#[derive(Debug, Clone)]
pub struct BroadcastPolicy {
    /// Units added on top of every gas estimate
    pub gas_estimate_buffer: u64,
    /// Escalation applied when displacing a mempool entry at the same nonce
    pub pending_bump_percent: u64,
    /// Confidence bucket requested from the gas price oracle
    pub confidence: ConfidenceLevel,
}

impl Default for BroadcastPolicy {
    fn default() -> Self {
        Self {
            gas_estimate_buffer: GAS_ESTIMATE_BUFFER,
            pending_bump_percent: PENDING_TX_GAS_BUMP_PERCENT,
            confidence: ConfidenceLevel::default(),
        }
    }
}

/// Signs and broadcasts contract calls for one signer address.
///
/// Owns the per-run nonce state, so one transactor instance is scoped to one
/// job invocation. Each send runs the full protocol strictly in order: gas
/// limit, gas price, nonce, read-only simulation, then broadcast. The contract
/// ends at submission; confirmation polling is the caller's concern.
pub struct Transactor<P, S> {
    provider: Provider<P>,
    signer: S,
    gas_oracle: GasPriceOracle,
    sequencer: NonceSequencer,
    policy: BroadcastPolicy,
    alerts: Arc<dyn AlertSink>,
}

impl<P, S> Transactor<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer,
{
    /// A transactor signing with `signer` and talking through `provider`.
    pub fn new(
        provider: Provider<P>,
        signer: S,
        gas_oracle: GasPriceOracle,
        policy: BroadcastPolicy,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            provider,
            signer,
            gas_oracle,
            sequencer: NonceSequencer::new(),
            policy,
            alerts,
        }
    }

    /// The signing address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// The provider the transactor reads and broadcasts through.
    pub fn provider(&self) -> &Provider<P> {
        &self.provider
    }

    /// The alert sink shared with the owning job.
    pub fn alerts(&self) -> &Arc<dyn AlertSink> {
        &self.alerts
    }

    /// Whether this signer has unconfirmed transactions in the mempool. Jobs
    /// consult this to act even inside a cooldown window, since a stuck prior
    /// transaction still needs to be re-priced.
    pub async fn is_pending(&self) -> Result<bool, ProviderError> {
        is_pending(&self.provider, self.signer.address()).await
    }

    /// Timestamp of the latest block, for job-side interval checks.
    pub async fn latest_block_timestamp(&self) -> Result<u64, ProviderError> {
        let block = self
            .provider
            .get_block(BlockNumber::Latest)
            .await?
            .ok_or_else(|| ProviderError::CustomError("node returned no latest block".into()))?;
        Ok(block.timestamp.as_u64())
    }

    /// [`eth_call`] with the signer as the caller.
    pub async fn call(&self, call: &PendingCall) -> Result<Bytes, CallError> {
        eth_call(&self.provider, call, Some(self.signer.address())).await
    }

    /// [`read_uint`] with the signer as the caller.
    pub async fn read_uint(&self, call: &PendingCall) -> Result<U256, CallError> {
        read_uint(&self.provider, call, Some(self.signer.address())).await
    }

    /// Sign and broadcast `call`, returning the transaction hash.
    ///
    /// With `force_override` the nonce of the oldest unconfirmed transaction
    /// is reused, displacing it from the mempool with an escalated gas price.
    /// A [`SendError::SimulationReverted`] is returned without alerting so the
    /// caller can classify the reason against its expected-revert list (see
    /// [`Transactor::send_expecting`]); all other fatal errors alert here.
    #[instrument(skip(self, call), fields(to = ?call.to, signer = ?self.signer.address()))]
    pub async fn send(
        &mut self,
        mut call: PendingCall,
        force_override: bool,
    ) -> Result<TxHash, SendError> {
        let to = match call.to {
            Some(to) => to,
            None => {
                self.alerts
                    .send_error("refusing to send an incomplete transaction: no destination address")
                    .await;
                return Err(SendError::IncompleteTransaction);
            }
        };
        let from = self.signer.address();

        let gas_limit = match call.gas_limit {
            Some(limit) => limit,
            None => {
                let probe = call.to_typed(Some(from));
                match self.provider.estimate_gas(&probe, None).await {
                    Ok(estimate) => estimate + U256::from(self.policy.gas_estimate_buffer),
                    Err(err) => return Err(self.diagnose_estimate_failure(&call, err).await),
                }
            }
        };
        call.gas_limit = Some(gas_limit);

        let quote = match self.gas_oracle.quote(self.policy.confidence).await {
            Ok(quote) => quote,
            Err(err) => {
                self.alerts
                    .send_error(&format!(
                        "could not determine a gas price for the call to {to:?}: {err}"
                    ))
                    .await;
                return Err(SendError::UndeterminedGasPrice);
            }
        };

        let resolved = self
            .sequencer
            .resolve(&self.provider, from, force_override, self.alerts.as_ref())
            .await?;
        let fee = if resolved.needs_bump {
            quote.fee.bump(self.policy.pending_bump_percent)
        } else {
            quote.fee
        };
        call.fee = Some(fee);
        call.nonce = Some(resolved.nonce);

        // A successful simulation does not guarantee the broadcast succeeds,
        // but it skips the guaranteed-to-fail sends.
        if let Err(err) = self.call(&call).await {
            return Err(match err {
                CallError::Reverted(reason) => SendError::SimulationReverted(reason),
                CallError::Network(err) => SendError::Network(err),
            });
        }

        let mut tx = call.to_typed(Some(from));
        tx.set_chain_id(self.signer.chain_id());
        let signature = self
            .signer
            .sign_transaction(&tx)
            .await
            .map_err(|e| SendError::SendFailed(format!("signing failed: {e}")))?;
        let raw = tx.rlp_signed(&signature);

        debug!(nonce = resolved.nonce, ?fee, %gas_limit, "broadcasting transaction");
        match self.provider.send_raw_transaction(raw).await {
            Ok(pending) => {
                let hash = *pending;
                info!(?hash, nonce = resolved.nonce, "transaction submitted");
                Ok(hash)
            }
            Err(err) => {
                let reason = revert_reason(&err).unwrap_or_else(|| err.to_string());
                self.alerts
                    .send_error(&format!(
                        "broadcast of the call to {to:?} (nonce {}) failed: {reason}",
                        resolved.nonce
                    ))
                    .await;
                Err(SendError::SendFailed(reason))
            }
        }
    }

    /// [`Transactor::send`] with revert classification. A simulation revert
    /// whose reason starts with one of `expected_reverts` means the contract
    /// is not ready for this call yet; that is a normal outcome, logged at
    /// info level and returned as `Ok(None)`. Any other revert alerts with the
    /// decoded reason before propagating.
    pub async fn send_expecting(
        &mut self,
        call: PendingCall,
        force_override: bool,
        expected_reverts: &[&str],
    ) -> Result<Option<TxHash>, SendError> {
        let to = call.to;
        match self.send(call, force_override).await {
            Ok(hash) => Ok(Some(hash)),
            Err(SendError::SimulationReverted(reason)) => {
                if expected_reverts.iter().any(|p| reason.starts_with(p)) {
                    info!(?to, %reason, "call is not ready yet, nothing sent");
                    Ok(None)
                } else {
                    warn!(?to, %reason, "call reverted in simulation");
                    self.alerts
                        .send_error(&format!(
                            "unexpected revert simulating the call to {to:?}: {reason}"
                        ))
                        .await;
                    Err(SendError::SimulationReverted(reason))
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Work out why gas estimation failed. Estimation errors are revert-shaped
    /// on some nodes and opaque on others, so an opaque failure is followed by
    /// a read-only call to recover the reason. Genuine network failures
    /// propagate without alerting.
    async fn diagnose_estimate_failure(&self, call: &PendingCall, err: ProviderError) -> SendError {
        if let Some(reason) = revert_reason(&err) {
            return SendError::SimulationReverted(reason);
        }
        match self.call(call).await {
            Err(CallError::Reverted(reason)) => SendError::SimulationReverted(reason),
            _ => SendError::Network(err),
        }
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;
    use ethers::signers::LocalWallet;
    use ethers::types::transaction::eip2718::TypedTransaction;
    use ethers::types::H256;
    use ethers::utils::rlp::Rlp;
    use serde_json::Value;

    use keeper_core::{encode_revert, FeeEstimate, GasQuote, QuoteSource};

    use super::*;
    use crate::gas::{GasOracleError, GasPriceStrategy};
    use crate::test_utils::{ProviderMock, RecordingAlerts};

    const TX_COUNT: &str = "eth_getTransactionCount";
    const KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

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

    fn transactor(
        mock: &ProviderMock,
        alerts: &RecordingAlerts,
        gas_price: u64,
    ) -> Transactor<ProviderMock, LocalWallet> {
        let wallet: LocalWallet = KEY.parse().unwrap();
        Transactor::new(
            Provider::new(mock.clone()),
            wallet,
            GasPriceOracle::new(vec![Box::new(FixedPrice(gas_price))]),
            BroadcastPolicy::default(),
            Arc::new(alerts.clone()),
        )
    }

    fn target() -> Address {
        Address::repeat_byte(0x22)
    }

    fn decode_sent(mock: &ProviderMock) -> TypedTransaction {
        let sent = mock.requests_for("eth_sendRawTransaction");
        assert_eq!(sent.len(), 1);
        let raw: Bytes = match &sent[0] {
            Value::Array(params) => serde_json::from_value(params[0].clone()).unwrap(),
            other => panic!("unexpected params shape: {other:?}"),
        };
        let (tx, _signature) = TypedTransaction::decode_signed(&Rlp::new(&raw)).unwrap();
        tx
    }

    fn revert_data(reason: &str) -> Value {
        Value::String(format!("0x{}", hex::encode(encode_revert(reason))))
    }

    #[tokio::test]
    async fn send_estimates_prices_sequences_and_broadcasts() {
        let mock = ProviderMock::new();
        mock.push("eth_estimateGas", U256::from(21_000u64));
        mock.push(TX_COUNT, U256::from(5u64));
        mock.push(TX_COUNT, U256::from(5u64));
        mock.push("eth_call", Bytes::default());
        mock.push("eth_sendRawTransaction", H256::repeat_byte(0xab));
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        let call = PendingCall::new(target(), Bytes::from(vec![0xde, 0xad]));
        let hash = transactor.send(call, false).await.unwrap();
        assert_eq!(hash, H256::repeat_byte(0xab));

        let tx = decode_sent(&mock);
        assert_eq!(tx.nonce(), Some(&U256::from(5u64)));
        assert_eq!(tx.gas(), Some(&U256::from(121_000u64)));
        assert_eq!(tx.gas_price(), Some(U256::from(100u64)));
        assert!(alerts.errors().is_empty());
    }

    #[tokio::test]
    async fn override_escalates_the_quoted_price() {
        // Scenario: confirmed 5, pending 6, override requested. The send must
        // reuse nonce 5 and outbid the displaced transaction by 30%.
        let mock = ProviderMock::new();
        mock.push("eth_estimateGas", U256::from(21_000u64));
        mock.push(TX_COUNT, U256::from(5u64));
        mock.push(TX_COUNT, U256::from(6u64));
        mock.push("eth_call", Bytes::default());
        mock.push("eth_sendRawTransaction", H256::repeat_byte(0xcd));
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        let call = PendingCall::new(target(), Bytes::default());
        transactor.send(call, true).await.unwrap();

        let tx = decode_sent(&mock);
        assert_eq!(tx.nonce(), Some(&U256::from(5u64)));
        assert_eq!(tx.gas_price(), Some(U256::from(130u64)));
    }

    #[tokio::test]
    async fn fixed_gas_limit_skips_estimation() {
        let mock = ProviderMock::new();
        mock.push(TX_COUNT, U256::from(0u64));
        mock.push(TX_COUNT, U256::from(0u64));
        mock.push("eth_call", Bytes::default());
        mock.push("eth_sendRawTransaction", H256::repeat_byte(0x01));
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        let call = PendingCall::new(target(), Bytes::default()).gas_limit(U256::from(400_000u64));
        transactor.send(call, false).await.unwrap();

        assert!(mock.requests_for("eth_estimateGas").is_empty());
        assert_eq!(decode_sent(&mock).gas(), Some(&U256::from(400_000u64)));
    }

    #[tokio::test]
    async fn missing_destination_is_fatal_and_alerts() {
        let mock = ProviderMock::new();
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        let err = transactor.send(PendingCall::default(), false).await.unwrap_err();
        assert!(matches!(err, SendError::IncompleteTransaction));
        assert_eq!(alerts.errors().len(), 1);
        // Nothing touched the network.
        assert!(mock.requests_for(TX_COUNT).is_empty());
    }

    #[tokio::test]
    async fn unquotable_gas_price_is_fatal_and_alerts() {
        let mock = ProviderMock::new();
        mock.push("eth_estimateGas", U256::from(21_000u64));
        let alerts = RecordingAlerts::new();
        let wallet: LocalWallet = KEY.parse().unwrap();
        let mut transactor = Transactor::new(
            Provider::new(mock.clone()),
            wallet,
            GasPriceOracle::new(vec![]),
            BroadcastPolicy::default(),
            Arc::new(alerts.clone()),
        );

        let call = PendingCall::new(target(), Bytes::default());
        let err = transactor.send(call, false).await.unwrap_err();
        assert!(matches!(err, SendError::UndeterminedGasPrice));
        assert_eq!(alerts.errors().len(), 1);
        // Failed before any nonce was consumed.
        assert!(mock.requests_for(TX_COUNT).is_empty());
    }

    #[tokio::test]
    async fn expected_revert_skips_quietly() {
        // Gas estimation rejects with an encoded revert whose reason is on
        // the job's expected list: nothing sent, nothing alerted.
        let mock = ProviderMock::new();
        mock.push_error(
            "eth_estimateGas",
            "execution reverted",
            Some(revert_data("OSM/not-passed")),
        );
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        let call = PendingCall::new(target(), Bytes::default());
        let outcome = transactor
            .send_expecting(call, false, &["OSM/", "OracleRelayer/"])
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert!(alerts.errors().is_empty());
        assert!(mock.requests_for("eth_sendRawTransaction").is_empty());
    }

    #[tokio::test]
    async fn unexpected_revert_alerts_with_the_reason() {
        let mock = ProviderMock::new();
        mock.push_error(
            "eth_estimateGas",
            "execution reverted",
            Some(revert_data("Unexpected/weird-error")),
        );
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        let call = PendingCall::new(target(), Bytes::default());
        let err = transactor
            .send_expecting(call, false, &["OSM/"])
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::SimulationReverted(ref r) if r == "Unexpected/weird-error"));
        let errors = alerts.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Unexpected/weird-error"));
        assert!(mock.requests_for("eth_sendRawTransaction").is_empty());
    }

    #[tokio::test]
    async fn opaque_estimate_failure_is_diagnosed_with_a_read_only_call() {
        // The node rejects estimation without a payload; the follow-up
        // eth_call surfaces the actual reason.
        let mock = ProviderMock::new();
        mock.push_error("eth_estimateGas", "gas required exceeds allowance", None);
        mock.push_error(
            "eth_call",
            "execution reverted",
            Some(revert_data("TaxCollector/invalid-collateral-type")),
        );
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        let call = PendingCall::new(target(), Bytes::default());
        let err = transactor.send(call, false).await.unwrap_err();
        assert!(
            matches!(err, SendError::SimulationReverted(ref r) if r == "TaxCollector/invalid-collateral-type")
        );
    }

    #[tokio::test]
    async fn network_failure_propagates_without_alerting() {
        // Nothing queued at all: estimation and the diagnostic call both fail
        // at the transport level.
        let mock = ProviderMock::new();
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        let call = PendingCall::new(target(), Bytes::default());
        let err = transactor.send(call, false).await.unwrap_err();
        assert!(matches!(err, SendError::Network(_)));
        assert!(alerts.errors().is_empty());
    }

    #[tokio::test]
    async fn simulation_revert_after_assembly_is_classified() {
        let mock = ProviderMock::new();
        mock.push("eth_estimateGas", U256::from(21_000u64));
        mock.push(TX_COUNT, U256::from(5u64));
        mock.push(TX_COUNT, U256::from(5u64));
        mock.push_error(
            "eth_call",
            "execution reverted",
            Some(revert_data("AccountingEngine/surplus-not-reached")),
        );
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        let call = PendingCall::new(target(), Bytes::default());
        let outcome = transactor
            .send_expecting(call, false, &["AccountingEngine/"])
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert!(alerts.errors().is_empty());
        assert!(mock.requests_for("eth_sendRawTransaction").is_empty());
    }

    #[tokio::test]
    async fn broadcast_rejection_alerts_and_reports_the_reason() {
        let mock = ProviderMock::new();
        mock.push("eth_estimateGas", U256::from(21_000u64));
        mock.push(TX_COUNT, U256::from(5u64));
        mock.push(TX_COUNT, U256::from(5u64));
        mock.push("eth_call", Bytes::default());
        mock.push_error("eth_sendRawTransaction", "replacement transaction underpriced", None);
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        let call = PendingCall::new(target(), Bytes::default());
        let err = transactor.send(call, false).await.unwrap_err();
        assert!(matches!(err, SendError::SendFailed(ref r) if r.contains("underpriced")));
        assert_eq!(alerts.errors().len(), 1);
    }

    #[tokio::test]
    async fn chained_sends_use_contiguous_nonces() {
        let mock = ProviderMock::new();
        for _ in 0..2 {
            mock.push("eth_estimateGas", U256::from(21_000u64));
            mock.push(TX_COUNT, U256::from(5u64));
            mock.push(TX_COUNT, U256::from(5u64));
            mock.push("eth_call", Bytes::default());
        }
        mock.push("eth_sendRawTransaction", H256::repeat_byte(0x01));
        mock.push("eth_sendRawTransaction", H256::repeat_byte(0x02));
        let alerts = RecordingAlerts::new();
        let mut transactor = transactor(&mock, &alerts, 100);

        transactor
            .send(PendingCall::new(target(), Bytes::default()), false)
            .await
            .unwrap();
        transactor
            .send(PendingCall::new(target(), Bytes::default()), false)
            .await
            .unwrap();

        let sent = mock.requests_for("eth_sendRawTransaction");
        let nonces: Vec<U256> = sent
            .iter()
            .map(|params| {
                let raw: Bytes = match params {
                    Value::Array(p) => serde_json::from_value(p[0].clone()).unwrap(),
                    other => panic!("unexpected params shape: {other:?}"),
                };
                let (tx, _) = TypedTransaction::decode_signed(&Rlp::new(&raw)).unwrap();
                *tx.nonce().unwrap()
            })
            .collect();
        assert_eq!(nonces, vec![U256::from(5u64), U256::from(6u64)]);
    }

    #[tokio::test]
    async fn read_uint_decodes_the_return_value() {
        let mock = ProviderMock::new();
        let mut word = [0u8; 32];
        word[31] = 42;
        mock.push("eth_call", Bytes::from(word.to_vec()));
        let alerts = RecordingAlerts::new();
        let transactor = transactor(&mock, &alerts, 100);

        let call = PendingCall::new(target(), Bytes::default());
        let value = transactor.read_uint(&call).await.unwrap();
        assert_eq!(value, U256::from(42u64));
    }
}
