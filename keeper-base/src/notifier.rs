use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};
use url::Url;

use keeper_core::AlertSink;

/// Posts alerts to Slack incoming webhooks.
///
/// Two logical channels: operational errors and informational/governance
/// events, each with its own webhook URL. Delivery is fire-and-forget; a
/// failed post is logged and swallowed so alerting can never break the job
/// that is trying to report a problem. A channel without a URL only logs.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    network: String,
    bot_name: String,
    error_webhook: Option<Url>,
    multisig_webhook: Option<Url>,
}

impl Notifier {
    /// A notifier posting through `client`, tagging every message with the
    /// network and bot name.
    pub fn new(
        client: reqwest::Client,
        network: String,
        bot_name: String,
        error_webhook: Option<Url>,
        multisig_webhook: Option<Url>,
    ) -> Self {
        Self {
            client,
            network,
            bot_name,
            error_webhook,
            multisig_webhook,
        }
    }

    fn format_error(&self, message: &str) -> String {
        format!(
            "Keeper bot error\n  Network: {}\n  Bot name: {}\n  Details: {}\n",
            self.network, self.bot_name, message
        )
    }

    fn format_multisig(&self, message: &str) -> String {
        format!(
            "Multisig notification\n  Network: {}\n  Details: {}\n",
            self.network, message
        )
    }

    async fn post(&self, webhook: &Option<Url>, text: &str) {
        let Some(url) = webhook else { return };
        let outcome = self
            .client
            .post(url.clone())
            .json(&json!({ "text": text }))
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        if let Err(err) = outcome {
            warn!(%err, "could not deliver slack notification");
        }
    }
}

#[async_trait]
impl AlertSink for Notifier {
    async fn send_error(&self, message: &str) {
        let formatted = self.format_error(message);
        error!("{message}");
        self.post(&self.error_webhook, &formatted).await;
    }

    async fn send_info(&self, message: &str) {
        let formatted = self.format_multisig(message);
        info!("{message}");
        self.post(&self.multisig_webhook, &formatted).await;
    }
}
