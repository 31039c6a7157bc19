use async_trait::async_trait;

/// Fire-and-forget notification boundary.
///
/// Implementations must never propagate delivery failures into caller logic;
/// a sink that cannot deliver logs the problem and moves on. Two logical
/// channels exist: operational errors that should page an operator, and
/// informational/governance events.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver an operational error notification
    async fn send_error(&self, message: &str);

    /// Deliver an informational notification
    async fn send_info(&self, message: &str);
}

/// An alert sink that only writes to the log. Used where no delivery channel
/// is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send_error(&self, message: &str) {
        tracing::error!(message, "keeper alert");
    }

    async fn send_info(&self, message: &str) {
        tracing::info!(message, "keeper notification");
    }
}
