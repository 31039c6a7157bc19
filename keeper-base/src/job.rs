use async_trait::async_trait;
use eyre::Result;
use tracing::{error, info};

use keeper_core::AlertSink;

/// A keeper job: one scheduled invocation of one maintenance duty.
///
/// Jobs are short-lived; the hosting binary builds the job from settings,
/// runs it once and exits. Anything that should survive between invocations
/// lives on chain or in the status store, never in the process.
#[async_trait]
pub trait Job: Send {
    /// Name used in logs and alert text.
    fn name(&self) -> &'static str;

    /// Execute one invocation.
    async fn run(&mut self) -> Result<()>;
}

/// Run a job to completion, reporting a failure through the alert sink before
/// propagating it. Jobs that handle their own expected failures (reverts on
/// the expected list) return `Ok` and never reach the sink here.
pub async fn run_job(job: &mut dyn Job, alerts: &dyn AlertSink) -> Result<()> {
    info!(job = job.name(), "job starting");
    match job.run().await {
        Ok(()) => {
            info!(job = job.name(), "job finished");
            Ok(())
        }
        Err(err) => {
            error!(job = job.name(), error = %err, "job failed");
            alerts
                .send_error(&format!("job {} failed: {err}", job.name()))
                .await;
            Err(err)
        }
    }
}
