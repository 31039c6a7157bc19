use ethers::providers::{JsonRpcClient, Middleware, Provider, ProviderError};
use ethers::types::{Address, BlockNumber};
use tracing::{debug, info};

use keeper_core::AlertSink;

/// Confirmed and pending transaction counts for one address, read with the
/// pool's quorum semantics. Every consumer of the confirmed/pending gap goes
/// through this single read path so that jobs and the broadcaster never
/// disagree about whether an override is warranted.
pub(crate) async fn nonce_counts<P: JsonRpcClient>(
    provider: &Provider<P>,
    address: Address,
) -> Result<(u64, u64), ProviderError> {
    let confirmed = provider
        .get_transaction_count(address, Some(BlockNumber::Latest.into()))
        .await?
        .as_u64();
    let pending = provider
        .get_transaction_count(address, Some(BlockNumber::Pending.into()))
        .await?
        .as_u64();
    Ok((confirmed, pending))
}

/// Whether `address` has transactions sitting in the mempool beyond its
/// confirmed count. Jobs use this to re-attempt work even inside a cooldown
/// window: a stuck transaction still needs to be re-priced.
pub async fn is_pending<P: JsonRpcClient>(
    provider: &Provider<P>,
    address: Address,
) -> Result<bool, ProviderError> {
    let (confirmed, pending) = nonce_counts(provider, address).await?;
    Ok(pending > confirmed)
}

/// The nonce resolved for one outgoing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedNonce {
    /// The nonce to sign with
    pub nonce: u64,
    /// True when an existing mempool entry occupies this slot and the offered
    /// gas price must be escalated to displace it
    pub needs_bump: bool,
}

/// Determines the nonce for the next outgoing transaction of one signer.
///
/// Scoped to a single job run: the first call derives everything from the
/// chain's confirmed/pending counts, subsequent calls in the same run extend a
/// strictly increasing, gap-free sequence without re-querying between them.
/// Nothing is persisted across runs; cross-run continuity is re-derived from
/// the confirmed/pending gap on the next invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonceSequencer {
    last_assigned: Option<u64>,
}

impl NonceSequencer {
    /// A sequencer with no local history, as at process start.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last nonce handed out in this run, if any.
    pub fn last_assigned(&self) -> Option<u64> {
        self.last_assigned
    }

    /// Resolve the nonce for the next transaction of `address`.
    ///
    /// With `force_override` the confirmed count is reused even when the
    /// mempool already holds a transaction at that slot, intentionally
    /// replacing it; the result is then flagged for a gas price bump.
    /// Without it the pending count is used, appending after whatever is
    /// in flight.
    pub async fn resolve<P: JsonRpcClient>(
        &mut self,
        provider: &Provider<P>,
        address: Address,
        force_override: bool,
        alerts: &dyn AlertSink,
    ) -> Result<ResolvedNonce, ProviderError> {
        let (confirmed, mut pending) = nonce_counts(provider, address).await?;
        if pending < confirmed {
            // A node reporting fewer pending than confirmed transactions is
            // misbehaving or mid-reorg; the confirmed count is ground truth.
            alerts
                .send_error(&format!(
                    "inconsistent node state for {address:?}: pending nonce {pending} below confirmed nonce {confirmed}"
                ))
                .await;
            pending = confirmed;
        }

        let resolved = match self.last_assigned {
            None if force_override => ResolvedNonce {
                nonce: confirmed,
                needs_bump: pending > confirmed,
            },
            None => {
                if pending > confirmed {
                    alerts
                        .send_info(&format!(
                            "potential pending transaction from a previous run for {address:?} (confirmed {confirmed}, pending {pending}), NOT overriding"
                        ))
                        .await;
                }
                ResolvedNonce {
                    nonce: pending,
                    needs_bump: false,
                }
            }
            Some(last) => {
                let nonce = last + 1;
                ResolvedNonce {
                    nonce,
                    needs_bump: nonce < pending,
                }
            }
        };

        if resolved.needs_bump {
            info!(
                nonce = resolved.nonce,
                pending, "displacing an existing mempool entry, gas price will be bumped"
            );
        } else {
            debug!(nonce = resolved.nonce, confirmed, pending, "nonce resolved");
        }
        self.last_assigned = Some(resolved.nonce);
        Ok(resolved)
    }
}
