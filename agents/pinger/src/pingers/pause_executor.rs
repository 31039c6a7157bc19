use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use ethers::signers::Signer;
use ethers::types::{Address, Bytes, H256};
use eyre::{eyre, Result};
use tracing::info;

use keeper_base::{Job, PendingProposal, SubgraphClient};
use keeper_core::SendError;
use keeper_ethereum::Transactor;

use crate::contracts::DsPause;

/// Reverts raised by ds-pause itself when a proposal is not executable yet or
/// its delegatecall fails; both are conditions to wait out, not bot errors.
const EXPECTED_REVERTS: &[&str] = &[
    "ds-pause-premature-exec",
    "ds-protest-pause-delegatecall-error",
];

/// A proposal's on-chain fields, decoded from the subgraph's string encoding.
struct ParsedProposal {
    full_hash: H256,
    target: Address,
    code_hash: H256,
    parameters: Bytes,
    earliest: u64,
}

impl ParsedProposal {
    fn parse(proposal: &PendingProposal) -> Result<Self> {
        let full_hash = proposal.full_transaction_hash.parse().map_err(|e| {
            eyre!(
                "invalid fullTransactionHash {}: {e}",
                proposal.full_transaction_hash
            )
        })?;
        let target = proposal
            .proposal_target
            .parse()
            .map_err(|e| eyre!("invalid proposalTarget {}: {e}", proposal.proposal_target))?;
        let code_hash = proposal
            .code_hash
            .parse()
            .map_err(|e| eyre!("invalid codeHash {}: {e}", proposal.code_hash))?;
        let parameters = Bytes::from(
            hex::decode(proposal.transaction_data.trim_start_matches("0x"))
                .map_err(|e| eyre!("invalid transactionData {}: {e}", proposal.transaction_data))?,
        );
        let earliest = proposal.earliest_execution_time()?;
        Ok(Self {
            full_hash,
            target,
            code_hash,
            parameters,
            earliest,
        })
    }
}

/// Executes governance proposals whose pause delay has elapsed.
///
/// Proposals come from the subgraph and are cross-checked against the pause
/// contract: one indexed but not scheduled on chain means governance signed
/// something the multisig never submitted, which is worth flagging.
pub struct PauseExecutorPinger<P, S> {
    transactor: Transactor<P, S>,
    ds_pause: DsPause,
    subgraph: SubgraphClient,
}

impl<P, S> PauseExecutorPinger<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer,
{
    pub fn new(transactor: Transactor<P, S>, ds_pause: DsPause, subgraph: SubgraphClient) -> Self {
        Self {
            transactor,
            ds_pause,
            subgraph,
        }
    }

    async fn process(&mut self, now: u64, proposal: &PendingProposal) -> Result<()> {
        // A malformed proposal must not block the valid ones behind it in the
        // run's loop: alert and move on.
        let parsed = match ParsedProposal::parse(proposal) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.transactor
                    .alerts()
                    .send_error(&format!(
                        "skipping malformed proposal from the subgraph: {err}"
                    ))
                    .await;
                return Ok(());
            }
        };

        let scheduled_call = self.ds_pause.scheduled_transactions(parsed.full_hash);
        let scheduled = self.transactor.read_uint(&scheduled_call).await?;
        if scheduled.is_zero() {
            self.transactor
                .alerts()
                .send_info(&format!(
                    "proposal found in the subgraph but not scheduled on chain. \
                     full hash: {:?} target: {} description: {}",
                    parsed.full_hash, proposal.proposal_target, proposal.transaction_description
                ))
                .await;
            return Ok(());
        }

        if now < parsed.earliest {
            info!(
                full_hash = ?parsed.full_hash,
                earliest = parsed.earliest,
                "proposal scheduled but its delay has not elapsed"
            );
            return Ok(());
        }

        let execute = self.ds_pause.execute_transaction(
            parsed.target,
            parsed.code_hash,
            parsed.parameters,
            parsed.earliest,
        );
        match self
            .transactor
            .send_expecting(execute, false, EXPECTED_REVERTS)
            .await
        {
            Ok(Some(hash)) => {
                info!(
                    ?hash,
                    description = %proposal.transaction_description,
                    "proposal execution submitted"
                );
                Ok(())
            }
            Ok(None) | Err(SendError::SimulationReverted(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl<P, S> Job for PauseExecutorPinger<P, S>
where
    P: JsonRpcClient + 'static,
    S: Signer + 'static,
{
    fn name(&self) -> &'static str {
        "pause-executor"
    }

    async fn run(&mut self) -> Result<()> {
        let proposals = self.subgraph.pending_proposals().await?;
        info!(count = proposals.len(), "pending proposals fetched");
        if proposals.is_empty() {
            return Ok(());
        }
        let now = self.transactor.latest_block_timestamp().await?;
        for proposal in proposals {
            self.process(now, &proposal).await?;
        }
        Ok(())
    }
}
