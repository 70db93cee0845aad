//! The per-deposit relay pipeline and the dispatcher which runs one pipeline per observed
//! deposit.

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use anyhow::Result;
use futures::StreamExt;
use tokio::{
    select,
    sync::mpsc::UnboundedReceiver,
    task::{JoinError, JoinSet},
    time::Instant,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    cfg::Config,
    chain::{DestinationChain, MintCall, SourceChain},
    event::ObservedDeposit,
    finality::{Finality, FinalityGate},
    metrics::RelayMetrics,
    oracle::{DestinationOracle, ProcessedStatus, TrustedSource},
    store::{Claim, ProcessedStore},
    submit::{SubmissionEngine, SubmissionOutcome},
};

/// How a single deposit left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The deposit is bound for a chain other than ours.
    WrongDestination { dst_chain_id: U256 },
    /// The deposit's block was reorganised away, or never got enough confirmations before the
    /// timeout.
    NotFinal(Finality),
    AlreadyProcessedOnChain,
    /// The destination bridge does not accept messages from our source bridge.
    UntrustedSource { expected: Address },
    AlreadyProcessedLocally,
    /// Another task is already relaying the same message.
    InFlight,
    Relayed { tx_hash: B256, attempts: u32 },
    Abandoned { attempts: u32, last_error: String },
}

impl RelayOutcome {
    fn skip_reason(&self) -> Option<&'static str> {
        match self {
            RelayOutcome::WrongDestination { .. } => Some("wrong_destination"),
            RelayOutcome::NotFinal(Finality::Reorged { .. }) => Some("reorged"),
            RelayOutcome::NotFinal(_) => Some("not_final"),
            RelayOutcome::AlreadyProcessedOnChain => Some("processed_on_chain"),
            RelayOutcome::UntrustedSource { .. } => Some("untrusted_source"),
            RelayOutcome::AlreadyProcessedLocally => Some("processed_locally"),
            RelayOutcome::InFlight => Some("in_flight"),
            RelayOutcome::Relayed { .. } | RelayOutcome::Abandoned { .. } => None,
        }
    }
}

pub struct Relayer<S, D> {
    source: Arc<S>,
    oracle: DestinationOracle<D>,
    store: ProcessedStore,
    gate: FinalityGate,
    engine: SubmissionEngine<D>,
    metrics: RelayMetrics,
    source_bridge: Address,
    dest_chain_id: U256,
}

impl<S: SourceChain, D: DestinationChain> Relayer<S, D> {
    pub fn new(
        config: &Config,
        source: Arc<S>,
        destination: Arc<D>,
        store: ProcessedStore,
        metrics: RelayMetrics,
    ) -> Self {
        Relayer {
            source,
            oracle: DestinationOracle::new(destination.clone()),
            gate: FinalityGate::new(
                config.confirmations,
                config.confirmation_poll_interval(),
                config.confirmation_timeout(),
            ),
            engine: SubmissionEngine::new(
                destination,
                store.clone(),
                metrics.clone(),
                config.max_retries,
                config.retry_base(),
            ),
            store,
            metrics,
            source_bridge: config.source_bridge,
            dest_chain_id: U256::from(config.dest_chain_id),
        }
    }

    /// Takes one deposit from observation to, at most, one `executeMint`. Errors are only returned
    /// if the local store fails.
    pub async fn relay(&self, deposit: ObservedDeposit) -> Result<RelayOutcome> {
        let start = Instant::now();
        let outcome = self.relay_inner(&deposit).await?;

        match &outcome {
            RelayOutcome::Relayed { .. } => self.metrics.relayed(start.elapsed()),
            RelayOutcome::Abandoned { .. } => self.metrics.abandoned(start.elapsed()),
            skipped => {
                if let Some(reason) = skipped.skip_reason() {
                    self.metrics.skipped(reason);
                }
            }
        }
        Ok(outcome)
    }

    async fn relay_inner(&self, deposit: &ObservedDeposit) -> Result<RelayOutcome> {
        let record = &deposit.record;
        if record.dst_chain_id != self.dest_chain_id {
            debug!(
                dst_chain_id = %record.dst_chain_id,
                "deposit is for another chain"
            );
            return Ok(RelayOutcome::WrongDestination {
                dst_chain_id: record.dst_chain_id,
            });
        }

        match self.gate.wait(&*self.source, deposit).await {
            Finality::Confirmed => {}
            Finality::Reorged {
                observed,
                canonical,
            } => {
                warn!(
                    block = deposit.block_number,
                    %observed,
                    ?canonical,
                    "deposit's block is no longer canonical, dropping it"
                );
                return Ok(RelayOutcome::NotFinal(Finality::Reorged {
                    observed,
                    canonical,
                }));
            }
            Finality::TimedOut => {
                error!(
                    block = deposit.block_number,
                    "timed out waiting for confirmations, dropping deposit"
                );
                return Ok(RelayOutcome::NotFinal(Finality::TimedOut));
            }
        }

        let message_id = record.message_id(self.source_bridge);
        info!(%message_id, "deposit confirmed");

        if self.oracle.processed_status(message_id).await == ProcessedStatus::Processed {
            info!(%message_id, "already processed on the destination chain");
            self.store.mark_processed(message_id).await?;
            return Ok(RelayOutcome::AlreadyProcessedOnChain);
        }

        if let TrustedSource::Mismatch { expected } = self
            .oracle
            .check_trusted_source(record.src_chain_id, self.source_bridge)
            .await
        {
            error!(
                %message_id,
                %expected,
                configured = %self.source_bridge,
                "destination bridge does not trust our source bridge"
            );
            return Ok(RelayOutcome::UntrustedSource { expected });
        }

        match self.store.claim(message_id).await? {
            Claim::Claimed => {}
            Claim::AlreadyProcessed => {
                info!(%message_id, "already relayed");
                return Ok(RelayOutcome::AlreadyProcessedLocally);
            }
            Claim::InFlight => {
                info!(%message_id, "already being relayed by another task");
                return Ok(RelayOutcome::InFlight);
            }
        }

        let call = MintCall::for_deposit(record, self.source_bridge);
        Ok(match self.engine.submit(message_id, &call).await? {
            SubmissionOutcome::Relayed { tx_hash, attempts } => {
                RelayOutcome::Relayed { tx_hash, attempts }
            }
            SubmissionOutcome::Abandoned {
                attempts,
                last_error,
            } => RelayOutcome::Abandoned {
                attempts,
                last_error,
            },
        })
    }

    /// Relays every deposit received on `deposits`, each in its own task. Returns once the channel
    /// has closed and every task has finished.
    pub async fn dispatch(self: Arc<Self>, deposits: UnboundedReceiver<ObservedDeposit>) {
        let mut deposits = UnboundedReceiverStream::new(deposits);
        let mut tasks = JoinSet::new();

        loop {
            select! {
                deposit = deposits.next() => {
                    let Some(deposit) = deposit else {
                        break;
                    };
                    let span = info_span!(
                        "relay",
                        nonce = %deposit.record.nonce,
                        tx_hash = %deposit.tx_hash
                    );
                    let relayer = self.clone();
                    tasks.spawn(
                        async move {
                            if let Err(e) = relayer.relay(deposit).await {
                                error!("relay failed: {e:#}");
                            }
                        }
                        .instrument(span),
                    );
                }
                Some(result) = tasks.join_next() => reap(result),
            }
        }

        debug!(
            in_flight = tasks.len(),
            "deposit channel closed, waiting for relays to finish"
        );
        while let Some(result) = tasks.join_next().await {
            reap(result);
        }
    }
}

fn reap(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("relay task panicked: {e}");
        } else {
            warn!("relay task was cancelled: {e}");
        }
    }
}
