use std::{sync::Arc, time::Duration};

use alloy::{primitives::Address, rpc::types::Filter, sol_types::SolEvent};
use anyhow::{Result, anyhow};
use futures::StreamExt;
use tokio::{sync::mpsc::UnboundedSender, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    chain::SourceChain, contracts::BridgeRequest, event::ObservedDeposit, metrics::RelayMetrics,
};

pub enum ShouldAbort {
    Continue,
    Abort(String),
}

/// Follows `BridgeRequest` logs from the source bridge and forwards each decoded deposit to the
/// dispatcher.
pub struct SourceWatcher<S> {
    source: Arc<S>,
    bridge: Address,
    sender: UnboundedSender<ObservedDeposit>,
    metrics: RelayMetrics,
}

impl<S: SourceChain> SourceWatcher<S> {
    pub fn new(
        source: Arc<S>,
        bridge: Address,
        sender: UnboundedSender<ObservedDeposit>,
        metrics: RelayMetrics,
    ) -> Self {
        SourceWatcher {
            source,
            bridge,
            sender,
            metrics,
        }
    }

    pub fn filter(&self) -> Filter {
        Filter::new()
            .address(self.bridge)
            .event_signature(BridgeRequest::SIGNATURE_HASH)
    }

    // Gets restarted on error or when the subscription ends, after about a second. To stop for
    // good, return ShouldAbort::Abort.
    pub async fn inner(&mut self) -> Result<ShouldAbort> {
        let mut logs = self.source.subscribe_logs(&self.filter()).await?;
        info!(bridge = %self.bridge, "subscribed to BridgeRequest logs");

        while let Some(log) = logs.next().await {
            if log.removed {
                debug!(tx_hash = ?log.transaction_hash, "ignoring removed log");
                continue;
            }
            let deposit = match ObservedDeposit::try_from_log(&log) {
                Ok(deposit) => deposit,
                Err(e) => {
                    warn!(
                        tx_hash = ?log.transaction_hash,
                        "dropping undecodable log: {e}"
                    );
                    continue;
                }
            };
            self.metrics.observed();
            info!(
                nonce = %deposit.record.nonce,
                block = deposit.block_number,
                tx_hash = %deposit.tx_hash,
                "observed deposit"
            );
            if self.sender.send(deposit).is_err() {
                return Ok(ShouldAbort::Abort("dispatcher has shut down".to_owned()));
            }
        }

        Ok(ShouldAbort::Continue)
    }

    pub async fn start(&mut self) -> Result<()> {
        loop {
            match self.inner().await {
                Err(e) => {
                    warn!("Resubscribing to source chain on error - {e:#}");
                    sleep(Duration::from_millis(1000)).await;
                }
                Ok(ShouldAbort::Continue) => {
                    debug!("Resubscribing to source chain after the subscription ended");
                    sleep(Duration::from_millis(1000)).await;
                }
                Ok(ShouldAbort::Abort(reason)) => {
                    warn!("Source watcher stopped - {reason}");
                    return Err(anyhow!("{reason}"));
                }
            }
        }
    }
}
