use std::time::Duration;

use alloy::primitives::B256;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::{chain::SourceChain, event::ObservedDeposit};

/// What became of a deposit while we waited for its block to be buried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finality {
    Confirmed,
    /// The block the deposit was observed in is no longer canonical. `canonical` is `None` if the
    /// chain has no block at that height any more.
    Reorged {
        observed: B256,
        canonical: Option<B256>,
    },
    TimedOut,
}

/// Holds deposits until their block has enough confirmations.
#[derive(Debug, Clone)]
pub struct FinalityGate {
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl FinalityGate {
    pub fn new(confirmations: u64, poll_interval: Duration, timeout: Option<Duration>) -> Self {
        FinalityGate {
            confirmations,
            poll_interval,
            timeout,
        }
    }

    pub async fn wait<S: SourceChain + ?Sized>(
        &self,
        source: &S,
        deposit: &ObservedDeposit,
    ) -> Finality {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let block = deposit.block_number;

        loop {
            match source.head_block_number().await {
                Ok(head) if self.is_buried(block, head) => {
                    debug!(block, head, "deposit has enough confirmations");
                    break;
                }
                Ok(head) => {
                    debug!(
                        block,
                        head,
                        confirmations = self.confirmations,
                        "waiting for confirmations"
                    );
                }
                Err(e) => {
                    warn!(block, "failed to read source chain head: {e:#}");
                }
            }

            if deadline.is_some_and(|d| Instant::now() + self.poll_interval > d) {
                return Finality::TimedOut;
            }
            time::sleep(self.poll_interval).await;
        }

        let Some(observed) = deposit.block_hash else {
            return Finality::Confirmed;
        };
        loop {
            match source.block_hash(block).await {
                Ok(canonical) => {
                    if canonical == Some(observed) {
                        return Finality::Confirmed;
                    }
                    return Finality::Reorged {
                        observed,
                        canonical,
                    };
                }
                Err(e) => {
                    warn!(block, "failed to read canonical block hash: {e:#}");
                }
            }
            if deadline.is_some_and(|d| Instant::now() + self.poll_interval > d) {
                return Finality::TimedOut;
            }
            time::sleep(self.poll_interval).await;
        }
    }

    fn is_buried(&self, block: u64, head: u64) -> bool {
        // A head behind the deposit's block means our node is lagging the one which reported the
        // log.
        head.checked_sub(block)
            .is_some_and(|depth| depth >= self.confirmations)
    }
}
