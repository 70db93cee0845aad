use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tracing::warn;

use crate::{chain::DestinationChain, message_id::MessageId};

/// The destination bridge's view of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedStatus {
    Processed,
    NotProcessed,
    /// The query failed. Treated the same as [ProcessedStatus::NotProcessed].
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustedSource {
    Trusted,
    /// The destination bridge trusts `expected` for this chain, or nothing at all if `expected` is
    /// zero.
    Mismatch { expected: Address },
    /// The query failed.
    Unavailable,
}

/// Read-only queries against the destination bridge. Failures are logged and reported as
/// non-answers rather than errors, because the local store and the bridge's own checks still
/// protect against duplicate mints.
#[derive(Clone)]
pub struct DestinationOracle<D> {
    destination: Arc<D>,
}

impl<D: DestinationChain> DestinationOracle<D> {
    pub fn new(destination: Arc<D>) -> Self {
        DestinationOracle { destination }
    }

    pub async fn processed_status(&self, id: MessageId) -> ProcessedStatus {
        match self.destination.processed(id).await {
            Ok(true) => ProcessedStatus::Processed,
            Ok(false) => ProcessedStatus::NotProcessed,
            Err(e) => {
                warn!(message_id = %id, "failed to query processed status: {e:#}");
                ProcessedStatus::Unknown
            }
        }
    }

    pub async fn check_trusted_source(
        &self,
        src_chain_id: U256,
        source_bridge: Address,
    ) -> TrustedSource {
        match self.destination.source_bridge_for_chain(src_chain_id).await {
            Ok(expected) if expected == source_bridge && !expected.is_zero() => {
                TrustedSource::Trusted
            }
            Ok(expected) => TrustedSource::Mismatch { expected },
            Err(e) => {
                warn!(
                    %src_chain_id,
                    "failed to query trusted source bridge: {e:#}"
                );
                TrustedSource::Unavailable
            }
        }
    }
}
