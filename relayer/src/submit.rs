use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use alloy::primitives::B256;
use anyhow::Result;
use tokio::time;
use tracing::{error, info, warn};

use crate::{
    chain::{DestinationChain, MintCall},
    message_id::MessageId,
    metrics::RelayMetrics,
    store::{AbandonedMessage, ProcessedStore},
};

/// Progress of one message through the submission loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAttempt {
    pub message_id: MessageId,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Relayed { tx_hash: B256, attempts: u32 },
    Abandoned { attempts: u32, last_error: String },
}

/// Sends `executeMint` with bounded exponential backoff.
pub struct SubmissionEngine<D> {
    destination: Arc<D>,
    store: ProcessedStore,
    metrics: RelayMetrics,
    max_retries: u32,
    retry_base: Duration,
}

impl<D: DestinationChain> SubmissionEngine<D> {
    pub fn new(
        destination: Arc<D>,
        store: ProcessedStore,
        metrics: RelayMetrics,
        max_retries: u32,
        retry_base: Duration,
    ) -> Self {
        SubmissionEngine {
            destination,
            store,
            metrics,
            max_retries: max_retries.max(1),
            retry_base,
        }
    }

    /// How long to wait after failed attempt number `attempt`, counting from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.retry_base.saturating_mul(1 << exponent)
    }

    /// Submits `call` until it succeeds or `max_retries` attempts have failed. The caller must hold
    /// the claim on `message_id`; it is consumed either way, by marking the message processed on
    /// success or releasing it otherwise.
    ///
    /// Only errors from the local store are returned. Destination failures are retried and then
    /// reported as [SubmissionOutcome::Abandoned].
    pub async fn submit(
        &self,
        message_id: MessageId,
        call: &MintCall,
    ) -> Result<SubmissionOutcome> {
        let mut attempt = RelayAttempt {
            message_id,
            attempt_count: 0,
            last_error: None,
        };

        while attempt.attempt_count < self.max_retries {
            attempt.attempt_count += 1;
            self.metrics.attempt();
            info!(
                %message_id,
                nonce = %call.nonce,
                attempt = attempt.attempt_count,
                "sending executeMint"
            );

            match self.destination.execute_mint(call).await {
                Ok(tx_hash) => {
                    self.store.mark_processed(message_id).await?;
                    info!(
                        %message_id,
                        %tx_hash,
                        attempts = attempt.attempt_count,
                        "relayed"
                    );
                    return Ok(SubmissionOutcome::Relayed {
                        tx_hash,
                        attempts: attempt.attempt_count,
                    });
                }
                Err(e) => {
                    warn!(
                        %message_id,
                        attempt = attempt.attempt_count,
                        "executeMint failed: {e:#}"
                    );
                    attempt.last_error = Some(format!("{e:#}"));
                }
            }

            if attempt.attempt_count < self.max_retries {
                time::sleep(self.backoff(attempt.attempt_count)).await;
            }
        }

        self.abandon(attempt, call).await
    }

    async fn abandon(&self, attempt: RelayAttempt, call: &MintCall) -> Result<SubmissionOutcome> {
        let RelayAttempt {
            message_id,
            attempt_count,
            last_error,
        } = attempt;
        let last_error = last_error.unwrap_or_default();
        error!(
            %message_id,
            attempts = attempt_count,
            "giving up on message: {last_error}"
        );

        self.store.release(message_id).await?;
        let abandoned_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let recorded = self
            .store
            .record_abandoned(AbandonedMessage {
                message_id,
                call: call.clone(),
                attempts: attempt_count,
                last_error: last_error.clone(),
                abandoned_at,
            })
            .await;
        if let Err(e) = recorded {
            error!(%message_id, "failed to write dead-letter entry: {e:#}");
        }

        Ok(SubmissionOutcome::Abandoned {
            attempts: attempt_count,
            last_error,
        })
    }
}
