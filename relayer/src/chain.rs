//! The two ledgers, as seen by the relayer.
//!
//! Everything that talks to a node goes through these traits so that the pipeline can be driven
//! by in-memory chains in tests. [crate::client] provides the JSON-RPC implementations.

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::{Filter, Log},
};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{event::DepositRecord, message_id::MessageId};

#[async_trait]
pub trait SourceChain: Send + Sync + 'static {
    /// Streams new logs matching `filter`. The stream ends if the node drops the subscription or
    /// filter.
    async fn subscribe_logs(&self, filter: &Filter) -> Result<BoxStream<'static, Log>>;

    async fn head_block_number(&self) -> Result<u64>;

    /// Hash of the canonical block at `number`, or `None` if there is no such block.
    async fn block_hash(&self, number: u64) -> Result<Option<B256>>;
}

#[async_trait]
pub trait DestinationChain: Send + Sync + 'static {
    /// Whether the destination bridge has already executed the mint for `id`.
    async fn processed(&self, id: MessageId) -> Result<bool>;

    /// The source bridge which the destination bridge trusts for `chain_id`.
    async fn source_bridge_for_chain(&self, chain_id: U256) -> Result<Address>;

    /// Sends `executeMint` and waits for its receipt. Returns the transaction hash if the
    /// transaction succeeded.
    async fn execute_mint(&self, call: &MintCall) -> Result<B256>;
}

/// Arguments to `executeMint`, in call order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MintCall {
    pub src_chain_id: U256,
    pub src_bridge: Address,
    pub nonce: U256,
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

impl MintCall {
    pub fn for_deposit(record: &DepositRecord, source_bridge: Address) -> Self {
        MintCall {
            src_chain_id: record.src_chain_id,
            src_bridge: source_bridge,
            nonce: record.nonce,
            token: record.token,
            from: record.from,
            to: record.to,
            amount: record.amount,
        }
    }
}
