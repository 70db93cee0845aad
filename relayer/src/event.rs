use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::Log,
};
use serde::{Deserialize, Serialize};

use crate::{contracts::BridgeRequest, message_id::MessageId};

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("log is not a BridgeRequest: {0}")]
    Abi(#[from] alloy::sol_types::Error),
    #[error("log is missing its {0}")]
    MissingField(&'static str),
}

/// A deposit as emitted by the source bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub from: Address,
    pub to: Address,
    pub token: Address,
    pub amount: U256,
    pub src_chain_id: U256,
    pub dst_chain_id: U256,
    pub nonce: U256,
    pub timestamp: U256,
}

impl From<BridgeRequest> for DepositRecord {
    fn from(event: BridgeRequest) -> Self {
        DepositRecord {
            from: event.from,
            to: event.to,
            token: event.token,
            amount: event.amount,
            src_chain_id: event.srcChainId,
            dst_chain_id: event.dstChainId,
            nonce: event.nonce,
            timestamp: event.timestamp,
        }
    }
}

impl DepositRecord {
    pub fn message_id(&self, source_bridge: Address) -> MessageId {
        MessageId::compute(self.src_chain_id, source_bridge, self.token, self.nonce)
    }
}

/// A [DepositRecord] together with where it was seen on the source chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedDeposit {
    pub record: DepositRecord,
    pub block_number: u64,
    /// Not every node reports the block hash for subscribed logs. If it is missing we can't check
    /// that the block is still canonical once it is confirmed.
    pub block_hash: Option<B256>,
    pub tx_hash: B256,
    pub log_index: Option<u64>,
}

impl ObservedDeposit {
    pub fn try_from_log(log: &Log) -> Result<Self, DecodeError> {
        let decoded = log.log_decode::<BridgeRequest>()?;
        let block_number = log
            .block_number
            .ok_or(DecodeError::MissingField("block number"))?;
        let tx_hash = log
            .transaction_hash
            .ok_or(DecodeError::MissingField("transaction hash"))?;

        Ok(ObservedDeposit {
            record: decoded.inner.data.into(),
            block_number,
            block_hash: log.block_hash,
            tx_hash,
            log_index: log.log_index,
        })
    }
}
