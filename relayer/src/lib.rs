//! Relays `BridgeRequest` deposits observed on a source chain to `executeMint` calls on a
//! destination chain, at most once per deposit.

pub mod cfg;
pub mod chain;
pub mod client;
pub mod contracts;
pub mod event;
pub mod finality;
pub mod message_id;
pub mod metrics;
pub mod oracle;
pub mod relay;
pub mod source;
pub mod store;
pub mod submit;

#[cfg(test)]
pub(crate) mod test_util;
