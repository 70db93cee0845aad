use std::time::Duration;

use alloy::{
    eips::BlockNumberOrTag,
    network::EthereumWallet,
    primitives::{Address, B256, U256},
    providers::{Provider, ProviderBuilder},
    rpc::types::{Filter, Log},
};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use tracing::{debug, info, warn};

use crate::{
    cfg::Config,
    chain::{DestinationChain, MintCall, SourceChain},
    contracts::IDestinationBridge,
    message_id::MessageId,
};

/// How new logs are received from the source chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTransport {
    /// `eth_subscribe` over a websocket.
    Subscription,
    /// A log filter installed with `eth_newFilter` and polled over HTTP.
    Polling,
}

impl LogTransport {
    /// Picks the transport from the scheme of `url`.
    pub fn for_url(url: &str) -> Result<Self> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase());
        match scheme.as_deref() {
            Some("ws" | "wss") => Ok(LogTransport::Subscription),
            Some("http" | "https") => Ok(LogTransport::Polling),
            _ => bail!("unsupported source RPC scheme in {url}"),
        }
    }
}

/// Read-only client for the chain which emits deposits.
#[derive(Debug, Clone)]
pub struct SourceClient<P> {
    pub rpc_url: String,
    pub chain_id: u64,
    pub transport: LogTransport,
    /// How often an installed log filter is polled. Unused for subscriptions.
    poll_interval: Duration,
    provider: P,
}

/// Connects to the source chain and checks that it is the chain we were configured for.
pub async fn connect_source(
    config: &Config,
) -> Result<SourceClient<impl Provider + Clone + 'static>> {
    let transport = LogTransport::for_url(&config.source_rpc)?;
    // The websocket backend reconnects on its own.
    let provider = ProviderBuilder::new()
        .connect(&config.source_rpc)
        .await
        .with_context(|| {
            format!(
                "failed to connect to the source chain at {}",
                config.source_rpc
            )
        })?;

    let chain_id = provider.get_chain_id().await?;
    if chain_id != config.source_chain_id {
        bail!(
            "Chain id mismatch - source chain at {} wanted chain id {} but got {chain_id}",
            config.source_rpc,
            config.source_chain_id
        );
    }
    info!(
        rpc_url = %config.source_rpc,
        chain_id,
        ?transport,
        "connected to source chain"
    );

    Ok(SourceClient {
        rpc_url: config.source_rpc.clone(),
        chain_id,
        transport,
        poll_interval: config.confirmation_poll_interval(),
        provider,
    })
}

#[async_trait]
impl<P: Provider + Clone + 'static> SourceChain for SourceClient<P> {
    async fn subscribe_logs(&self, filter: &Filter) -> Result<BoxStream<'static, Log>> {
        match self.transport {
            LogTransport::Subscription => {
                let subscription = self.provider.subscribe_logs(filter).await?;
                Ok(subscription.into_stream().boxed())
            }
            LogTransport::Polling => {
                let poller = self.provider.watch_logs(filter).await?;
                Ok(poller
                    .with_poll_interval(self.poll_interval)
                    .into_stream()
                    .flat_map(futures::stream::iter)
                    .boxed())
            }
        }
    }

    async fn head_block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await?;
        Ok(block.map(|b| b.header.hash))
    }
}

/// Client for the chain on which deposits are minted. Holds the relayer's signing key.
#[derive(Debug, Clone)]
pub struct DestinationClient<P> {
    pub rpc_url: String,
    pub chain_id: u64,
    pub bridge_address: Address,
    pub signer_address: Address,
    provider: P,
}

/// Connects to the destination chain with a wallet built from the relayer's key.
pub async fn connect_destination(
    config: &Config,
) -> Result<DestinationClient<impl Provider + Clone + 'static>> {
    let signer = config.relayer_private_key.signer()?;
    let signer_address = signer.address();
    let wallet = EthereumWallet::from(signer);

    // Account nonces for concurrent submissions are assigned by the nonce filler.
    let provider = ProviderBuilder::new()
        .wallet(wallet)
        .connect(&config.dest_rpc)
        .await
        .with_context(|| {
            format!(
                "failed to connect to the destination chain at {}",
                config.dest_rpc
            )
        })?;

    let chain_id = provider.get_chain_id().await?;
    if chain_id != config.dest_chain_id {
        bail!(
            "Chain id mismatch - destination chain at {} wanted chain id {} but got {chain_id}",
            config.dest_rpc,
            config.dest_chain_id
        );
    }
    if let Some(expected) = config.relayer_address.filter(|a| *a != signer_address) {
        warn!(
            %expected,
            %signer_address,
            "configured relayer address does not match the signing key"
        );
    }
    info!(
        rpc_url = %config.dest_rpc,
        chain_id,
        %signer_address,
        "connected to destination chain"
    );

    Ok(DestinationClient {
        rpc_url: config.dest_rpc.clone(),
        chain_id,
        bridge_address: config.dest_bridge,
        signer_address,
        provider,
    })
}

/// A mined transaction only counts as a relay if it succeeded.
fn check_receipt_status(tx_hash: B256, succeeded: bool) -> Result<B256> {
    if !succeeded {
        bail!("executeMint transaction {tx_hash} reverted");
    }
    Ok(tx_hash)
}

#[async_trait]
impl<P: Provider + Clone + 'static> DestinationChain for DestinationClient<P> {
    async fn processed(&self, id: MessageId) -> Result<bool> {
        let bridge = IDestinationBridge::new(self.bridge_address, &self.provider);
        Ok(bridge.processed(id.into()).call().await?._0)
    }

    async fn source_bridge_for_chain(&self, chain_id: U256) -> Result<Address> {
        let bridge = IDestinationBridge::new(self.bridge_address, &self.provider);
        Ok(bridge.sourceBridgeForChain(chain_id).call().await?._0)
    }

    async fn execute_mint(&self, call: &MintCall) -> Result<B256> {
        let bridge = IDestinationBridge::new(self.bridge_address, &self.provider);
        let pending = bridge
            .executeMint(
                call.src_chain_id,
                call.src_bridge,
                call.nonce,
                call.token,
                call.from,
                call.to,
                call.amount,
            )
            .send()
            .await
            .context("failed to send executeMint")?;

        let tx_hash = *pending.tx_hash();
        debug!(%tx_hash, "executeMint sent, waiting for receipt");

        let receipt = pending
            .get_receipt()
            .await
            .with_context(|| format!("failed to get receipt for {tx_hash}"))?;
        check_receipt_status(tx_hash, receipt.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_transport_follows_url_scheme() {
        for (url, transport) in [
            ("ws://localhost:8546", LogTransport::Subscription),
            ("WSS://sepolia.example/v3/key", LogTransport::Subscription),
            ("http://localhost:8545", LogTransport::Polling),
            ("https://sepolia.example/v3/key", LogTransport::Polling),
        ] {
            assert_eq!(LogTransport::for_url(url).unwrap(), transport, "{url}");
        }

        assert!(LogTransport::for_url("localhost:8545").is_err());
        assert!(LogTransport::for_url("ipc:///tmp/geth.ipc").is_err());
    }

    #[test]
    fn reverted_mint_is_an_error() {
        let tx_hash = B256::repeat_byte(0x42);

        assert_eq!(check_receipt_status(tx_hash, true).unwrap(), tx_hash);

        let err = check_receipt_status(tx_hash, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("executeMint transaction {tx_hash} reverted")
        );
    }
}
