//! In-memory chains and fixtures for tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    path::Path,
    sync::Mutex,
    time::Duration,
};

use alloy::{
    primitives::{Address, B256, U256, address, keccak256},
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use tokio::{sync::mpsc, time::Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    cfg::Config,
    chain::{DestinationChain, MintCall, SourceChain},
    contracts::BridgeRequest,
    event::{DepositRecord, ObservedDeposit},
    message_id::MessageId,
};

pub const SOURCE_CHAIN_ID: u64 = 11155111;
pub const DEST_CHAIN_ID: u64 = 421614;
pub const SOURCE_BRIDGE: Address = address!("5b1c0e5e4f1a3b1c9d1a2b3c4d5e6f708192a3b4");
pub const DEST_BRIDGE: Address = address!("c0ffee254729296a45a3885639ac7e10f9d54979");

/// A config for the fake chains below, keeping its files in `dir`. Retries start at one second and
/// confirmations are polled every second.
pub fn config(dir: &Path) -> Config {
    let db_path = dir.join("relayer-db.json");
    let dead_letter_path = dir.join("abandoned.jsonl");
    let vars = HashMap::from([
        ("SOURCE_RPC", "ws://localhost:8546".to_owned()),
        ("DEST_RPC", "http://localhost:8545".to_owned()),
        ("SOURCE_BRIDGE", SOURCE_BRIDGE.to_string()),
        ("DEST_BRIDGE", DEST_BRIDGE.to_string()),
        (
            "RELAYER_PRIVATE_KEY",
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_owned(),
        ),
        ("DB_PATH", db_path.display().to_string()),
        ("DEAD_LETTER_PATH", dead_letter_path.display().to_string()),
    ]);
    Config::load(None, |var| vars.get(var).cloned()).unwrap()
}

pub fn deposit(nonce: u64, dst_chain_id: u64) -> DepositRecord {
    DepositRecord {
        from: Address::repeat_byte(0xaa),
        to: Address::repeat_byte(0xbb),
        token: Address::repeat_byte(0xcc),
        amount: U256::from(1_000_000u64),
        src_chain_id: U256::from(SOURCE_CHAIN_ID),
        dst_chain_id: U256::from(dst_chain_id),
        nonce: U256::from(nonce),
        timestamp: U256::from(1_700_000_000u64),
    }
}

/// The hash [FakeSource] reports for block `number` unless a test overrides it.
pub fn canonical_hash(number: u64) -> B256 {
    keccak256(number.to_be_bytes())
}

pub fn bridge_request_log(record: &DepositRecord, block_number: u64) -> Log {
    let event = BridgeRequest {
        from: record.from,
        to: record.to,
        token: record.token,
        amount: record.amount,
        srcChainId: record.src_chain_id,
        dstChainId: record.dst_chain_id,
        nonce: record.nonce,
        timestamp: record.timestamp,
    };
    Log {
        inner: alloy::primitives::Log {
            address: SOURCE_BRIDGE,
            data: event.encode_log_data(),
        },
        block_hash: Some(canonical_hash(block_number)),
        block_number: Some(block_number),
        block_timestamp: None,
        transaction_hash: Some(keccak256(record.nonce.to_be_bytes::<32>())),
        transaction_index: Some(0),
        log_index: Some(0),
        removed: false,
    }
}

pub fn observed(nonce: u64, block_number: u64) -> ObservedDeposit {
    let log = bridge_request_log(&deposit(nonce, DEST_CHAIN_ID), block_number);
    ObservedDeposit::try_from_log(&log).unwrap()
}

#[derive(Default)]
struct SourceState {
    head: u64,
    hashes: BTreeMap<u64, Option<B256>>,
    head_errors: u32,
    subscriptions: VecDeque<mpsc::UnboundedReceiver<Log>>,
    filters: Vec<Filter>,
}

#[derive(Default)]
pub struct FakeSource {
    state: Mutex<SourceState>,
}

impl FakeSource {
    pub fn with_head(head: u64) -> Self {
        let source = FakeSource::default();
        source.set_head(head);
        source
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Overrides the hash of block `number`. `None` makes the block disappear.
    pub fn set_block_hash(&self, number: u64, hash: Option<B256>) {
        self.state.lock().unwrap().hashes.insert(number, hash);
    }

    /// The next `n` calls to [SourceChain::head_block_number] fail.
    pub fn fail_head_queries(&self, n: u32) {
        self.state.lock().unwrap().head_errors = n;
    }

    /// Queues a subscription which will be handed to the next caller of
    /// [SourceChain::subscribe_logs]. Logs sent on the returned sender are delivered on it, and
    /// dropping the sender ends it.
    pub fn push_subscription(&self) -> mpsc::UnboundedSender<Log> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().subscriptions.push_back(rx);
        tx
    }

    pub fn subscription_filters(&self) -> Vec<Filter> {
        self.state.lock().unwrap().filters.clone()
    }
}

#[async_trait]
impl SourceChain for FakeSource {
    async fn subscribe_logs(&self, filter: &Filter) -> Result<BoxStream<'static, Log>> {
        let mut state = self.state.lock().unwrap();
        state.filters.push(filter.clone());
        let receiver = state
            .subscriptions
            .pop_front()
            .ok_or_else(|| anyhow!("subscription refused"))?;
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn head_block_number(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.head_errors > 0 {
            state.head_errors -= 1;
            return Err(anyhow!("connection reset"));
        }
        Ok(state.head)
    }

    async fn block_hash(&self, number: u64) -> Result<Option<B256>> {
        let state = self.state.lock().unwrap();
        if number > state.head {
            return Ok(None);
        }
        Ok(state
            .hashes
            .get(&number)
            .copied()
            .unwrap_or(Some(canonical_hash(number))))
    }
}

#[derive(Default)]
struct DestinationState {
    processed: HashSet<MessageId>,
    trusted: HashMap<U256, Address>,
    processed_unavailable: bool,
    trusted_unavailable: bool,
    scripted_failures: VecDeque<String>,
    rejected: HashMap<MessageId, String>,
    mint_latency: Duration,
    attempts: Vec<(Instant, MintCall)>,
    mints: HashMap<MessageId, u32>,
}

/// A destination bridge which behaves like the real contract: it rejects mints for messages it has
/// already processed.
#[derive(Default)]
pub struct FakeDestination {
    state: Mutex<DestinationState>,
}

impl FakeDestination {
    /// A bridge which trusts [SOURCE_BRIDGE] for [SOURCE_CHAIN_ID].
    pub fn trusting_source() -> Self {
        let destination = FakeDestination::default();
        destination.set_trusted(U256::from(SOURCE_CHAIN_ID), SOURCE_BRIDGE);
        destination
    }

    pub fn set_trusted(&self, chain_id: U256, bridge: Address) {
        self.state.lock().unwrap().trusted.insert(chain_id, bridge);
    }

    pub fn set_processed(&self, id: MessageId) {
        self.state.lock().unwrap().processed.insert(id);
    }

    pub fn set_processed_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().processed_unavailable = unavailable;
    }

    pub fn set_trusted_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().trusted_unavailable = unavailable;
    }

    /// The next `n` mint attempts fail with `error`.
    pub fn fail_mints(&self, n: usize, error: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .scripted_failures
            .extend(std::iter::repeat_n(error.to_owned(), n));
    }

    /// Every mint for `id` fails with `error`.
    pub fn reject_mints(&self, id: MessageId, error: &str) {
        let mut state = self.state.lock().unwrap();
        state.rejected.insert(id, error.to_owned());
    }

    pub fn set_mint_latency(&self, latency: Duration) {
        self.state.lock().unwrap().mint_latency = latency;
    }

    /// When each `executeMint` was sent, successful or not.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .attempts
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn attempts(&self) -> Vec<MintCall> {
        self.state
            .lock()
            .unwrap()
            .attempts
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// How many successful mints were executed for `id`.
    pub fn mint_count(&self, id: MessageId) -> u32 {
        self.state
            .lock()
            .unwrap()
            .mints
            .get(&id)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DestinationChain for FakeDestination {
    async fn processed(&self, id: MessageId) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if state.processed_unavailable {
            return Err(anyhow!("eth_call timed out"));
        }
        Ok(state.processed.contains(&id))
    }

    async fn source_bridge_for_chain(&self, chain_id: U256) -> Result<Address> {
        let state = self.state.lock().unwrap();
        if state.trusted_unavailable {
            return Err(anyhow!("eth_call timed out"));
        }
        Ok(state.trusted.get(&chain_id).copied().unwrap_or_default())
    }

    async fn execute_mint(&self, call: &MintCall) -> Result<B256> {
        let latency = {
            let mut state = self.state.lock().unwrap();
            state.attempts.push((Instant::now(), call.clone()));
            state.mint_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let id = MessageId::compute(call.src_chain_id, call.src_bridge, call.token, call.nonce);
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.rejected.get(&id) {
            return Err(anyhow!(error.clone()));
        }
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(anyhow!(error));
        }
        if !state.processed.insert(id) {
            return Err(anyhow!("execution reverted: already processed"));
        }
        *state.mints.entry(id).or_default() += 1;
        Ok(keccak256(id.0))
    }
}
