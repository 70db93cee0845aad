//! Local record of the messages this relayer has seen processed.
//!
//! One task owns the document and applies every read and mutation in the order it receives them,
//! so two relays can never overwrite each other's updates. Everybody else holds a
//! [ProcessedStore] handle.
//!
//! On disk the document is `{ "processed": { "<message id>": true, ... } }`. It is rewritten
//! whenever the processed set changes by writing a temporary file next to it and renaming it into
//! place.
//!
//! The store is advisory. The destination bridge's own `processed` mapping is authoritative.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{chain::MintCall, message_id::MessageId};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    processed: BTreeMap<String, bool>,
}

/// Result of trying to reserve a message for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the message and must either mark it processed or release it.
    Claimed,
    AlreadyProcessed,
    /// Another task holds the claim.
    InFlight,
}

/// A message we gave up on, written to the dead-letter ledger so it can be re-driven by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbandonedMessage {
    pub message_id: MessageId,
    pub call: MintCall,
    pub attempts: u32,
    pub last_error: String,
    /// Seconds since the unix epoch.
    pub abandoned_at: u64,
}

enum Request {
    IsProcessed(MessageId, oneshot::Sender<bool>),
    Claim(MessageId, oneshot::Sender<Claim>),
    Release(MessageId, oneshot::Sender<()>),
    MarkProcessed(MessageId, oneshot::Sender<Result<()>>),
    RecordAbandoned(Box<AbandonedMessage>, oneshot::Sender<Result<bool>>),
    Flush(oneshot::Sender<Result<()>>),
    ProcessedIds(oneshot::Sender<BTreeSet<MessageId>>),
}

/// Handle to the store task. Cheap to clone. The task exits once every handle has been dropped.
#[derive(Debug, Clone)]
pub struct ProcessedStore {
    sender: mpsc::UnboundedSender<Request>,
}

impl ProcessedStore {
    /// Loads the document at `path` and starts the task which owns it. Must be called within a
    /// tokio runtime.
    ///
    /// A missing document is treated as empty. So is a corrupt one, after logging a warning.
    pub fn open(path: impl Into<PathBuf>, dead_letter_path: Option<PathBuf>) -> Result<Self> {
        let path = path.into();
        let processed = load(&path);
        info!(
            path = %path.display(),
            processed = processed.len(),
            "opened processed message store"
        );

        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = StoreWriter {
            path,
            dead_letter_path,
            processed,
            claims: HashSet::new(),
        };
        tokio::spawn(writer.run(receiver));

        Ok(ProcessedStore { sender })
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .map_err(|_| anyhow!("processed message store has shut down"))?;
        rx.await
            .map_err(|_| anyhow!("processed message store dropped a request"))
    }

    pub async fn is_processed(&self, id: MessageId) -> Result<bool> {
        self.request(|tx| Request::IsProcessed(id, tx)).await
    }

    /// Atomically checks that `id` is neither processed nor claimed, and claims it if so.
    pub async fn claim(&self, id: MessageId) -> Result<Claim> {
        self.request(|tx| Request::Claim(id, tx)).await
    }

    /// Gives up a claim without marking the message processed.
    pub async fn release(&self, id: MessageId) -> Result<()> {
        self.request(|tx| Request::Release(id, tx)).await
    }

    /// Marks `id` processed and persists the document before returning. Also releases any claim on
    /// `id`.
    pub async fn mark_processed(&self, id: MessageId) -> Result<()> {
        self.request(|tx| Request::MarkProcessed(id, tx)).await?
    }

    /// Appends `message` to the dead-letter ledger. Returns `false` if no ledger is configured.
    pub async fn record_abandoned(&self, message: AbandonedMessage) -> Result<bool> {
        self.request(|tx| Request::RecordAbandoned(Box::new(message), tx))
            .await?
    }

    /// Rewrites the document with the current processed set.
    pub async fn flush(&self) -> Result<()> {
        self.request(Request::Flush).await?
    }

    pub async fn processed_ids(&self) -> Result<BTreeSet<MessageId>> {
        self.request(Request::ProcessedIds).await
    }
}

struct StoreWriter {
    path: PathBuf,
    dead_letter_path: Option<PathBuf>,
    processed: BTreeSet<MessageId>,
    /// Messages currently being submitted by some task. Not persisted.
    claims: HashSet<MessageId>,
}

impl StoreWriter {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Request>) {
        while let Some(request) = receiver.recv().await {
            // Responses are dropped if the requester has gone away; there's nothing else to do with
            // them.
            match request {
                Request::IsProcessed(id, tx) => {
                    let _ = tx.send(self.processed.contains(&id));
                }
                Request::Claim(id, tx) => {
                    let claim = if self.processed.contains(&id) {
                        Claim::AlreadyProcessed
                    } else if !self.claims.insert(id) {
                        Claim::InFlight
                    } else {
                        Claim::Claimed
                    };
                    debug!(message_id = %id, ?claim, "claim");
                    let _ = tx.send(claim);
                }
                Request::Release(id, tx) => {
                    self.claims.remove(&id);
                    let _ = tx.send(());
                }
                Request::MarkProcessed(id, tx) => {
                    self.claims.remove(&id);
                    let result = if self.processed.insert(id) {
                        self.persist().await
                    } else {
                        Ok(())
                    };
                    let _ = tx.send(result);
                }
                Request::RecordAbandoned(message, tx) => {
                    let _ = tx.send(self.append_dead_letter(&message).await);
                }
                Request::Flush(tx) => {
                    let _ = tx.send(self.persist().await);
                }
                Request::ProcessedIds(tx) => {
                    let _ = tx.send(self.processed.clone());
                }
            }
        }
        debug!("processed message store closed");
    }

    async fn persist(&self) -> Result<()> {
        let document = Document {
            processed: self
                .processed
                .iter()
                .map(|id| (id.to_string(), true))
                .collect(),
        };
        let contents = serde_json::to_vec_pretty(&document)?;
        let path = self.path.clone();
        let write = tokio::task::spawn_blocking(move || write_atomically(&path, &contents));
        write.await?
    }

    async fn append_dead_letter(&self, message: &AbandonedMessage) -> Result<bool> {
        let Some(path) = self.dead_letter_path.clone() else {
            return Ok(false);
        };
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| {
                    format!("failed to open dead-letter ledger {}", path.display())
                })?;
            file.write_all(&line)?;
            file.sync_data()?;
            Ok(())
        })
        .await??;
        Ok(true)
    }
}

fn load(path: &Path) -> BTreeSet<MessageId> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeSet::new(),
        Err(e) => {
            warn!(
                path = %path.display(),
                "could not read processed message store, starting fresh: {e}"
            );
            return BTreeSet::new();
        }
    };
    let document: Document = match serde_json::from_slice(&contents) {
        Ok(document) => document,
        Err(e) => {
            warn!(
                path = %path.display(),
                "could not parse processed message store, starting fresh: {e}"
            );
            return BTreeSet::new();
        }
    };

    document
        .processed
        .into_iter()
        .filter(|(_, processed)| *processed)
        .filter_map(|(id, _)| match id.parse() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("ignoring malformed message id {id:?} in processed message store: {e}");
                None
            }
        })
        .collect()
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temporary file in {}", dir.display()))?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
