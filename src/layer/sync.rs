//! Pull-based upstream synchronization.
//!
//! A [`SyncClient`] mirrors one upstream edit log into the local layer. The
//! durable per-source cursor (the next upstream offset to ingest) is advanced
//! in the same transaction as the replayed batch, so a crash at any point
//! resumes at exactly the first unapplied entry - never skipping one, never
//! ingesting one twice.
//!
//! The client moves through four states:
//!
//! ```text
//! Disconnected -> Connecting -> Catchup -> Live
//!       ^_____________|____________|________|   (on source error)
//! ```
//!
//! Catchup pulls slices until the cursor reaches the upstream index; Live
//! waits on the upstream commit notification and pulls increments. An offset
//! discontinuity in a pulled slice forces re-catchup from the durable cursor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

use super::editlog::LogEntry;
use super::Layer;
use crate::SourceId;

/// A pullable source of committed edit log entries.
///
/// The only surface the sync client needs from an upstream; an RPC transport
/// implements this the same way [`InProcSource`] does.
#[async_trait]
pub trait EditSource: Send + Sync {
    /// The upstream's next offset (its log length).
    async fn index(&self) -> Result<u64>;

    /// Up to `size` entries starting at `offs`, ascending.
    async fn slice(&self, offs: u64, size: usize) -> Result<Vec<LogEntry>>;

    /// Commit notifications: the receiver's value is the upstream index.
    async fn subscribe(&self) -> Result<watch::Receiver<u64>>;
}

/// An edit source backed by a layer in the same process. Used by mirrors
/// sharing a process and by tests.
pub struct InProcSource {
    layer: Arc<Layer>,
}

impl InProcSource {
    pub fn new(layer: Arc<Layer>) -> Self {
        Self { layer }
    }
}

#[async_trait]
impl EditSource for InProcSource {
    async fn index(&self) -> Result<u64> {
        Ok(self.layer.edit_log_index())
    }

    async fn slice(&self, offs: u64, size: usize) -> Result<Vec<LogEntry>> {
        self.layer.slice(offs, size)
    }

    async fn subscribe(&self) -> Result<watch::Receiver<u64>> {
        Ok(self.layer.subscribe())
    }
}

/// Sync client state, observable through [`SyncClient::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    Catchup,
    Live,
}

/// Tuning for one sync client.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Entries per catchup pull.
    pub batch_size: usize,
    /// First reconnect delay; doubles up to `backoff_max`.
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Mirrors one upstream source into the local layer.
pub struct SyncClient {
    layer: Arc<Layer>,
    source: Arc<dyn EditSource>,
    source_id: SourceId,
    config: SyncConfig,
    state_tx: watch::Sender<SyncState>,
    state_rx: watch::Receiver<SyncState>,
}

impl SyncClient {
    pub fn new(
        layer: Arc<Layer>,
        source: Arc<dyn EditSource>,
        source_id: SourceId,
        config: SyncConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SyncState::Disconnected);
        Self {
            layer,
            source,
            source_id,
            config,
            state_tx,
            state_rx,
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    fn set_state(&self, state: SyncState) {
        let _ = self.state_tx.send(state);
    }

    /// Run until aborted. Source failures back off exponentially and
    /// reconnect; local apply failures are fatal (local storage is broken).
    #[tracing::instrument(skip(self), fields(source = %self.source_id))]
    pub async fn run(self) -> Result<()> {
        let mut backoff = self.config.backoff_initial;
        loop {
            self.set_state(SyncState::Connecting);
            match self.run_connected().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    self.set_state(SyncState::Disconnected);
                    tracing::warn!(error = %err, delay = ?backoff, "Sync source failed; backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.config.backoff_max);
                }
            }
        }
    }

    /// One connected session: catchup, then live until the source errors.
    async fn run_connected(&self) -> Result<()> {
        let mut notify = self.source.subscribe().await?;

        loop {
            self.set_state(SyncState::Catchup);
            self.catchup().await?;

            self.set_state(SyncState::Live);
            tracing::debug!("Caught up; waiting for upstream commits");
            loop {
                notify
                    .changed()
                    .await
                    .map_err(|_| anyhow::anyhow!("Upstream commit channel closed"))?;
                let upstream = *notify.borrow_and_update();
                if upstream > self.layer.cursor(self.source_id)? {
                    break;
                }
            }
        }
    }

    /// Pull slices until the cursor reaches the upstream index.
    async fn catchup(&self) -> Result<()> {
        loop {
            let cursor = self.layer.cursor(self.source_id)?;
            let upstream = self.source.index().await?;
            if cursor >= upstream {
                return Ok(());
            }
            tracing::debug!(cursor, upstream, "Catching up");

            let entries = self
                .source
                .slice(cursor, self.config.batch_size)
                .await?;
            if entries.is_empty() {
                anyhow::bail!(
                    "Upstream index {} is past cursor {} but slice returned nothing",
                    upstream,
                    cursor
                );
            }

            let first = entries[0].offs;
            if first > cursor {
                // Entries between cursor and first are gone upstream.
                anyhow::bail!(
                    "Offset gap: cursor {} but first available entry is {}",
                    cursor,
                    first
                );
            }
            if first < cursor {
                // The upstream log restarted (truncate). Replay from its new
                // zero; no-op diffing makes re-application harmless.
                tracing::warn!(
                    cursor,
                    first,
                    "Upstream offsets regressed; re-syncing from the returned slice"
                );
            }

            let mut expected = first;
            for entry in &entries {
                if entry.offs != expected {
                    // Discontinuity inside the slice; re-catchup from the
                    // durable cursor.
                    tracing::warn!(
                        expected,
                        got = entry.offs,
                        "Offset discontinuity in slice; restarting catchup"
                    );
                    break;
                }
                self.layer.ingest_sync_entry(self.source_id, entry).await?;
                expected = entry.offs + 1;
            }
        }
    }
}

/// Spawn a sync client task. Abort the handle to stop mirroring.
pub fn spawn_sync_client(client: SyncClient) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(client.run())
}
