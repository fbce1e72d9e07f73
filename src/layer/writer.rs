//! Apply-request plumbing: the mpsc channel between callers and the single
//! writer task.
//!
//! - [`Writer`] - cloneable handle for submitting batches
//! - [`WriterConfig`] - channel sizing
//! - [`Consumer`] - drains the channel and drives the [`Processor`]
//! - [`spawn_apply_consumer`] - task spawner
//!
//! Every batch carries a oneshot reply channel, so callers get the commit
//! outcome (offset, effective edits) of their own batch rather than a bare
//! flush acknowledgement.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};

use super::apply::{AppliedBatch, Processor};
use super::edit::{EditMeta, NodeEdit};
use crate::SourceId;

/// One batch submission.
pub(crate) struct ApplyRequest {
    pub(crate) edits: Vec<NodeEdit>,
    pub(crate) meta: EditMeta,
    pub(crate) lift: bool,
    /// `(source, next_offs)` for sync replays; the cursor advance commits
    /// with the batch.
    pub(crate) cursor: Option<(SourceId, u64)>,
    pub(crate) reply: oneshot::Sender<Result<AppliedBatch>>,
}

/// Commands accepted by the writer task. Truncation goes through the same
/// channel as batches so it serializes with in-flight commits.
pub(crate) enum WriterCmd {
    Apply(ApplyRequest),
    Truncate(oneshot::Sender<Result<u64>>),
}

/// Configuration for the apply writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Size of the mpsc channel buffer.
    pub channel_buffer_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 1000,
        }
    }
}

/// Handle for sending batches to the writer task.
#[derive(Clone)]
pub(crate) struct Writer {
    sender: mpsc::Sender<WriterCmd>,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("sender", &"<mpsc::Sender>")
            .finish()
    }
}

impl Writer {
    pub(crate) fn new(sender: mpsc::Sender<WriterCmd>) -> Self {
        Writer { sender }
    }

    /// Submit a batch and wait for its commit outcome.
    pub(crate) async fn apply(
        &self,
        edits: Vec<NodeEdit>,
        meta: EditMeta,
        lift: bool,
        cursor: Option<(SourceId, u64)>,
    ) -> Result<AppliedBatch> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(WriterCmd::Apply(ApplyRequest {
                edits,
                meta,
                lift,
                cursor,
                reply,
            }))
            .await
            .context("Failed to send batch to writer queue - channel closed")?;
        rx.await
            .context("Writer dropped reply channel - consumer task gone")?
    }

    /// Truncate the edit log and reset all sync cursors. Returns the number
    /// of log entries removed.
    pub(crate) async fn truncate(&self) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(WriterCmd::Truncate(reply))
            .await
            .context("Failed to send truncate to writer queue - channel closed")?;
        rx.await
            .context("Writer dropped reply channel - consumer task gone")?
    }
}

/// Create a writer and receiver pair.
pub(crate) fn create_apply_writer(config: &WriterConfig) -> (Writer, mpsc::Receiver<WriterCmd>) {
    let (sender, receiver) = mpsc::channel(config.channel_buffer_size);
    (Writer::new(sender), receiver)
}

/// Consumer that drains apply requests and drives the processor.
pub(crate) struct Consumer {
    receiver: mpsc::Receiver<WriterCmd>,
    processor: Arc<Processor>,
}

impl Consumer {
    pub(crate) fn new(receiver: mpsc::Receiver<WriterCmd>, processor: Arc<Processor>) -> Self {
        Self {
            receiver,
            processor,
        }
    }

    /// Process commands until the channel closes.
    ///
    /// A failed batch is reported to its caller and does not stop the loop;
    /// the transaction rollback leaves storage untouched.
    #[tracing::instrument(skip(self), name = "apply_consumer")]
    pub(crate) async fn run(mut self) {
        tracing::info!("Starting apply consumer");
        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                WriterCmd::Apply(ApplyRequest {
                    edits,
                    meta,
                    lift,
                    cursor,
                    reply,
                }) => {
                    let result = self.processor.apply(&edits, &meta, lift, cursor);
                    if let Err(err) = &result {
                        tracing::warn!(error = %err, "Batch rejected");
                    }
                    // Caller may have given up waiting; that's not our problem.
                    let _ = reply.send(result);
                }
                WriterCmd::Truncate(reply) => {
                    let result = self.processor.truncate();
                    if let Err(err) = &result {
                        tracing::warn!(error = %err, "Truncate failed");
                    }
                    let _ = reply.send(result);
                }
            }
        }
        tracing::info!("Apply consumer shutting down - channel closed");
    }
}

/// Spawn the consumer task.
pub(crate) fn spawn_apply_consumer(
    receiver: mpsc::Receiver<WriterCmd>,
    processor: Arc<Processor>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(Consumer::new(receiver, processor).run())
}
