//! Periodic checkpointing of read offsets.
//!
//! Readers record offsets in memory after every poll. The committer turns
//! them into durable writes on a fixed interval so the database file is
//! rewritten at most once per interval, however many files are being read.
//! [`FileInput::stop`](crate::FileInput::stop) runs one last checkpoint
//! after every reader has exited.

use crate::error::{Error, Result};
use crate::offsets::OffsetStore;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Flushes an [`OffsetStore`] every `checkpoint_interval` until cancelled.
pub(crate) struct OffsetCommitter {
    store: Arc<dyn OffsetStore>,
    checkpoint_interval: Duration,
    /// When the current run of failed checkpoints began.
    first_failure: Option<Instant>,
}

impl OffsetCommitter {
    pub(crate) fn new(store: Arc<dyn OffsetStore>, checkpoint_interval: Duration) -> Self {
        Self {
            store,
            checkpoint_interval,
            first_failure: None,
        }
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        debug!(interval = ?self.checkpoint_interval, "Offset committer started");

        let mut interval = tokio::time::interval(self.checkpoint_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // skip the immediate first tick
        interval.reset();

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.maybe_checkpoint().await,
            }
        }

        debug!("Offset committer stopped");
    }

    async fn maybe_checkpoint(&mut self) {
        match checkpoint(Arc::clone(&self.store)).await {
            Ok(()) => {
                if self.first_failure.take().is_some() {
                    debug!("Checkpoint succeeded after previous failures");
                }
            }
            Err(e) => {
                let first_failure = *self.first_failure.get_or_insert_with(Instant::now);
                warn!(
                    "Checkpoint failed (failures started {:?} ago): {}",
                    first_failure.elapsed(),
                    e
                );
            }
        }
    }
}

/// Flushes `store` on the blocking pool.
pub(crate) async fn checkpoint(store: Arc<dyn OffsetStore>) -> Result<()> {
    tokio::task::spawn_blocking(move || store.flush())
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
}
