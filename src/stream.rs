//! Stream of entries from a running file input.

use crate::config::FileInputConfig;
use crate::entry::Entry;
use crate::error::Result;
use crate::input::FileInput;
use crate::offsets::OffsetDatabase;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Entries buffered between the readers and the consumer of the stream.
const STREAM_BUFFER: usize = 1024;

/// A stream that tails the configured files and yields their entries.
///
/// Dropping the stream shuts the underlying [`FileInput`] down.
pub struct LogStream {
    receiver: mpsc::Receiver<Entry>,
    input: FileInput<mpsc::Sender<Entry>>,
}

impl LogStream {
    /// Starts tailing. Must be called from within a Tokio runtime.
    pub fn new(config: &FileInputConfig, db: &OffsetDatabase) -> Result<Self> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        let input = FileInput::new(config, tx, db)?;
        input.start()?;

        Ok(LogStream {
            receiver: rx,
            input,
        })
    }

    /// The operator feeding this stream.
    pub fn input(&self) -> &FileInput<mpsc::Sender<Entry>> {
        &self.input
    }

    /// Stops the operator and waits for every worker to exit.
    pub async fn stop(self) -> Result<()> {
        self.input.stop().await
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

impl Stream for LogStream {
    type Item = Entry;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
