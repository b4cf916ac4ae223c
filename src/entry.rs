//! Records produced by readers and the sink they are handed to.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use tokio::sync::mpsc;

/// Label carrying the base name of the source file.
pub const LABEL_FILE_NAME: &str = "file_name";
/// Label carrying the full path of the source file.
pub const LABEL_FILE_PATH: &str = "file_path";

/// One log record read from a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// When the record was read.
    pub timestamp: DateTime<Utc>,

    /// Decoded record text.
    pub body: String,

    /// Metadata about where the record came from.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Entry {
    /// Create an entry with the current timestamp and no labels.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            body: body.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.label(LABEL_FILE_NAME)
    }

    pub fn file_path(&self) -> Option<&str> {
        self.label(LABEL_FILE_PATH)
    }
}

/// Destination of emitted records.
///
/// `emit` may wait for capacity; readers select it against cancellation so a
/// stalled consumer never blocks shutdown. An error means the consumer is
/// gone and the reader stops.
pub trait RecordSink: Clone + Send + Sync + 'static {
    fn emit(&self, entry: Entry) -> impl Future<Output = Result<()>> + Send;
}

impl RecordSink for mpsc::Sender<Entry> {
    async fn emit(&self, entry: Entry) -> Result<()> {
        self.send(entry).await.map_err(|_| Error::StreamClosed)
    }
}

impl RecordSink for mpsc::UnboundedSender<Entry> {
    async fn emit(&self, entry: Entry) -> Result<()> {
        self.send(entry).map_err(|_| Error::StreamClosed)
    }
}
