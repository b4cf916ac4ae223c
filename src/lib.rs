//! A file-tailing engine for log shipping.
//!
//! Files are discovered by glob, identified by a fingerprint of their leading
//! bytes so they can be followed across rotation and renames, and read
//! incrementally into single-line or multi-line records. Read offsets are
//! persisted per file identity so a restart resumes where it left off.
//!
//! # Example
//!
//! ```rust,no_run
//! use log_tail::{FileInputConfig, tail_files};
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FileInputConfig::with_include(["/var/log/app/*.log"]);
//!     let mut stream = tail_files(&config)?;
//!
//!     while let Some(entry) = stream.next().await {
//!         println!("{}: {}", entry.file_name().unwrap_or("-"), entry.body);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! For control over the sink and offset persistence, use [`FileInput`]
//! directly with any [`RecordSink`] and an [`OffsetDatabase`].

mod committer;
mod config;
mod decoder;
mod discovery;
mod entry;
mod error;
mod finder;
mod fingerprint;
mod input;
mod offsets;
mod reader;
mod split;
mod stream;
mod watcher;

#[cfg(test)]
mod test_helpers;

// Public API exports
pub use config::{FileInputConfig, InputSettings, MultilineConfig, StartAt, parse_byte_size};
pub use decoder::{Decoded, Decoder};
pub use entry::{Entry, LABEL_FILE_NAME, LABEL_FILE_PATH, RecordSink};
pub use error::{Error, Result};
pub use fingerprint::{DEFAULT_FINGERPRINT_SIZE, Fingerprint};
pub use input::FileInput;
pub use offsets::{OffsetDatabase, OffsetStore, ScopedOffsets, StoredOffset};
pub use split::{LineEnding, Split, SplitMode, Splitter, Token};
pub use stream::LogStream;

/// Tails the files matched by `config` and returns their entries as a stream.
///
/// Offsets are kept in memory only. Dropping the stream stops tailing.
///
/// # Example
///
/// ```rust,no_run
/// use log_tail::{FileInputConfig, StartAt, tail_files};
/// use tokio_stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut config = FileInputConfig::with_include(["app.log"]);
///     config.start_at = StartAt::Beginning;
///
///     let mut stream = tail_files(&config)?;
///     while let Some(entry) = stream.next().await {
///         println!("{}", entry.body);
///     }
///
///     Ok(())
/// }
/// ```
pub fn tail_files(config: &FileInputConfig) -> Result<LogStream> {
    LogStream::new(config, &OffsetDatabase::in_memory())
}
