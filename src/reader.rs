//! Per-file reader worker.
//!
//! A reader owns one open handle. Every poll interval it reads from its
//! offset to EOF, splits the bytes into records, decodes them and hands them
//! to the sink one at a time. The offset only advances past records that were
//! handed off, and is recorded in the offset store after each poll. The
//! store's file is only rewritten by the offset committer.
//!
//! Two tokens stop a reader. `shutdown` discards whatever partial record is
//! buffered; `retire` first drains the file to EOF and flushes the buffer as
//! a final record.

use crate::config::StartAt;
use crate::decoder::Decoder;
use crate::entry::{Entry, LABEL_FILE_NAME, LABEL_FILE_PATH, RecordSink};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::offsets::OffsetStore;
use crate::split::Splitter;
use std::collections::BTreeMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on bytes read from a file before records are emitted.
const READ_CHUNK: u64 = 64 * 1024;

/// Settings and collaborators shared by every reader of one operator.
pub(crate) struct ReaderContext<S> {
    pub splitter: Splitter,
    pub decoder: Decoder,
    pub fingerprint_size: usize,
    pub poll_interval: Duration,
    pub include_file_name: bool,
    pub include_file_path: bool,
    pub sink: S,
    pub store: Arc<dyn OffsetStore>,
    /// Failures that should be reported when the operator stops.
    pub errors: Mutex<Vec<String>>,
}

impl<S> ReaderContext<S> {
    pub(crate) fn record_error(&self, error: String) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    pub(crate) fn take_errors(&self) -> Vec<String> {
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// State of a reader visible to discovery.
#[derive(Debug)]
pub(crate) struct ReaderStatus {
    pub path: PathBuf,
    fingerprint: Mutex<Fingerprint>,
    offset: AtomicU64,
}

impl ReaderStatus {
    pub(crate) fn new(path: PathBuf, fingerprint: Fingerprint, offset: u64) -> Self {
        Self {
            path,
            fingerprint: Mutex::new(fingerprint),
            offset: AtomicU64::new(offset),
        }
    }

    pub(crate) fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_fingerprint(&self, fingerprint: Fingerprint) {
        *self.fingerprint.lock().unwrap_or_else(PoisonError::into_inner) = fingerprint;
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }
}

/// A reader that must finish before its successor opens the file.
pub(crate) struct Predecessor {
    pub handle: JoinHandle<u64>,
    /// Continue from the predecessor's final offset instead of resolving a
    /// start position.
    pub inherit_offset: bool,
}

/// A reader that has not opened its file yet.
pub(crate) struct Reader<S> {
    ctx: Arc<ReaderContext<S>>,
    status: Arc<ReaderStatus>,
    start_at: StartAt,
    predecessor: Option<Predecessor>,
    shutdown: CancellationToken,
    retire: CancellationToken,
}

impl<S: RecordSink> Reader<S> {
    pub(crate) fn new(
        ctx: Arc<ReaderContext<S>>,
        status: Arc<ReaderStatus>,
        start_at: StartAt,
        predecessor: Option<Predecessor>,
        shutdown: CancellationToken,
        retire: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            status,
            start_at,
            predecessor,
            shutdown,
            retire,
        }
    }

    /// Tails the file until shutdown, retirement, or the sink closes.
    /// Returns the offset of the first byte not handed off.
    pub(crate) async fn run(mut self) -> Result<u64> {
        let inherited = match self.predecessor.take() {
            Some(predecessor) => match self.await_predecessor(predecessor).await {
                Some(inherited) => inherited,
                None => return Ok(self.status.offset()),
            },
            None => None,
        };

        let Some(mut tail) = self.open(inherited).await else {
            return Ok(self.status.offset());
        };

        let mut ticker = interval(self.ctx.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                _ = self.retire.cancelled() => {
                    break tail.drain(&self.shutdown).await;
                }
                _ = ticker.tick() => {
                    match tail.poll(&self.shutdown).await {
                        Ok(()) => {}
                        Err(Error::StreamClosed) => break Err(Error::StreamClosed),
                        Err(e) => {
                            debug!(path = %tail.path().display(), error = %e, "Transient read error, retrying next poll");
                        }
                    }
                }
            }
        };

        let result = match result {
            Err(Error::StreamClosed) => Err(Error::StreamClosed),
            Err(e) => {
                debug!(path = %tail.path().display(), error = %e, "Final read failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        };

        if let Err(e) = tail.persist() {
            self.ctx.record_error(format!(
                "failed to persist offset for {}: {}",
                tail.path().display(),
                e
            ));
        }

        info!(path = %tail.path().display(), offset = tail.offset, "Stopped watching file");
        result.map(|()| tail.offset)
    }

    /// Waits for the predecessor to exit. `None` means shutdown came first.
    async fn await_predecessor(&self, predecessor: Predecessor) -> Option<Option<u64>> {
        let Predecessor {
            handle,
            inherit_offset,
        } = predecessor;

        let joined = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return None,
            joined = handle => joined,
        };

        if !inherit_offset {
            return Some(None);
        }

        match joined {
            Ok(offset) => Some(Some(offset)),
            Err(e) => {
                debug!(path = %self.status.path.display(), error = %e, "Predecessor failed, using last known offset");
                Some(Some(self.status.offset()))
            }
        }
    }

    async fn open(&self, inherited: Option<u64>) -> Option<Tail<S>> {
        let path = &self.status.path;

        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "File removed before it could be opened");
                return None;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to open file");
                return None;
            }
        };

        let fingerprint = match Fingerprint::compute(&mut file, self.ctx.fingerprint_size).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to fingerprint file");
                return None;
            }
        };
        self.status.set_fingerprint(fingerprint.clone());

        let offset = match inherited.or_else(|| self.stored_offset(&fingerprint)) {
            Some(offset) => offset,
            None => match self.start_at {
                StartAt::Beginning => 0,
                StartAt::End => match file.metadata().await {
                    Ok(metadata) => metadata.len(),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to stat file");
                        return None;
                    }
                },
            },
        };
        self.status.offset.store(offset, Ordering::Relaxed);

        info!(path = %path.display(), offset, "Started watching file");

        Some(Tail {
            ctx: Arc::clone(&self.ctx),
            status: Arc::clone(&self.status),
            decoder: self.ctx.decoder,
            labels: file_labels(path, self.ctx.include_file_name, self.ctx.include_file_path),
            file,
            fingerprint,
            offset,
            pending: Vec::new(),
            persisted: None,
        })
    }

    fn stored_offset(&self, fingerprint: &Fingerprint) -> Option<u64> {
        if fingerprint.is_empty() {
            return None;
        }

        match self.ctx.store.get(fingerprint) {
            Ok(offset) => offset,
            Err(e) => {
                warn!(path = %self.status.path.display(), error = %e, "Failed to load stored offset");
                None
            }
        }
    }
}

/// An open file being tailed.
struct Tail<S> {
    ctx: Arc<ReaderContext<S>>,
    status: Arc<ReaderStatus>,
    decoder: Decoder,
    labels: BTreeMap<String, String>,
    file: File,
    fingerprint: Fingerprint,
    /// File position of the first byte of `pending`.
    offset: u64,
    /// Bytes read but not yet handed off.
    pending: Vec<u8>,
    persisted: Option<u64>,
}

impl<S: RecordSink> Tail<S> {
    fn path(&self) -> &Path {
        &self.status.path
    }

    fn read_position(&self) -> u64 {
        self.offset + self.pending.len() as u64
    }

    /// Reads everything appended since the last poll and emits the complete
    /// records.
    async fn poll(&mut self, shutdown: &CancellationToken) -> Result<()> {
        let size = self.file.metadata().await?.len();

        if detect_file_truncation(size, self.read_position()) {
            info!(
                path = %self.path().display(),
                previous = self.read_position(),
                size,
                "File truncated, reading from the beginning"
            );
            self.reset().await?;
        }

        if self.read_to_eof(shutdown, false).await? {
            self.refresh_fingerprint(size).await?;
            self.persist()?;
        }
        Ok(())
    }

    /// Final read before retirement: consume the rest of the file and flush
    /// the partial record.
    async fn drain(&mut self, shutdown: &CancellationToken) -> Result<()> {
        let size = self.file.metadata().await?.len();

        if detect_file_truncation(size, self.read_position()) {
            self.emit_pending(shutdown, true).await?;
        } else {
            self.read_to_eof(shutdown, true).await?;
        }
        Ok(())
    }

    /// Returns false if shutdown interrupted the hand-off.
    async fn read_to_eof(&mut self, shutdown: &CancellationToken, flush: bool) -> Result<bool> {
        let position = self.read_position();
        self.file.seek(SeekFrom::Start(position)).await?;

        loop {
            let read = (&mut self.file)
                .take(READ_CHUNK)
                .read_to_end(&mut self.pending)
                .await?;
            if read == 0 {
                break;
            }
            if !self.emit_pending(shutdown, false).await? {
                return Ok(false);
            }
        }

        if flush {
            return self.emit_pending(shutdown, true).await;
        }
        Ok(true)
    }

    /// Splits the buffer and hands every complete record to the sink.
    async fn emit_pending(&mut self, shutdown: &CancellationToken, flush: bool) -> Result<bool> {
        let (records, consumed) = {
            let split = self.ctx.splitter.split(&self.pending, flush);
            let records: Vec<(Entry, usize)> = split
                .tokens
                .iter()
                .map(|token| (self.entry(token.bytes), token.end))
                .collect();
            (records, split.consumed)
        };

        let mut handed_off = 0;
        for (entry, end) in records {
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                result = self.ctx.sink.emit(entry) => Some(result),
            };

            match outcome {
                Some(Ok(())) => handed_off = end,
                Some(Err(e)) => {
                    self.advance(handed_off);
                    return Err(e);
                }
                None => {
                    self.advance(handed_off);
                    return Ok(false);
                }
            }
        }

        self.advance(consumed);
        Ok(true)
    }

    fn entry(&self, bytes: &[u8]) -> Entry {
        let decoded = self.decoder.decode(bytes);
        if decoded.malformed > 0 {
            warn!(
                path = %self.path().display(),
                malformed = decoded.malformed,
                encoding = self.decoder.name(),
                "Skipped malformed bytes while decoding"
            );
        }

        let mut entry = Entry::new(decoded.text);
        entry.labels = self.labels.clone();
        entry
    }

    fn advance(&mut self, consumed: usize) {
        self.pending.drain(..consumed);
        self.offset += consumed as u64;
        self.status.offset.store(self.offset, Ordering::Relaxed);
    }

    async fn reset(&mut self) -> Result<()> {
        self.offset = 0;
        self.pending.clear();
        self.status.offset.store(0, Ordering::Relaxed);

        let fingerprint = Fingerprint::compute(&mut self.file, self.ctx.fingerprint_size).await?;
        self.replace_fingerprint(fingerprint);
        Ok(())
    }

    /// Recomputes a partial fingerprint once the file has grown past it.
    async fn refresh_fingerprint(&mut self, size: u64) -> Result<()> {
        if self.fingerprint.is_complete(self.ctx.fingerprint_size)
            || size <= self.fingerprint.len() as u64
        {
            return Ok(());
        }

        let fingerprint = Fingerprint::compute(&mut self.file, self.ctx.fingerprint_size).await?;
        if fingerprint != self.fingerprint {
            self.replace_fingerprint(fingerprint);
        }
        Ok(())
    }

    fn replace_fingerprint(&mut self, fingerprint: Fingerprint) {
        if !self.fingerprint.is_empty() && self.persisted.is_some() {
            if let Err(e) = self.ctx.store.remove(&self.fingerprint) {
                warn!(path = %self.path().display(), error = %e, "Failed to remove stale offset");
            }
        }

        self.status.set_fingerprint(fingerprint.clone());
        self.fingerprint = fingerprint;
        self.persisted = None;
    }

    /// Stores the offset if it changed since the last call.
    fn persist(&mut self) -> Result<()> {
        if self.fingerprint.is_empty() || self.persisted == Some(self.offset) {
            return Ok(());
        }

        if let Err(e) = self
            .ctx
            .store
            .put(&self.fingerprint, self.offset, &self.status.path)
        {
            warn!(path = %self.path().display(), error = %e, "Failed to persist offset");
            return Err(e);
        }

        self.persisted = Some(self.offset);
        Ok(())
    }
}

fn file_labels(path: &Path, include_name: bool, include_path: bool) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    if include_name {
        if let Some(name) = path.file_name() {
            labels.insert(
                LABEL_FILE_NAME.to_string(),
                name.to_string_lossy().into_owned(),
            );
        }
    }
    if include_path {
        labels.insert(LABEL_FILE_PATH.to_string(), path.display().to_string());
    }
    labels
}

/// Detect if the file was truncated by comparing current size with the read position
fn detect_file_truncation(current_size: u64, read_position: u64) -> bool {
    current_size < read_position
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offsets::OffsetDatabase;
    use crate::split::SplitMode;
    use crate::test_helpers::{TempLogDir, recv_bodies};
    use regex::bytes::Regex;
    use tokio::sync::mpsc;

    const POLL: Duration = Duration::from_millis(20);

    struct Harness {
        ctx: Arc<ReaderContext<mpsc::UnboundedSender<Entry>>>,
        rx: mpsc::UnboundedReceiver<Entry>,
        db: OffsetDatabase,
    }

    fn harness(mode: SplitMode) -> Harness {
        let (tx, rx) = mpsc::unbounded_channel();
        let db = OffsetDatabase::in_memory();
        let ctx = Arc::new(ReaderContext {
            splitter: Splitter::new(mode, 1024 * 1024),
            decoder: Decoder::nop(),
            fingerprint_size: 1000,
            poll_interval: POLL,
            include_file_name: true,
            include_file_path: false,
            sink: tx,
            store: Arc::new(db.scope("test")),
            errors: Mutex::new(Vec::new()),
        });
        Harness { ctx, rx, db }
    }

    fn line_harness() -> Harness {
        harness(SplitMode::Line(Default::default()))
    }

    struct Running {
        status: Arc<ReaderStatus>,
        shutdown: CancellationToken,
        retire: CancellationToken,
        handle: JoinHandle<Result<u64>>,
    }

    fn spawn(
        ctx: &Arc<ReaderContext<mpsc::UnboundedSender<Entry>>>,
        path: &Path,
        start_at: StartAt,
        predecessor: Option<Predecessor>,
    ) -> Running {
        let status = Arc::new(ReaderStatus::new(
            path.to_path_buf(),
            Fingerprint::default(),
            0,
        ));
        let shutdown = CancellationToken::new();
        let retire = CancellationToken::new();
        let reader = Reader::new(
            Arc::clone(ctx),
            Arc::clone(&status),
            start_at,
            predecessor,
            shutdown.clone(),
            retire.clone(),
        );
        Running {
            status,
            shutdown,
            retire,
            handle: tokio::spawn(reader.run()),
        }
    }

    #[test]
    fn test_detect_file_truncation() {
        assert!(detect_file_truncation(100, 200));
        assert!(!detect_file_truncation(200, 100));
        assert!(!detect_file_truncation(100, 100));
    }

    #[test]
    fn test_file_labels() {
        let path = Path::new("/var/log/app.log");

        let labels = file_labels(path, true, true);
        assert_eq!(labels[LABEL_FILE_NAME], "app.log");
        assert_eq!(labels[LABEL_FILE_PATH], "/var/log/app.log");

        assert!(file_labels(path, false, false).is_empty());
    }

    #[tokio::test]
    async fn test_reads_existing_content_from_beginning() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("app.log", "first\nsecond\n").unwrap();
        let mut h = line_harness();

        let running = spawn(&h.ctx, &path, StartAt::Beginning, None);
        let bodies = recv_bodies(&mut h.rx, 2).await;
        assert_eq!(bodies, vec!["first", "second"]);

        let entry_labels = {
            dir.append("app.log", "third\n").unwrap();
            h.rx.recv().await.unwrap().labels
        };
        assert_eq!(entry_labels[LABEL_FILE_NAME], "app.log");

        running.shutdown.cancel();
        let offset = running.handle.await.unwrap().unwrap();
        assert_eq!(offset, "first\nsecond\nthird\n".len() as u64);
    }

    #[tokio::test]
    async fn test_start_at_end_skips_existing_content() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("app.log", "old line\n").unwrap();
        let mut h = line_harness();

        let running = spawn(&h.ctx, &path, StartAt::End, None);
        tokio::time::sleep(POLL * 3).await;
        dir.append("app.log", "new line\n").unwrap();

        assert_eq!(recv_bodies(&mut h.rx, 1).await, vec!["new line"]);
        running.shutdown.cancel();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_terminator() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("app.log", "complete\npart").unwrap();
        let mut h = line_harness();

        let running = spawn(&h.ctx, &path, StartAt::Beginning, None);
        assert_eq!(recv_bodies(&mut h.rx, 1).await, vec!["complete"]);

        tokio::time::sleep(POLL * 3).await;
        assert!(h.rx.try_recv().is_err());
        assert_eq!(running.status.offset(), "complete\n".len() as u64);

        dir.append("app.log", "ial\n").unwrap();
        assert_eq!(recv_bodies(&mut h.rx, 1).await, vec!["partial"]);

        running.shutdown.cancel();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_discards_partial_record() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("app.log", "done\nunfinished").unwrap();
        let mut h = line_harness();

        let running = spawn(&h.ctx, &path, StartAt::Beginning, None);
        recv_bodies(&mut h.rx, 1).await;
        tokio::time::sleep(POLL * 2).await;

        running.shutdown.cancel();
        let offset = running.handle.await.unwrap().unwrap();

        assert_eq!(offset, 5);
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_retire_flushes_partial_record() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("app.log", "done\nunfinished").unwrap();
        let mut h = line_harness();

        let running = spawn(&h.ctx, &path, StartAt::Beginning, None);
        recv_bodies(&mut h.rx, 1).await;

        dir.append("app.log", " but flushed").unwrap();
        running.retire.cancel();
        let offset = running.handle.await.unwrap().unwrap();

        assert_eq!(
            recv_bodies(&mut h.rx, 1).await,
            vec!["unfinished but flushed"]
        );
        assert_eq!(offset, "done\nunfinished but flushed".len() as u64);
    }

    #[tokio::test]
    async fn test_persists_offset_after_hand_off() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("app.log", "one\ntwo\n").unwrap();
        let mut h = line_harness();

        let running = spawn(&h.ctx, &path, StartAt::Beginning, None);
        recv_bodies(&mut h.rx, 2).await;
        running.shutdown.cancel();
        running.handle.await.unwrap().unwrap();

        let id = Fingerprint::from_bytes(b"one\ntwo\n".to_vec());
        assert_eq!(h.ctx.store.get(&id).unwrap(), Some(8));
        assert_eq!(h.db.entries("test")[&id.key()].path, path.display().to_string());
    }

    #[tokio::test]
    async fn test_stored_offset_wins_over_start_at() {
        let dir = TempLogDir::new().unwrap();
        let content = "already read\nnot yet read\n";
        let path = dir.write("app.log", content).unwrap();
        let mut h = line_harness();

        let id = Fingerprint::from_bytes(content.as_bytes().to_vec());
        h.ctx.store.put(&id, 13, &path).unwrap();

        let running = spawn(&h.ctx, &path, StartAt::Beginning, None);
        assert_eq!(recv_bodies(&mut h.rx, 1).await, vec!["not yet read"]);

        running.shutdown.cancel();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_beginning() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("app.log", "a fairly long first line\n").unwrap();
        let mut h = line_harness();

        let running = spawn(&h.ctx, &path, StartAt::Beginning, None);
        recv_bodies(&mut h.rx, 1).await;

        dir.write("app.log", "short\n").unwrap();
        assert_eq!(recv_bodies(&mut h.rx, 1).await, vec!["short"]);
        tokio::time::sleep(POLL * 2).await;
        assert_eq!(running.status.fingerprint().bytes(), b"short\n");

        running.shutdown.cancel();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_fingerprint_grows_with_file() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("app.log", "a\n").unwrap();
        let mut h = line_harness();

        let running = spawn(&h.ctx, &path, StartAt::Beginning, None);
        recv_bodies(&mut h.rx, 1).await;
        assert_eq!(running.status.fingerprint().bytes(), b"a\n");

        dir.append("app.log", "b\n").unwrap();
        recv_bodies(&mut h.rx, 1).await;
        tokio::time::sleep(POLL * 2).await;
        assert_eq!(running.status.fingerprint().bytes(), b"a\nb\n");

        running.shutdown.cancel();
        running.handle.await.unwrap().unwrap();

        let old_key = Fingerprint::from_bytes(b"a\n".to_vec()).key();
        let new_id = Fingerprint::from_bytes(b"a\nb\n".to_vec());
        let entries = h.db.entries("test");
        assert!(!entries.contains_key(&old_key));
        assert_eq!(h.ctx.store.get(&new_id).unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_successor_inherits_predecessor_offset() {
        let dir = TempLogDir::new().unwrap();
        let original = dir.write("app.log", "one\n").unwrap();
        let mut h = line_harness();

        let first = spawn(&h.ctx, &original, StartAt::Beginning, None);
        recv_bodies(&mut h.rx, 1).await;

        let renamed = dir.rename("app.log", "app.log.1").unwrap();
        dir.append("app.log.1", "two\n").unwrap();

        let second = spawn(
            &h.ctx,
            &renamed,
            StartAt::Beginning,
            Some(Predecessor {
                handle: tokio::spawn(async move {
                    first.shutdown.cancel();
                    first.handle.await.unwrap().unwrap()
                }),
                inherit_offset: true,
            }),
        );

        assert_eq!(recv_bodies(&mut h.rx, 1).await, vec!["two"]);
        second.shutdown.cancel();
        second.handle.await.unwrap().unwrap();
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_file_exits_quietly() {
        let dir = TempLogDir::new().unwrap();
        let h = line_harness();

        let running = spawn(&h.ctx, &dir.file("missing.log"), StartAt::Beginning, None);
        assert_eq!(running.handle.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_sink_stops_reader() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("app.log", "line\n").unwrap();
        let Harness { ctx, rx, .. } = line_harness();
        drop(rx);

        let running = spawn(&ctx, &path, StartAt::Beginning, None);

        assert!(matches!(
            running.handle.await.unwrap(),
            Err(Error::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn test_multiline_records_across_polls() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("app.log", "START a\nb\n").unwrap();
        let mut h = harness(SplitMode::LineStart(Regex::new("(?m)^START").unwrap()));

        let running = spawn(&h.ctx, &path, StartAt::Beginning, None);
        tokio::time::sleep(POLL * 3).await;
        assert!(h.rx.try_recv().is_err());

        dir.append("app.log", "START c\n").unwrap();
        assert_eq!(recv_bodies(&mut h.rx, 1).await, vec!["START a\nb"]);

        running.retire.cancel();
        running.handle.await.unwrap().unwrap();
        assert_eq!(recv_bodies(&mut h.rx, 1).await, vec!["START c"]);
    }
}
