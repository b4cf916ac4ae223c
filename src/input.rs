//! The file input operator.

use crate::committer::{self, OffsetCommitter};
use crate::config::{FileInputConfig, InputSettings};
use crate::discovery::{Discovery, DiscoveryEvent, Shared};
use crate::entry::RecordSink;
use crate::error::{Error, Result};
use crate::offsets::{OffsetDatabase, OffsetStore};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Tails the files matched by a [`FileInputConfig`] and emits their records
/// to a [`RecordSink`].
///
/// Dropping a running operator cancels its workers without waiting for
/// them; call [`FileInput::stop`] to wait and collect shutdown errors.
pub struct FileInput<S: RecordSink> {
    shared: Arc<Shared<S>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<DiscoveryEvent>>>,
}

impl<S: RecordSink> FileInput<S> {
    /// Validates `config` and prepares an operator whose offsets live in
    /// `db`, scoped by the config's `id`. No file is touched until
    /// [`FileInput::start`].
    pub fn new(config: &FileInputConfig, sink: S, db: &OffsetDatabase) -> Result<Self> {
        let settings = config.build()?;
        let store = Arc::new(db.scope(settings.id.clone()));
        Ok(Self::from_settings(settings, sink, store))
    }

    /// Like [`FileInput::new`] with a custom offset store.
    pub fn with_store(
        config: &FileInputConfig,
        sink: S,
        store: Arc<dyn OffsetStore>,
    ) -> Result<Self> {
        Ok(Self::from_settings(config.build()?, sink, store))
    }

    fn from_settings(settings: InputSettings, sink: S, store: Arc<dyn OffsetStore>) -> Self {
        let (shared, events) = Shared::new(settings, sink, store);

        Self {
            shared,
            events: Mutex::new(Some(events)),
        }
    }

    /// Launches discovery and returns immediately. Must be called from
    /// within a Tokio runtime, at most once.
    pub fn start(&self) -> Result<()> {
        let events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::config("file input can only be started once"))?;

        info!("Starting file input");
        let discovery = Discovery::new(Arc::clone(&self.shared), events);
        self.shared.tracker.spawn(discovery.run());

        let committer = OffsetCommitter::new(
            Arc::clone(&self.shared.ctx.store),
            self.shared.checkpoint_interval,
        );
        self.shared
            .tracker
            .spawn(committer.run(self.shared.cancel.clone()));
        Ok(())
    }

    /// Cancels every reader and directory watcher, waits for all of them
    /// to exit and checkpoints the final offsets. Errors collected along the
    /// way are returned together.
    pub async fn stop(&self) -> Result<()> {
        self.shared.cancel.cancel();
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        self.shared.clear_directories();

        if let Err(e) = committer::checkpoint(Arc::clone(&self.shared.ctx.store)).await {
            warn!("Failed to perform final checkpoint: {}", e);
            self.shared
                .ctx
                .record_error(format!("final checkpoint failed: {}", e));
        }
        info!("Stopped file input");

        let errors = self.shared.ctx.take_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Shutdown { errors })
        }
    }

    /// Files currently being read.
    pub fn tracked_files(&self) -> Vec<PathBuf> {
        self.shared.tracked_paths()
    }

    /// Matched files waiting for a free reader slot.
    pub fn queued_files(&self) -> Vec<PathBuf> {
        self.shared.queued_paths()
    }

    pub fn watched_directories(&self) -> Vec<PathBuf> {
        self.shared.watched_directories()
    }
}

impl<S: RecordSink> Drop for FileInput<S> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartAt;
    use crate::entry::Entry;
    use crate::fingerprint::Fingerprint;
    use crate::test_helpers::{TempLogDir, recv_bodies};
    use std::path::Path;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn config(dir: &TempLogDir) -> FileInputConfig {
        let mut config = FileInputConfig::with_include([dir.glob("*.log")]);
        config.start_at = StartAt::Beginning;
        config.poll_interval = Duration::from_millis(20);
        config
    }

    #[test]
    fn test_new_fails_fast_on_invalid_config() {
        let (tx, _rx) = mpsc::unbounded_channel::<Entry>();
        let result = FileInput::new(
            &FileInputConfig::default(),
            tx,
            &OffsetDatabase::in_memory(),
        );

        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let dir = TempLogDir::new().unwrap();
        dir.write("app.log", "hello\n").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let input = FileInput::new(&config(&dir), tx, &OffsetDatabase::in_memory()).unwrap();
        assert_ok!(input.start());

        assert_eq!(recv_bodies(&mut rx, 1).await, vec!["hello"]);
        assert_eq!(input.tracked_files(), vec![dir.file("app.log")]);

        assert_ok!(input.stop().await);
        assert!(input.watched_directories().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let dir = TempLogDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let input = FileInput::new(&config(&dir), tx, &OffsetDatabase::in_memory()).unwrap();

        assert_ok!(input.start());
        assert!(matches!(input.start(), Err(Error::Config { .. })));
        assert_ok!(input.stop().await);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let dir = TempLogDir::new().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let input = FileInput::new(&config(&dir), tx, &OffsetDatabase::in_memory()).unwrap();

        assert_ok!(input.stop().await);
    }

    #[tokio::test]
    async fn test_stop_does_not_hang_on_full_sink() {
        let dir = TempLogDir::new().unwrap();
        dir.write("app.log", "one\ntwo\nthree\n").unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let input = FileInput::new(&config(&dir), tx, &OffsetDatabase::in_memory()).unwrap();
        input.start().unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.body, "one");

        let stopped = tokio::time::timeout(Duration::from_secs(5), input.stop()).await;
        assert!(stopped.is_ok());
    }

    #[tokio::test]
    async fn test_closed_sink_stops_input() {
        let dir = TempLogDir::new().unwrap();
        dir.write("app.log", "line\n").unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let input = FileInput::new(&config(&dir), tx, &OffsetDatabase::in_memory()).unwrap();
        input.start().unwrap();

        tokio::time::timeout(Duration::from_secs(5), input.shared.cancel.cancelled())
            .await
            .unwrap();
        assert_ok!(input.stop().await);
    }

    #[tokio::test]
    async fn test_offsets_are_scoped_by_id() {
        let dir = TempLogDir::new().unwrap();
        dir.write("app.log", "line\n").unwrap();
        let db = OffsetDatabase::in_memory();

        let mut config = config(&dir);
        config.id = "custom".to_string();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let input = FileInput::new(&config, tx, &db).unwrap();
        input.start().unwrap();
        recv_bodies(&mut rx, 1).await;
        input.stop().await.unwrap();

        assert_eq!(db.entries("custom").len(), 1);
        assert!(db.entries("file_input").is_empty());
    }

    /// Accepts lookups but fails every write.
    struct ReadOnlyStore;

    impl OffsetStore for ReadOnlyStore {
        fn get(&self, _fingerprint: &Fingerprint) -> Result<Option<u64>> {
            Ok(None)
        }

        fn put(&self, _fingerprint: &Fingerprint, _offset: u64, _path: &Path) -> Result<()> {
            Err(Error::Io(std::io::Error::other("read-only store")))
        }

        fn remove(&self, _fingerprint: &Fingerprint) -> Result<()> {
            Err(Error::Io(std::io::Error::other("read-only store")))
        }
    }

    #[tokio::test]
    async fn test_stop_reports_offset_store_failures() {
        let dir = TempLogDir::new().unwrap();
        dir.write("app.log", "line\n").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let input = FileInput::with_store(&config(&dir), tx, Arc::new(ReadOnlyStore)).unwrap();
        input.start().unwrap();
        assert_eq!(recv_bodies(&mut rx, 1).await, vec!["line"]);

        match input.stop().await {
            Err(Error::Shutdown { errors }) => {
                assert!(!errors.is_empty());
                assert!(errors.iter().any(|e| e.contains("read-only store")));
            }
            other => panic!("expected shutdown error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_checkpoints_offsets() {
        let dir = TempLogDir::new().unwrap();
        dir.write("app.log", "line\n").unwrap();
        let state = tempfile::tempdir().unwrap();
        let db_path = state.path().join("offsets.json");
        let db = OffsetDatabase::open(&db_path).unwrap();

        let mut config = config(&dir);
        config.checkpoint_interval = Duration::from_secs(3600);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let input = FileInput::new(&config, tx, &db).unwrap();
        input.start().unwrap();
        recv_bodies(&mut rx, 1).await;

        assert_ok!(input.stop().await);
        assert!(!db.is_dirty());

        let reopened = OffsetDatabase::open(&db_path).unwrap();
        assert_eq!(reopened.entries("file_input").len(), 1);
    }
}
