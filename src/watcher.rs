//! Directory watching using the notify crate.
//!
//! A watcher only reports that a file may have appeared; include/exclude
//! policy is applied by discovery. The periodic rescan stays the source of
//! truth, so a watcher that fails simply stops.

use crate::error::Result;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a directory watcher stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchEnd {
    Cancelled,
    DirectoryRemoved,
    Failed,
}

/// Watches one directory, non-recursively, for created and renamed entries.
pub(crate) struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<notify::Result<Event>>,
    dir: PathBuf,
}

impl DirectoryWatcher {
    /// Subscribes to `dir`. Fails if the directory cannot be watched.
    pub(crate) fn new(dir: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
            dir: dir.to_path_buf(),
        })
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Forwards candidate paths to `on_path` until cancelled or the
    /// directory goes away.
    pub(crate) async fn run<F>(mut self, cancel: CancellationToken, mut on_path: F) -> WatchEnd
    where
        F: FnMut(PathBuf),
    {
        info!(dir = %self.dir.display(), "Watching directory");

        let end = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break WatchEnd::Cancelled,
                event = self.receiver.recv() => event,
            };

            match event {
                Some(Ok(event)) => {
                    if self.is_directory_gone(&event) {
                        info!(dir = %self.dir.display(), "Watched directory removed");
                        break WatchEnd::DirectoryRemoved;
                    }
                    for path in created_paths(&event, &self.dir) {
                        debug!(path = %path.display(), "File may have appeared");
                        on_path(path);
                    }
                }
                Some(Err(e)) => {
                    warn!(dir = %self.dir.display(), error = %e, "Directory watcher failed");
                    break WatchEnd::Failed;
                }
                None => break WatchEnd::Failed,
            }
        };

        debug!(dir = %self.dir.display(), reason = ?end, "Stopped watching directory");
        end
    }

    fn is_directory_gone(&self, event: &Event) -> bool {
        let touches_dir = event.paths.iter().any(|p| p == &self.dir);
        match event.kind {
            EventKind::Remove(_) => touches_dir || !self.dir.exists(),
            EventKind::Modify(ModifyKind::Name(_)) => touches_dir && !self.dir.exists(),
            _ => false,
        }
    }
}

/// Paths in `event` that may be new files inside `dir`.
fn created_paths(event: &Event, dir: &Path) -> Vec<PathBuf> {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
    );
    if !relevant {
        return Vec::new();
    }

    event
        .paths
        .iter()
        .filter(|path| path.as_path() != dir)
        .cloned()
        .collect()
}
