//! Discovery loop: reconciles the files matched on disk with the running
//! readers and directory watchers.
//!
//! Each pass resolves the include globs, fingerprints every candidate and
//! decides per candidate whether it is already being read, was renamed from
//! a tracked path, replaced a tracked file at the same path, or is new.
//! Readers whose file is gone or no longer matched are retired. A pass runs
//! every poll interval and whenever a watcher reports a matching path.
//!
//! Readers and directory watchers live in two sets, each behind its own
//! lock. The two locks are never held together.

use crate::config::{InputSettings, StartAt};
use crate::entry::RecordSink;
use crate::fingerprint::Fingerprint;
use crate::finder::Finder;
use crate::offsets::OffsetStore;
use crate::reader::{Predecessor, Reader, ReaderContext, ReaderStatus};
use crate::watcher::{DirectoryWatcher, WatchEnd};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Messages from workers to the discovery loop.
#[derive(Debug)]
pub(crate) enum DiscoveryEvent {
    /// A directory watcher saw this path appear.
    Created(PathBuf),
    /// A reader exited and released its slot.
    SlotFreed,
    /// A directory watcher stopped on its own.
    WatcherClosed { dir: PathBuf, id: u64 },
}

struct TrackedReader {
    status: Arc<ReaderStatus>,
    shutdown: CancellationToken,
    retire: CancellationToken,
    handle: JoinHandle<u64>,
    /// Draining before exit; no longer matched against candidates.
    retiring: bool,
}

#[derive(Default)]
struct FileSet {
    readers: HashMap<u64, TrackedReader>,
    /// Matched files waiting for a free slot.
    queued: Vec<PathBuf>,
}

struct DirectoryHandle {
    id: u64,
    /// `None` if the watch could not be established.
    cancel: Option<CancellationToken>,
}

/// A matched file and its current fingerprint.
struct Candidate {
    path: PathBuf,
    fingerprint: Fingerprint,
}

enum Action {
    Retire(u64),
    Rename { from: u64, to: usize },
    Replace { old: u64, new: usize },
    New(usize),
}

/// State shared by the discovery loop, readers and watchers of one operator.
pub(crate) struct Shared<S> {
    finder: Finder,
    start_at: StartAt,
    max_concurrent_files: usize,
    fingerprint_size: usize,
    poll_interval: Duration,
    pub(crate) checkpoint_interval: Duration,
    pub(crate) ctx: Arc<ReaderContext<S>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
    files: Mutex<FileSet>,
    directories: Mutex<HashMap<PathBuf, DirectoryHandle>>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
    next_id: AtomicU64,
}

impl<S: RecordSink> Shared<S> {
    pub(crate) fn new(
        settings: InputSettings,
        sink: S,
        store: Arc<dyn OffsetStore>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (events, rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(ReaderContext {
            splitter: settings.splitter,
            decoder: settings.decoder,
            fingerprint_size: settings.fingerprint_size,
            poll_interval: settings.poll_interval,
            include_file_name: settings.include_file_name,
            include_file_path: settings.include_file_path,
            sink,
            store,
            errors: Mutex::new(Vec::new()),
        });

        let shared = Arc::new(Self {
            finder: Finder::new(settings.include, settings.exclude),
            start_at: settings.start_at,
            max_concurrent_files: settings.max_concurrent_files,
            fingerprint_size: settings.fingerprint_size,
            poll_interval: settings.poll_interval,
            checkpoint_interval: settings.checkpoint_interval,
            ctx,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            files: Mutex::new(FileSet::default()),
            directories: Mutex::new(HashMap::new()),
            events,
            next_id: AtomicU64::new(1),
        });

        (shared, rx)
    }

    fn lock_files(&self) -> std::sync::MutexGuard<'_, FileSet> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_directories(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, DirectoryHandle>> {
        self.directories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Paths with an active, non-retiring reader.
    pub(crate) fn tracked_paths(&self) -> Vec<PathBuf> {
        let files = self.lock_files();
        let mut paths: Vec<_> = files
            .readers
            .values()
            .filter(|r| !r.retiring)
            .map(|r| r.status.path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub(crate) fn queued_paths(&self) -> Vec<PathBuf> {
        self.lock_files().queued.clone()
    }

    /// Directories with a running watcher.
    pub(crate) fn watched_directories(&self) -> Vec<PathBuf> {
        let dirs = self.lock_directories();
        let mut watched: Vec<_> = dirs
            .iter()
            .filter(|(_, handle)| handle.cancel.is_some())
            .map(|(dir, _)| dir.clone())
            .collect();
        watched.sort();
        watched
    }

    pub(crate) fn clear_directories(&self) {
        let mut dirs = self.lock_directories();
        for handle in dirs.values() {
            if let Some(cancel) = &handle.cancel {
                cancel.cancel();
            }
        }
        dirs.clear();
    }

    /// Applies one reconcile pass under the readers lock.
    fn apply(
        self: &Arc<Self>,
        candidates: &[Candidate],
        initial: &mut HashMap<PathBuf, Fingerprint>,
    ) {
        let mut files = self.lock_files();

        let live: Vec<(u64, PathBuf, Fingerprint)> = files
            .readers
            .iter()
            .filter(|(_, r)| !r.retiring)
            .map(|(id, r)| (*id, r.status.path.clone(), r.status.fingerprint()))
            .collect();

        let actions = plan(&live, candidates);

        let mut renames_and_replacements = Vec::new();
        let mut new_files = Vec::new();
        for action in actions {
            match action {
                Action::Retire(id) => {
                    if let Some(reader) = files.readers.get_mut(&id) {
                        info!(path = %reader.status.path.display(), "File no longer matched, retiring reader");
                        reader.retiring = true;
                        reader.retire.cancel();
                    }
                }
                Action::New(index) => new_files.push(index),
                other => renames_and_replacements.push(other),
            }
        }

        for action in renames_and_replacements {
            match action {
                Action::Rename { from, to } => {
                    let Some(old) = files.readers.remove(&from) else {
                        continue;
                    };
                    let candidate = &candidates[to];
                    info!(
                        from = %old.status.path.display(),
                        to = %candidate.path.display(),
                        "File renamed, continuing from previous offset"
                    );

                    old.shutdown.cancel();
                    let seed = old.status.offset();
                    self.spawn_reader(
                        &mut files,
                        candidate,
                        self.start_at,
                        seed,
                        Some(Predecessor {
                            handle: old.handle,
                            inherit_offset: true,
                        }),
                    );
                }
                Action::Replace { old, new } => {
                    let Some(old) = files.readers.remove(&old) else {
                        continue;
                    };
                    let candidate = &candidates[new];
                    info!(path = %candidate.path.display(), "File replaced, retiring previous reader");

                    old.retire.cancel();
                    let start_at = self.start_for(candidate, initial);
                    self.spawn_reader(
                        &mut files,
                        candidate,
                        start_at,
                        0,
                        Some(Predecessor {
                            handle: old.handle,
                            inherit_offset: false,
                        }),
                    );
                }
                Action::Retire(_) | Action::New(_) => {}
            }
        }

        let mut queued = Vec::new();
        for index in new_files {
            let candidate = &candidates[index];
            if files.readers.len() >= self.max_concurrent_files {
                queued.push(candidate.path.clone());
                continue;
            }
            let start_at = self.start_for(candidate, initial);
            self.spawn_reader(&mut files, candidate, start_at, 0, None);
        }

        if !queued.is_empty() && queued != files.queued {
            debug!(
                queued = queued.len(),
                limit = self.max_concurrent_files,
                "Files waiting for a free reader slot"
            );
        }
        files.queued = queued;
    }

    /// Files found by the first pass honor `start_at`; later ones are new
    /// and read from the beginning.
    fn start_for(&self, candidate: &Candidate, initial: &mut HashMap<PathBuf, Fingerprint>) -> StartAt {
        match initial.remove(&candidate.path) {
            Some(fingerprint) if fingerprint.matches(&candidate.fingerprint) => self.start_at,
            _ => StartAt::Beginning,
        }
    }

    fn spawn_reader(
        self: &Arc<Self>,
        files: &mut FileSet,
        candidate: &Candidate,
        start_at: StartAt,
        seed_offset: u64,
        predecessor: Option<Predecessor>,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let status = Arc::new(ReaderStatus::new(
            candidate.path.clone(),
            candidate.fingerprint.clone(),
            seed_offset,
        ));
        let shutdown = self.cancel.child_token();
        let retire = CancellationToken::new();

        let reader = Reader::new(
            Arc::clone(&self.ctx),
            Arc::clone(&status),
            start_at,
            predecessor,
            shutdown.clone(),
            retire.clone(),
        );

        let shared = Arc::clone(self);
        let task_status = Arc::clone(&status);
        let handle = self.tracker.spawn(async move {
            let offset = match reader.run().await {
                Ok(offset) => offset,
                Err(e) => {
                    warn!(path = %task_status.path.display(), error = %e, "Reader stopped, shutting down input");
                    shared.cancel.cancel();
                    task_status.offset()
                }
            };
            shared.reader_exited(id);
            offset
        });

        files.readers.insert(
            id,
            TrackedReader {
                status,
                shutdown,
                retire,
                handle,
                retiring: false,
            },
        );
    }

    fn reader_exited(&self, id: u64) {
        let removed = self.lock_files().readers.remove(&id).is_some();
        if removed && !self.cancel.is_cancelled() {
            let _ = self.events.send(DiscoveryEvent::SlotFreed);
        }
    }

    /// Starts watchers for directories holding tracked files and stops the
    /// ones no longer needed.
    fn sync_watchers(self: &Arc<Self>) {
        let wanted: HashSet<PathBuf> = {
            let files = self.lock_files();
            files
                .readers
                .values()
                .filter_map(|r| r.status.path.parent().map(watch_dir))
                .collect()
        };

        if self.cancel.is_cancelled() {
            return;
        }

        let mut dirs = self.lock_directories();
        dirs.retain(|dir, handle| {
            if wanted.contains(dir) {
                return true;
            }
            if let Some(cancel) = &handle.cancel {
                info!(dir = %dir.display(), "No tracked files left, stopping directory watcher");
                cancel.cancel();
            }
            false
        });

        for dir in wanted {
            if dirs.contains_key(&dir) {
                continue;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let cancel = match DirectoryWatcher::new(&dir) {
                Ok(watcher) => Some(self.spawn_watcher(watcher, id)),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to watch directory, relying on rescan");
                    None
                }
            };
            dirs.insert(dir, DirectoryHandle { id, cancel });
        }
    }

    fn spawn_watcher(&self, watcher: DirectoryWatcher, id: u64) -> CancellationToken {
        let cancel = self.cancel.child_token();
        let events = self.events.clone();
        let dir = watcher.dir().to_path_buf();

        let token = cancel.clone();
        self.tracker.spawn(async move {
            let end = watcher
                .run(token, |path| {
                    let _ = events.send(DiscoveryEvent::Created(path));
                })
                .await;
            if end != WatchEnd::Cancelled {
                let _ = events.send(DiscoveryEvent::WatcherClosed { dir, id });
            }
        });

        cancel
    }

    /// Returns true if the event calls for a rescan.
    fn handle_event(&self, event: DiscoveryEvent) -> bool {
        match event {
            DiscoveryEvent::Created(path) => {
                let relevant = self.finder.matches(&path);
                if relevant {
                    debug!(path = %path.display(), "Watcher reported matching file");
                }
                relevant
            }
            DiscoveryEvent::SlotFreed => true,
            DiscoveryEvent::WatcherClosed { dir, id } => {
                let mut dirs = self.lock_directories();
                if dirs.get(&dir).is_some_and(|handle| handle.id == id) {
                    dirs.remove(&dir);
                }
                false
            }
        }
    }
}

/// Decides what to do with every candidate and live reader.
///
/// A reader keeps its path only if the candidate there still carries its
/// identity. An identity that moved to an untracked path is a rename; a
/// different file at a tracked path replaces the old reader. Two new files
/// with identical content are both read.
fn plan(live: &[(u64, PathBuf, Fingerprint)], candidates: &[Candidate]) -> Vec<Action> {
    let mut claimed: HashSet<u64> = HashSet::new();
    let mut resolved = vec![false; candidates.len()];
    let mut actions = Vec::new();

    // unchanged: same path, same identity
    for (index, candidate) in candidates.iter().enumerate() {
        let found = live
            .iter()
            .find(|(id, path, fp)| {
                !claimed.contains(id)
                    && *path == candidate.path
                    && (fp.same_identity(&candidate.fingerprint)
                        || (fp.is_empty() && candidate.fingerprint.is_empty()))
            })
            .map(|(id, ..)| *id);
        claim(&mut claimed, &mut resolved, index, found);
    }

    // renamed: identity now found at another path
    for (index, candidate) in candidates.iter().enumerate() {
        if resolved[index] {
            continue;
        }
        let found = live
            .iter()
            .find(|(id, path, fp)| {
                !claimed.contains(id)
                    && *path != candidate.path
                    && fp.same_identity(&candidate.fingerprint)
            })
            .map(|(id, ..)| *id);
        if let Some(from) = claim(&mut claimed, &mut resolved, index, found) {
            actions.push(Action::Rename { from, to: index });
        }
    }

    // same path, one side has no content yet
    for (index, candidate) in candidates.iter().enumerate() {
        if resolved[index] {
            continue;
        }
        let found = live
            .iter()
            .find(|(id, path, fp)| {
                !claimed.contains(id) && *path == candidate.path && fp.matches(&candidate.fingerprint)
            })
            .map(|(id, ..)| *id);
        claim(&mut claimed, &mut resolved, index, found);
    }

    // different file at a tracked path, or a new file
    for (index, candidate) in candidates.iter().enumerate() {
        if resolved[index] {
            continue;
        }
        let found = live
            .iter()
            .find(|(id, path, _)| !claimed.contains(id) && *path == candidate.path)
            .map(|(id, ..)| *id);
        match claim(&mut claimed, &mut resolved, index, found) {
            Some(old) => actions.push(Action::Replace { old, new: index }),
            None => actions.push(Action::New(index)),
        }
    }

    for (id, ..) in live {
        if !claimed.contains(id) {
            actions.push(Action::Retire(*id));
        }
    }

    actions
}

fn claim(
    claimed: &mut HashSet<u64>,
    resolved: &mut [bool],
    index: usize,
    found: Option<u64>,
) -> Option<u64> {
    let id = found?;
    claimed.insert(id);
    resolved[index] = true;
    Some(id)
}

fn watch_dir(parent: &Path) -> PathBuf {
    if parent.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        parent.to_path_buf()
    }
}

async fn fingerprint_path(path: &Path, size: usize) -> std::io::Result<Fingerprint> {
    let mut file = File::open(path).await?;
    Fingerprint::compute(&mut file, size).await
}

/// The discovery worker of one operator.
pub(crate) struct Discovery<S> {
    shared: Arc<Shared<S>>,
    events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    /// Files seen by the first pass that have not been opened yet.
    initial: HashMap<PathBuf, Fingerprint>,
}

impl<S: RecordSink> Discovery<S> {
    pub(crate) fn new(shared: Arc<Shared<S>>, events: mpsc::UnboundedReceiver<DiscoveryEvent>) -> Self {
        Self {
            shared,
            events,
            initial: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        let cancel = self.shared.cancel.clone();
        info!(poll_interval = ?self.shared.poll_interval, "Starting file discovery");

        self.reconcile(true).await;

        let mut ticker = interval(self.shared.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = self.events.recv() => {
                    let mut rescan = self.shared.handle_event(event);
                    while let Ok(event) = self.events.try_recv() {
                        rescan |= self.shared.handle_event(event);
                    }
                    if rescan {
                        self.reconcile(false).await;
                    }
                }
                _ = ticker.tick() => self.reconcile(false).await,
            }
        }

        info!("Stopped file discovery");
    }

    /// One full pass: resolve globs, fingerprint, reconcile, sync watchers.
    pub(crate) async fn reconcile(&mut self, first_check: bool) {
        let mut candidates = Vec::new();
        for path in self.shared.finder.find_files() {
            match fingerprint_path(&path, self.shared.fingerprint_size).await {
                Ok(fingerprint) => candidates.push(Candidate { path, fingerprint }),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable file"),
            }
        }

        if first_check {
            self.initial = candidates
                .iter()
                .map(|c| (c.path.clone(), c.fingerprint.clone()))
                .collect();
        }

        if self.shared.cancel.is_cancelled() {
            return;
        }

        self.shared.apply(&candidates, &mut self.initial);
        self.shared.sync_watchers();
    }
}
