//! Test utilities for creating temporary log directories and collecting entries.

use crate::entry::Entry;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long helpers wait for an expected entry.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A scratch directory of log files, removed on drop.
pub struct TempLogDir {
    dir: tempfile::TempDir,
}

impl TempLogDir {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a file in the directory, whether or not it exists.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Glob pattern relative to the directory.
    pub fn glob(&self, pattern: &str) -> String {
        format!("{}/{}", self.dir.path().display(), pattern)
    }

    /// Create or replace a file with the given content.
    pub fn write(&self, name: &str, content: &str) -> std::io::Result<PathBuf> {
        let path = self.file(name);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Append raw content, without adding a terminator.
    pub fn append(&self, name: &str, content: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file(name))?;
        file.write_all(content.as_bytes())?;
        file.flush()
    }

    pub fn rename(&self, from: &str, to: &str) -> std::io::Result<PathBuf> {
        let target = self.file(to);
        fs::rename(self.file(from), &target)?;
        Ok(target)
    }

    pub fn remove(&self, name: &str) -> std::io::Result<()> {
        fs::remove_file(self.file(name))
    }
}

/// Receive exactly `count` entries and return their bodies.
///
/// Panics if they do not arrive within [`RECV_TIMEOUT`].
pub async fn recv_bodies(rx: &mut mpsc::UnboundedReceiver<Entry>, count: usize) -> Vec<String> {
    let mut bodies = Vec::with_capacity(count);
    while bodies.len() < count {
        match tokio::time::timeout(RECV_TIMEOUT, rx.recv()).await {
            Ok(Some(entry)) => bodies.push(entry.body),
            Ok(None) => panic!("sink closed after {} of {} entries", bodies.len(), count),
            Err(_) => panic!(
                "timed out after {} of {} entries: {:?}",
                bodies.len(),
                count,
                bodies
            ),
        }
    }
    bodies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_append() {
        let dir = TempLogDir::new().unwrap();
        let path = dir.write("test.log", "line 1\n").unwrap();
        dir.append("test.log", "line 2\n").unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "line 1\nline 2\n");
    }

    #[test]
    fn test_append_creates_file() {
        let dir = TempLogDir::new().unwrap();
        dir.append("new.log", "x").unwrap();
        assert!(dir.file("new.log").exists());
    }

    #[test]
    fn test_rename_and_remove() {
        let dir = TempLogDir::new().unwrap();
        dir.write("a.log", "content").unwrap();

        let renamed = dir.rename("a.log", "a.log.1").unwrap();
        assert!(renamed.exists());
        assert!(!dir.file("a.log").exists());

        dir.remove("a.log.1").unwrap();
        assert!(!renamed.exists());
    }

    #[test]
    fn test_glob_is_rooted_in_directory() {
        let dir = TempLogDir::new().unwrap();
        assert!(dir.glob("*.log").starts_with(&dir.path().display().to_string()));
    }

    #[tokio::test]
    async fn test_recv_bodies() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Entry::new("a")).unwrap();
        tx.send(Entry::new("b")).unwrap();

        assert_eq!(recv_bodies(&mut rx, 2).await, vec!["a", "b"]);
    }
}
