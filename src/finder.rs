//! Include/exclude glob resolution.

use glob::{Pattern, glob};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves include globs to files, dropping excluded paths.
#[derive(Debug, Clone)]
pub struct Finder {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl Finder {
    pub fn new(include: Vec<Pattern>, exclude: Vec<Pattern>) -> Self {
        Self { include, exclude }
    }

    /// All regular files matching any include glob and no exclude glob, in
    /// discovery order without duplicates.
    pub fn find_files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches = match glob(pattern.as_str()) {
                Ok(matches) => matches,
                Err(e) => {
                    debug!(pattern = pattern.as_str(), error = %e, "Skipping include pattern");
                    continue;
                }
            };

            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        debug!(path = %e.path().display(), error = %e, "Unreadable glob match");
                        continue;
                    }
                };

                if path.is_dir() || self.is_excluded(&path) {
                    continue;
                }
                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        paths
    }

    /// Whether a single path would be returned by [`Finder::find_files`].
    /// Does not check that the path exists.
    pub fn matches(&self, path: &Path) -> bool {
        self.include.iter().any(|p| p.matches_path(path)) && !self.is_excluded(path)
    }

    /// Exclude globs are evaluated against the literal path.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.iter().any(|p| p.matches_path(path))
    }
}
