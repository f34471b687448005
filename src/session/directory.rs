//! Working-directory tracking for multiplexer-backed connections.

use std::path::PathBuf;

/// Remembers the last directory reported to the client.
///
/// Polled values are fed through [`DirectoryTracker::observe`], which only
/// yields a value when it differs from the previously emitted one.
#[derive(Debug, Clone, Default)]
pub struct DirectoryTracker {
    last_known: Option<PathBuf>,
}

impl DirectoryTracker {
    /// Create a tracker that has not observed anything yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last directory that was emitted.
    pub fn last_known(&self) -> Option<&PathBuf> {
        self.last_known.as_ref()
    }

    /// Record a polled value; returns it only if it changed.
    pub fn observe(&mut self, raw: &str) -> Option<PathBuf> {
        let dir = parse_directory(raw)?;
        if self.last_known.as_ref() == Some(&dir) {
            return None;
        }
        self.last_known = Some(dir.clone());
        Some(dir)
    }
}

/// Parse a directory from multiplexer output (first non-empty line).
pub fn parse_directory(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}
