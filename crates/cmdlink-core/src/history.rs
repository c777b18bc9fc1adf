//! Bounded, navigable command history.

use std::{collections::VecDeque, io, path::Path};

use crate::persist;

/// Default number of entries kept.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Order-preserving log of submitted command lines.
///
/// Adjacent duplicates are suppressed and the oldest entry is evicted once
/// `max_entries` is exceeded. The navigation cursor ranges over
/// `0..=len`, where `len` means "nothing selected".
#[derive(Debug, Clone)]
pub struct HistoryStore {
    entries: VecDeque<String>,
    max_entries: usize,
    cursor: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl HistoryStore {
    /// Create an empty history holding at most `max_entries` lines.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries,
            cursor: 0,
        }
    }

    /// Record a submitted line.
    ///
    /// Blank lines and repeats of the most recent entry are ignored;
    /// otherwise the cursor is moved past the end.
    pub fn record(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || self.entries.back().is_some_and(|last| last == line) {
            return;
        }

        self.entries.push_back(line.to_string());
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        self.reset_navigation();
    }

    /// Step back to the previous entry.
    ///
    /// Returns `None` when already at the oldest entry.
    pub fn previous(&mut self) -> Option<&str> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).map(String::as_str)
    }

    /// Step forward to the next entry.
    ///
    /// Stepping onto "past the end" yields `Some("")`, the signal to clear
    /// the input. Returns `None` when nothing is selected.
    pub fn next(&mut self) -> Option<&str> {
        if self.cursor >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        Some(self.entries.get(self.cursor).map_or("", String::as_str))
    }

    /// Deselect; the next `previous()` returns the most recent entry.
    pub fn reset_navigation(&mut self) {
        self.cursor = self.entries.len();
    }

    /// Current cursor position in `0..=len`.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Entries from oldest to newest.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Write the history to `path`, one line per entry.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> io::Result<()> {
        persist::write_lines(path, &self.entries).await?;
        tracing::debug!(path = %path.display(), entries = self.entries.len(), "history saved");
        Ok(())
    }

    /// Replace the history with the contents of `path`.
    ///
    /// Each line is replayed through [`record`](Self::record), so
    /// de-duplication and eviction apply. A missing file yields an empty
    /// history.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read.
    pub async fn load(&mut self, path: &Path) -> io::Result<()> {
        let lines = persist::read_lines(path).await?;
        self.entries.clear();
        for line in &lines {
            self.record(line);
        }
        self.reset_navigation();
        tracing::debug!(path = %path.display(), entries = self.entries.len(), "history loaded");
        Ok(())
    }
}
