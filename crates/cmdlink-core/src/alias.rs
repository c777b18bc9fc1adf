//! Local alias table with first-token expansion.

use std::{borrow::Cow, io, path::Path};

use thiserror::Error;

use crate::{command::is_reserved_keyword, persist};

/// Default maximum number of aliases.
pub const DEFAULT_MAX_ALIASES: usize = 50;

/// Alias validation error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AliasError {
    #[error("Maximum number of aliases ({0}) reached")]
    CapacityReached(usize),
    #[error("Alias name cannot be empty")]
    EmptyName,
    #[error("Alias command cannot be empty")]
    EmptyCommand,
    #[error("Alias name '{0}' cannot contain spaces, periods or '='")]
    InvalidName(String),
    #[error("'{0}' is a reserved keyword")]
    Reserved(String),
    #[error("An alias with the name '{0}' already exists")]
    AlreadyExists(String),
    #[error("No alias with the name '{0}' found")]
    NotFound(String),
}

/// Bounded mapping from alias names to command lines.
///
/// Entries keep insertion order, which is also the order they are saved in.
#[derive(Debug, Clone)]
pub struct AliasTable {
    entries: Vec<(String, String)>,
    max_count: usize,
}

impl Default for AliasTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ALIASES)
    }
}

impl AliasTable {
    #[must_use]
    pub const fn new(max_count: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_count,
        }
    }

    /// Add an alias.
    ///
    /// # Errors
    /// Returns error if the table is full, the name is malformed or reserved,
    /// or the name already exists.
    pub fn add(&mut self, name: &str, command: &str) -> Result<(), AliasError> {
        if self.entries.len() >= self.max_count {
            return Err(AliasError::CapacityReached(self.max_count));
        }
        validate_name(name)?;
        if command.trim().is_empty() {
            return Err(AliasError::EmptyCommand);
        }
        if self.get(name).is_some() {
            return Err(AliasError::AlreadyExists(name.to_string()));
        }

        self.entries.push((name.to_string(), command.to_string()));
        Ok(())
    }

    /// Remove an alias.
    ///
    /// # Errors
    /// Returns error if no alias with that name exists.
    pub fn remove(&mut self, name: &str) -> Result<(), AliasError> {
        let index = self
            .position(name)
            .ok_or_else(|| AliasError::NotFound(name.to_string()))?;
        self.entries.remove(index);
        Ok(())
    }

    /// Expansion of `name`, if defined.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Replace an aliased first token with its expansion.
    ///
    /// The remainder after the first whitespace run is kept verbatim. The
    /// expansion is not expanded again; unaliased input is returned as is.
    #[must_use]
    pub fn expand<'a>(&self, line: &'a str) -> Cow<'a, str> {
        let trimmed = line.trim_start();
        let (head, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim_start()),
            None => (trimmed.trim_end(), ""),
        };

        match self.get(head) {
            Some(expansion) if rest.is_empty() => Cow::Owned(expansion.to_string()),
            Some(expansion) => Cow::Owned(format!("{expansion} {rest}")),
            None => Cow::Borrowed(line),
        }
    }

    /// `(name, command)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, c)| (n.as_str(), c.as_str()))
    }

    /// Alias names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
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
    pub const fn max_count(&self) -> usize {
        self.max_count
    }

    /// Write `name=command` lines to `path`.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> io::Result<()> {
        // Collected before the await so the future stays provably `Send`.
        let lines: Vec<String> = self.iter().map(|(n, c)| format!("{n}={c}")).collect();
        persist::write_lines(path, lines).await?;
        tracing::debug!(path = %path.display(), aliases = self.entries.len(), "aliases saved");
        Ok(())
    }

    /// Replace the table with the contents of `path`.
    ///
    /// Records beyond `max_count` are dropped in file order; malformed
    /// records are skipped. A missing file yields an empty table.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read.
    pub async fn load(&mut self, path: &Path) -> io::Result<()> {
        let lines = persist::read_lines(path).await?;
        self.entries.clear();

        for line in lines {
            let Some((name, command)) = line.split_once('=') else {
                tracing::warn!(%line, "skipping malformed alias record");
                continue;
            };
            if let Some(index) = self.position(name) {
                self.entries[index].1 = command.to_string();
                continue;
            }
            match self.add(name, command) {
                Ok(()) => {}
                Err(AliasError::CapacityReached(max)) => {
                    tracing::warn!(max, "alias file exceeds capacity, truncating");
                    break;
                }
                Err(e) => tracing::warn!(%name, "skipping alias record: {e}"),
            }
        }

        tracing::debug!(path = %path.display(), aliases = self.entries.len(), "aliases loaded");
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }
}

fn validate_name(name: &str) -> Result<(), AliasError> {
    if name.is_empty() {
        return Err(AliasError::EmptyName);
    }
    if name.contains(|c: char| c.is_whitespace() || c == '.' || c == '=') {
        return Err(AliasError::InvalidName(name.to_string()));
    }
    if is_reserved_keyword(name) {
        return Err(AliasError::Reserved(name.to_string()));
    }
    Ok(())
}
