//! Command completion blending local vocabulary with remote suggestions.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;

use crate::command::LOCAL_COMMANDS;

/// Separator between service, action and sub-action.
pub const SERVICE_SEPARATOR: char = '.';

const COLUMNS: usize = 4;
const COLUMN_WIDTH: usize = 20;

/// Suggestions for a piece of input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub suggestions: Vec<String>,
    pub common_prefix: String,
}

impl Completion {
    #[must_use]
    pub fn new(suggestions: Vec<String>) -> Self {
        let common_prefix = common_prefix(&suggestions);
        Self {
            suggestions,
            common_prefix,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }
}

/// Source of server-side completions.
///
/// Returns `None` when the server cannot be asked or the call failed;
/// the engine treats that as "no suggestions".
#[async_trait]
pub trait RemoteCompleter: Send + Sync {
    async fn complete_remote(
        &self,
        partial_input: String,
        cursor_position: usize,
    ) -> Option<Completion>;
}

/// Completion engine with a per-input cache of remote results.
#[derive(Debug, Clone)]
pub struct CompletionEngine {
    builtins: BTreeSet<String>,
    aliases: BTreeSet<String>,
    cache: HashMap<String, Vec<String>>,
}

impl Default for CompletionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionEngine {
    /// Engine seeded with the built-in local commands.
    #[must_use]
    pub fn new() -> Self {
        Self {
            builtins: LOCAL_COMMANDS.iter().map(|c| (*c).to_string()).collect(),
            aliases: BTreeSet::new(),
            cache: HashMap::new(),
        }
    }

    /// Complete `text`.
    ///
    /// - Blank input: every local command plus the server's suggestions for
    ///   empty input.
    /// - Input without a service separator that prefixes a local command:
    ///   those local commands, without asking the server.
    /// - Otherwise: cached or fresh remote suggestions.
    pub async fn complete(
        &mut self,
        text: &str,
        remote: Option<Arc<dyn RemoteCompleter>>,
    ) -> Completion {
        let text = text.trim().to_string();

        if text.is_empty() {
            let mut suggestions: BTreeSet<String> = self.local_vocabulary().cloned().collect();
            if let Some(remote) = remote {
                if let Some(found) = remote.complete_remote(String::new(), 0).await {
                    suggestions.extend(found.suggestions);
                }
            }
            return Completion {
                suggestions: suggestions.into_iter().collect(),
                common_prefix: String::new(),
            };
        }

        if !text.contains(SERVICE_SEPARATOR) {
            let local: Vec<String> = self
                .local_vocabulary()
                .filter(|cmd| cmd.starts_with(text.as_str()))
                .cloned()
                .collect();
            if !local.is_empty() {
                return Completion::new(local);
            }
        }

        if let Some(cached) = self.cache.get(&text) {
            tracing::trace!(%text, "completion cache hit");
            return Completion::new(cached.clone());
        }

        let Some(remote) = remote else {
            return Completion::default();
        };
        let cursor = text.len();
        match remote.complete_remote(text.clone(), cursor).await {
            Some(found) if !found.suggestions.is_empty() => {
                self.cache.insert(text, found.suggestions.clone());
                Completion::new(found.suggestions)
            }
            _ => Completion::default(),
        }
    }

    /// Drop every cached remote result.
    pub fn invalidate_cache(&mut self) {
        self.cache.clear();
    }

    /// Replace the alias names offered as local completions.
    pub fn sync_aliases<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = names.into_iter().map(Into::into).collect();
        self.invalidate_cache();
    }

    /// Add a built-in local command.
    pub fn add_local_command(&mut self, command: impl Into<String>) {
        self.builtins.insert(command.into());
        self.invalidate_cache();
    }

    /// Remove a built-in local command.
    pub fn remove_local_command(&mut self, command: &str) {
        self.builtins.remove(command);
        self.invalidate_cache();
    }

    /// Number of cached remote results.
    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn local_vocabulary(&self) -> impl Iterator<Item = &String> {
        self.builtins.union(&self.aliases)
    }
}

/// Longest string every suggestion starts with.
///
/// A single suggestion is its own prefix; an empty list has none.
#[must_use]
pub fn common_prefix<S: AsRef<str>>(items: &[S]) -> String {
    let Some((first, rest)) = items.split_first() else {
        return String::new();
    };
    let first = first.as_ref();

    let mut len = first.len();
    for item in rest {
        len = first[..len]
            .chars()
            .zip(item.as_ref().chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.len_utf8())
            .sum();
        if len == 0 {
            break;
        }
    }
    first[..len].to_string()
}

/// Group suggestions by their service segment (text before the first `.`).
///
/// Suggestions without a separator land in the `""` group.
#[must_use]
pub fn group_suggestions<S: AsRef<str>>(suggestions: &[S]) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for suggestion in suggestions {
        let suggestion = suggestion.as_ref();
        let group = suggestion
            .split_once(SERVICE_SEPARATOR)
            .map_or("", |(service, _)| service);
        groups
            .entry(group.to_string())
            .or_default()
            .push(suggestion.to_string());
    }
    groups
}

/// Render suggestions for display: grouped by service, four fixed-width
/// columns per row. Returns `None` for an empty list.
#[must_use]
pub fn format_suggestions<S: AsRef<str>>(suggestions: &[S]) -> Option<String> {
    if suggestions.is_empty() {
        return None;
    }

    let mut out = String::from("Possible completions:\n");
    for (group, items) in group_suggestions(suggestions) {
        if !group.is_empty() {
            out.push_str(&group);
            out.push_str(":\n");
        }
        for row in items.chunks(COLUMNS) {
            let line: String = row.iter().map(|item| format_cell(item)).collect();
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    Some(out)
}

fn format_cell(item: &str) -> String {
    if item.chars().count() > COLUMN_WIDTH {
        let head: String = item.chars().take(COLUMN_WIDTH - 3).collect();
        format!("{head}...")
    } else {
        format!("{item:<width$}", width = COLUMN_WIDTH)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Default)]
    struct FakeRemote {
        calls: AtomicUsize,
        inputs: Mutex<Vec<String>>,
        reply: Vec<String>,
    }

    impl FakeRemote {
        fn with(reply: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.iter().map(|s| (*s).to_string()).collect(),
                ..Self::default()
            })
        }
    }

    fn shared(remote: &Arc<FakeRemote>) -> Option<Arc<dyn RemoteCompleter>> {
        Some(Arc::clone(remote) as Arc<dyn RemoteCompleter>)
    }

    #[async_trait]
    impl RemoteCompleter for FakeRemote {
        async fn complete_remote(&self, partial: String, _cursor: usize) -> Option<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(partial);
            Some(Completion::new(self.reply.clone()))
        }
    }

    struct FailingRemote;

    #[async_trait]
    impl RemoteCompleter for FailingRemote {
        async fn complete_remote(&self, _partial: String, _cursor: usize) -> Option<Completion> {
            None
        }
    }

    #[test]
    fn test_common_prefix() {
        assert_eq!(common_prefix::<&str>(&[]), "");
        assert_eq!(common_prefix(&["connect"]), "connect");
        assert_eq!(common_prefix(&["Billing.List", "Billing.Lock"]), "Billing.L");
        assert_eq!(common_prefix(&["abc", "xyz"]), "");
        assert_eq!(common_prefix(&["grüße", "grün"]), "grü");
    }

    #[tokio::test]
    async fn test_blank_input_returns_vocabulary_and_remote() {
        let remote = FakeRemote::with(&["Billing", "Users"]);
        let mut engine = CompletionEngine::new();

        let result = engine.complete("   ", shared(&remote)).await;
        for cmd in LOCAL_COMMANDS {
            assert!(result.suggestions.iter().any(|s| s == cmd));
        }
        assert!(result.suggestions.contains(&"Billing".to_string()));
        assert_eq!(result.common_prefix, "");
        assert_eq!(engine.cached_entries(), 0);
    }

    #[tokio::test]
    async fn test_local_match_short_circuits_remote() {
        let remote = FakeRemote::with(&["connector.Open"]);
        let mut engine = CompletionEngine::new();

        let result = engine.complete("connect", shared(&remote)).await;
        assert_eq!(result.suggestions, vec!["connect"]);
        assert_eq!(result.common_prefix, "connect");
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);

        let result = engine.complete("lo", shared(&remote)).await;
        assert_eq!(result.suggestions, vec!["login", "logout"]);
        assert_eq!(result.common_prefix, "log");
    }

    #[tokio::test]
    async fn test_remote_results_are_cached() {
        let remote = FakeRemote::with(&["Billing.Invoice", "Billing.Item"]);
        let mut engine = CompletionEngine::new();

        let first = engine.complete("Billing.I", shared(&remote)).await;
        let second = engine.complete("Billing.I", shared(&remote)).await;
        assert_eq!(first, second);
        assert_eq!(first.common_prefix, "Billing.I");
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

        engine.invalidate_cache();
        engine.complete("Billing.I", shared(&remote)).await;
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_remote_failure_is_no_suggestions() {
        let mut engine = CompletionEngine::new();
        let failing: Arc<dyn RemoteCompleter> = Arc::new(FailingRemote);
        let result = engine.complete("Billing.", Some(failing)).await;
        assert!(result.is_empty());
        assert_eq!(engine.cached_entries(), 0);

        let result = engine.complete("Billing.", None).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_alias_names_are_local_and_invalidate_cache() {
        let remote = FakeRemote::with(&["invoices.List"]);
        let mut engine = CompletionEngine::new();

        engine.complete("inv", shared(&remote)).await;
        assert_eq!(engine.cached_entries(), 1);

        engine.sync_aliases(["inv"]);
        assert_eq!(engine.cached_entries(), 0);
        let result = engine.complete("in", shared(&remote)).await;
        assert_eq!(result.suggestions, vec!["inv"]);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_group_suggestions() {
        let groups = group_suggestions(&["Billing.List", "help", "Billing.Add", "Users.Find"]);
        assert_eq!(groups[""], vec!["help"]);
        assert_eq!(groups["Billing"], vec!["Billing.List", "Billing.Add"]);
        assert_eq!(groups["Users"], vec!["Users.Find"]);
    }

    #[test]
    fn test_format_suggestions_columns() {
        assert_eq!(format_suggestions::<&str>(&[]), None);

        let text = format_suggestions(&["a", "b", "c", "d", "e", "Svc.averyveryverylongcommand"])
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Possible completions:");
        assert_eq!(lines[1], format!("{:<20}{:<20}{:<20}d", "a", "b", "c"));
        assert_eq!(lines[2], "e");
        assert_eq!(lines[3], "Svc:");
        assert_eq!(lines[4], "Svc.averyveryvery...");
    }
}
