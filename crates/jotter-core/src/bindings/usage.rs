//! Per-snippet record of declared and changed bindings.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::evaluator::SnippetId;

/// Which binding names each snippet declared or changed.
#[derive(Debug, Clone, Default)]
pub struct UsageIndex {
    declared: FxHashMap<SnippetId, BTreeSet<String>>,
    changed: FxHashMap<SnippetId, BTreeSet<String>>,
    declared_by: FxHashMap<String, SnippetId>,
}

impl UsageIndex {
    /// Record that `snippet` declared `name`.
    ///
    /// A name is declared by at most one snippet; an older declaration is
    /// dropped.
    pub fn record_declaration(&mut self, snippet: SnippetId, name: &str) {
        if let Some(previous) = self.declared_by.insert(name.to_string(), snippet) {
            if previous != snippet {
                remove_name(&mut self.declared, previous, name);
            }
        }
        self.declared
            .entry(snippet)
            .or_default()
            .insert(name.to_string());
    }

    /// Record that `snippet` changed the value of `name`.
    pub fn record_change(&mut self, snippet: SnippetId, name: &str) {
        self.changed
            .entry(snippet)
            .or_default()
            .insert(name.to_string());
    }

    /// Drop every record of `name`.
    pub fn forget(&mut self, name: &str) {
        self.declared_by.remove(name);
        for names in self.declared.values_mut().chain(self.changed.values_mut()) {
            names.remove(name);
        }
        self.declared.retain(|_, names| !names.is_empty());
        self.changed.retain(|_, names| !names.is_empty());
    }

    /// Names declared by a snippet, sorted.
    pub fn declared_in(&self, snippet: SnippetId) -> Vec<&str> {
        names_of(&self.declared, snippet)
    }

    /// Names changed by a snippet, sorted.
    pub fn changed_in(&self, snippet: SnippetId) -> Vec<&str> {
        names_of(&self.changed, snippet)
    }

    /// Snippet that declared a name.
    pub fn declared_by(&self, name: &str) -> Option<SnippetId> {
        self.declared_by.get(name).copied()
    }
}

fn remove_name(map: &mut FxHashMap<SnippetId, BTreeSet<String>>, snippet: SnippetId, name: &str) {
    if let Some(names) = map.get_mut(&snippet) {
        names.remove(name);
        if names.is_empty() {
            map.remove(&snippet);
        }
    }
}

fn names_of(map: &FxHashMap<SnippetId, BTreeSet<String>>, snippet: SnippetId) -> Vec<&str> {
    map.get(&snippet)
        .map(|names| names.iter().map(String::as_str).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redeclaration_moves_ownership() {
        let mut index = UsageIndex::default();
        let (s1, s2) = (SnippetId::new(1), SnippetId::new(2));

        index.record_declaration(s1, "x");
        index.record_declaration(s1, "y");
        index.record_declaration(s2, "x");

        assert_eq!(index.declared_in(s1), vec!["y"]);
        assert_eq!(index.declared_in(s2), vec!["x"]);
        assert_eq!(index.declared_by("x"), Some(s2));
    }

    #[test]
    fn test_forget() {
        let mut index = UsageIndex::default();
        let s1 = SnippetId::new(1);
        index.record_declaration(s1, "x");
        index.record_change(SnippetId::new(2), "x");

        index.forget("x");
        assert!(index.declared_in(s1).is_empty());
        assert!(index.changed_in(SnippetId::new(2)).is_empty());
        assert_eq!(index.declared_by("x"), None);
    }
}
