//! Live binding tracker.
//!
//! After every snippet the session hands the evaluator's newly visible
//! properties to [`BindingTracker::update`]. Only immutable bindings are
//! tracked; a name that becomes mutable is dropped. Values and their display
//! strings are cached lazily and only recomputed on refresh, and a refresh
//! counts as a change only when the new value differs by equality.

mod lazy;
mod usage;

pub use lazy::Lazy;
pub use usage::UsageIndex;

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::evaluator::{Property, SnippetId, Value, ValueSource};

/// A tracked, read-only binding.
#[derive(Clone)]
pub struct Binding {
    name: String,
    /// Snippet that declared the binding.
    snippet: SnippetId,
    mutable: bool,
    source: Arc<dyn ValueSource>,
    value: Lazy<Value>,
    display: Lazy<Arc<str>>,
    /// Number of times the value was read from the source.
    computations: u64,
}

impl Binding {
    fn new(name: &str, snippet: SnippetId, source: Arc<dyn ValueSource>) -> Self {
        Self {
            name: name.to_string(),
            snippet,
            mutable: false,
            source,
            value: Lazy::Stale,
            display: Lazy::Stale,
            computations: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snippet that declared this binding.
    pub fn snippet(&self) -> SnippetId {
        self.snippet
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Whether the value is cached.
    pub fn is_realized(&self) -> bool {
        self.value.is_fresh()
    }

    pub fn computations(&self) -> u64 {
        self.computations
    }

    /// Current value, read from the evaluator at most once per refresh.
    pub fn value(&mut self) -> Result<&Value> {
        let source = &self.source;
        let computations = &mut self.computations;
        self.value.get_or_try_init(|| {
            *computations += 1;
            source.read()
        })
    }

    /// Display string of the value. Computing it computes the value first.
    pub fn display(&mut self) -> Result<Arc<str>> {
        if let Some(display) = self.display.get() {
            return Ok(Arc::clone(display));
        }
        let text: Arc<str> = Arc::from(self.value()?.to_string());
        self.display.set(Arc::clone(&text));
        Ok(text)
    }

    /// Drop cached value and display string.
    pub fn invalidate(&mut self) {
        self.value.invalidate();
        self.display.invalidate();
    }

    /// Re-read the value and report whether it changed.
    ///
    /// The display string survives a refresh that yields an equal value.
    fn refresh(&mut self) -> Result<bool> {
        let previous = self.value.invalidate();
        let changed = self.value().map(|current| previous.as_ref() != Some(current));
        if !matches!(changed, Ok(false)) {
            self.display.invalidate();
        }
        changed
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("snippet", &self.snippet)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

/// Bindings declared, changed or dropped by one update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindingDelta {
    pub declared: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl BindingDelta {
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Fold in a delta produced after this one.
    pub fn merge(&mut self, later: BindingDelta) {
        for name in later.declared {
            self.removed.retain(|n| *n != name);
            self.changed.retain(|n| *n != name);
            self.declared.push(name);
        }
        for name in later.removed {
            self.declared.retain(|n| *n != name);
            self.changed.retain(|n| *n != name);
            self.removed.push(name);
        }
        for name in later.changed {
            if !self.declared.contains(&name) {
                self.changed.push(name);
            }
        }
        for names in [&mut self.declared, &mut self.changed, &mut self.removed] {
            names.sort();
            names.dedup();
        }
    }
}

/// Tracks the session's live bindings.
#[derive(Debug, Clone, Default)]
pub struct BindingTracker {
    bindings: FxHashMap<String, Binding>,
    usages: UsageIndex,
}

impl BindingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the properties made visible by a snippet.
    pub fn update(&mut self, snippet: SnippetId, properties: &[Property]) -> BindingDelta {
        let mut delta = BindingDelta::default();
        let mut declared = BTreeSet::new();

        for property in properties {
            if property.mutable {
                if self.bindings.remove(&property.name).is_some() {
                    self.usages.forget(&property.name);
                    delta.removed.push(property.name.clone());
                }
                continue;
            }
            let binding = Binding::new(&property.name, snippet, Arc::clone(&property.source));
            self.bindings.insert(property.name.clone(), binding);
            self.usages.record_declaration(snippet, &property.name);
            declared.insert(property.name.clone());
        }

        let mut names: Vec<&String> = self.bindings.keys().collect();
        names.sort();
        let names: Vec<String> = names.into_iter().cloned().collect();

        for name in names {
            let Some(binding) = self.bindings.get_mut(&name) else {
                continue;
            };
            match binding.refresh() {
                Ok(true) if !declared.contains(&name) => {
                    self.usages.record_change(snippet, &name);
                    delta.changed.push(name);
                }
                Ok(_) => {}
                Err(Error::BindingNotRealized(_)) => {
                    tracing::debug!("Binding {} is not realized yet", name);
                }
                Err(e) => {
                    tracing::warn!(snippet = %snippet, "Failed to refresh binding {}: {}", name, e);
                }
            }
        }

        delta.declared = declared.into_iter().collect();
        delta.removed.sort();
        delta
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Current value of a binding.
    pub fn value(&mut self, name: &str) -> Result<Value> {
        self.binding_mut(name)?.value().cloned()
    }

    /// Display string of a binding.
    pub fn display(&mut self, name: &str) -> Result<Arc<str>> {
        self.binding_mut(name)?.display()
    }

    /// Mark a binding for recomputation on next access.
    pub fn invalidate(&mut self, name: &str) -> Result<()> {
        self.binding_mut(name)?.invalidate();
        Ok(())
    }

    fn binding_mut(&mut self, name: &str) -> Result<&mut Binding> {
        self.bindings
            .get_mut(name)
            .ok_or_else(|| Error::UnknownBinding(name.to_string()))
    }

    /// Snippet a binding is attributed to.
    pub fn owner(&self, name: &str) -> Option<SnippetId> {
        self.bindings.get(name).map(Binding::snippet)
    }

    /// Tracked names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn usages(&self) -> &UsageIndex {
        &self.usages
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
        self.usages = UsageIndex::default();
    }
}
