//! Priority-ordered handler registries.
//!
//! Every extension point of a session (preprocessors, renderers, value
//! handlers, lifecycle hooks) stores its handlers in a [`PriorityRegistry`].
//! Handlers are iterated by descending priority; ties are broken by the
//! registry's [`TiePolicy`].

use std::sync::Arc;

use serde::Deserialize;

/// How handlers registered with equal priority are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// The most recently registered handler comes first.
    #[default]
    LatestFirst,
    /// The first registered handler comes first.
    EarliestFirst,
}

struct Entry<T: ?Sized> {
    handler: Arc<T>,
    priority: i32,
    /// Library that registered the handler.
    owner: Option<Arc<str>>,
}

impl<T: ?Sized> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            priority: self.priority,
            owner: self.owner.clone(),
        }
    }
}

/// Ordered collection of `(handler, priority)` pairs.
///
/// Handlers are shared as `Arc<T>` so that callers can take a snapshot,
/// release the borrow on the registry, and run handlers that themselves
/// register new handlers.
pub struct PriorityRegistry<T: ?Sized> {
    entries: Vec<Entry<T>>,
    policy: TiePolicy,
}

impl<T: ?Sized> Default for PriorityRegistry<T> {
    fn default() -> Self {
        Self::new(TiePolicy::default())
    }
}

impl<T: ?Sized> PriorityRegistry<T> {
    /// Create an empty registry with the given tie policy.
    pub fn new(policy: TiePolicy) -> Self {
        Self {
            entries: Vec::new(),
            policy,
        }
    }

    /// Tie policy of this registry.
    pub fn policy(&self) -> TiePolicy {
        self.policy
    }

    /// Register a handler, keeping the list ordered.
    pub fn register(&mut self, handler: Arc<T>, priority: i32) {
        self.register_owned(handler, priority, None);
    }

    /// Register a handler on behalf of a library.
    pub fn register_owned(&mut self, handler: Arc<T>, priority: i32, owner: Option<&str>) {
        let policy = self.policy;
        // Index of the first entry the new handler must precede
        let index = self
            .entries
            .iter()
            .position(|e| match policy {
                TiePolicy::LatestFirst => e.priority <= priority,
                TiePolicy::EarliestFirst => e.priority < priority,
            })
            .unwrap_or(self.entries.len());

        self.entries.insert(
            index,
            Entry {
                handler,
                priority,
                owner: owner.map(Arc::from),
            },
        );
    }

    /// Remove a handler by identity.
    ///
    /// Returns `true` if the handler was registered.
    pub fn unregister(&mut self, handler: &Arc<T>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !Arc::ptr_eq(&e.handler, handler));
        before != self.entries.len()
    }

    /// Iterate over handlers in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries.iter().map(|e| &e.handler)
    }

    /// Iterate over `(handler, priority)` pairs in priority order.
    pub fn iter_with_priority(&self) -> impl Iterator<Item = (&Arc<T>, i32)> {
        self.entries.iter().map(|e| (&e.handler, e.priority))
    }

    /// Clone the current handler list.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.iter().map(|e| Arc::clone(&e.handler)).collect()
    }

    /// Clone the current handler list together with each handler's owner.
    pub fn snapshot_owned(&self) -> Vec<(Arc<T>, Option<Arc<str>>)> {
        self.entries
            .iter()
            .map(|e| (Arc::clone(&e.handler), e.owner.clone()))
            .collect()
    }

    /// Find the first handler, in priority order, that accepts.
    pub fn first_accepting(&self, mut accepts: impl FnMut(&T) -> bool) -> Option<Arc<T>> {
        self.first_accepting_owned(&mut accepts).map(|(handler, _)| handler)
    }

    /// Like [`first_accepting`](Self::first_accepting), also returning the owner.
    pub fn first_accepting_owned(
        &self,
        mut accepts: impl FnMut(&T) -> bool,
    ) -> Option<(Arc<T>, Option<Arc<str>>)> {
        self.entries
            .iter()
            .find(|e| accepts(&e.handler))
            .map(|e| (Arc::clone(&e.handler), e.owner.clone()))
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized> Clone for PriorityRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            policy: self.policy,
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for PriorityRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityRegistry")
            .field("policy", &self.policy)
            .field("len", &self.entries.len())
            .finish()
    }
}
