//! Cooperative cancellation and progress callbacks for snippet execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Error;
use crate::evaluator::SnippetId;
use crate::session::outcome::EvaluationResult;

/// Handle for cooperative cancellation of a running snippet.
///
/// Any clone can trigger the abort, which is visible to all other clones.
/// The evaluator polls it between statements; the session polls it between
/// pipeline steps.
///
/// # Example
///
/// ```
/// use jotter_core::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let remote = handle.clone();
/// assert!(!handle.is_aborted());
///
/// remote.abort();
/// assert!(handle.is_aborted());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an abort was requested.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Request abort of the running snippet.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    /// Clear the flag. Called before every top-level execution.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::Relaxed);
    }
}

/// Progress reporting for top-level snippets.
pub trait ExecutionCallback: Send + Sync {
    /// Called when a snippet is submitted.
    fn on_snippet_started(&self, snippet: SnippetId, code: &str);

    /// Called when a snippet completes.
    fn on_snippet_completed(&self, snippet: SnippetId, result: &EvaluationResult);

    /// Called when a snippet fails.
    fn on_snippet_error(&self, snippet: SnippetId, error: &Error);

    /// Called when a snippet is interrupted and its effects rolled back.
    fn on_snippet_interrupted(&self, _snippet: SnippetId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_shared() {
        let handle = AbortHandle::new();
        let clone = handle.clone();

        clone.abort();
        assert!(handle.is_aborted());

        handle.reset();
        assert!(!clone.is_aborted());
    }
}
