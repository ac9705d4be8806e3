//! Results of snippet execution.

use serde::Serialize;
use uuid::Uuid;

use crate::bindings::BindingDelta;
use crate::error::Error;
use crate::evaluator::{SnippetId, Value};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_HTML: &str = "text/html";

/// A rich output shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayArtifact {
    /// Identifier the transport can use to update the output in place.
    pub id: String,
    pub mime: String,
    pub data: String,
}

impl DisplayArtifact {
    pub fn new(mime: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mime: mime.into(),
            data: data.into(),
        }
    }

    pub fn text(data: impl Into<String>) -> Self {
        Self::new(MIME_TEXT, data)
    }

    pub fn html(data: impl Into<String>) -> Self {
        Self::new(MIME_HTML, data)
    }

    /// Replace the generated identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_html(&self) -> bool {
        self.mime == MIME_HTML
    }

    /// Default artifact for a value: HTML for markup, plain text otherwise,
    /// nothing for unit.
    pub fn for_value(value: &Value) -> Option<Self> {
        match value {
            Value::Unit => None,
            Value::Html(html) => Some(Self::html(html.clone())),
            other => Some(Self::text(other.to_string())),
        }
    }
}

/// Receives display artifacts as soon as they are produced.
pub trait DisplaySink: Send {
    fn display(&mut self, artifact: &DisplayArtifact);
}

/// Sink that keeps every artifact, in order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub artifacts: Vec<DisplayArtifact>,
}

impl DisplaySink for CollectingSink {
    fn display(&mut self, artifact: &DisplayArtifact) {
        self.artifacts.push(artifact.clone());
    }
}

/// Result of one evaluation, top-level or nested.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnippetResult {
    pub snippet: Option<SnippetId>,
    pub value: Option<Value>,
    /// Binding holding the value, such as `res3`.
    pub result_name: Option<String>,
    /// Rendered form of the value.
    pub display: Option<DisplayArtifact>,
    pub bindings: BindingDelta,
}

/// Everything a completed top-level snippet produced.
#[derive(Debug)]
pub struct EvaluationResult {
    pub snippet: SnippetId,
    pub value: Option<Value>,
    pub result_name: Option<String>,
    /// Rendered form of the value.
    pub display: Option<DisplayArtifact>,
    pub bindings: BindingDelta,
    /// Dependencies declared by libraries activated during the snippet.
    pub added_dependencies: Vec<String>,
    /// Imports declared by libraries or the snippet itself.
    pub added_imports: Vec<String>,
    /// Artifacts displayed while the snippet ran, in order.
    pub displays: Vec<DisplayArtifact>,
    pub warnings: Vec<String>,
    /// Failures of handlers that ran after the evaluation. They do not fail
    /// the snippet.
    pub extension_errors: Vec<Error>,
}

impl EvaluationResult {
    /// Text of the rendered value, if any.
    pub fn display_text(&self) -> Option<&str> {
        self.display.as_ref().map(|d| d.data.as_str())
    }
}

/// Outcome of [`Session::execute`](crate::Session::execute).
#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed(EvaluationResult),
    /// The snippet was aborted; none of its effects are visible.
    Interrupted { snippet: SnippetId },
}

impl ExecutionOutcome {
    pub fn snippet(&self) -> SnippetId {
        match self {
            ExecutionOutcome::Completed(result) => result.snippet,
            ExecutionOutcome::Interrupted { snippet } => *snippet,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, ExecutionOutcome::Interrupted { .. })
    }

    pub fn result(&self) -> Option<&EvaluationResult> {
        match self {
            ExecutionOutcome::Completed(result) => Some(result),
            ExecutionOutcome::Interrupted { .. } => None,
        }
    }

    pub fn into_result(self) -> Option<EvaluationResult> {
        match self {
            ExecutionOutcome::Completed(result) => Some(result),
            ExecutionOutcome::Interrupted { .. } => None,
        }
    }

    /// Value of a completed snippet.
    pub fn value(&self) -> Option<&Value> {
        self.result().and_then(|r| r.value.as_ref())
    }
}

/// Result of one shutdown snippet or hook.
#[derive(Debug)]
pub struct ShutdownResult {
    pub library: Option<String>,
    pub outcome: Result<Option<Value>, Error>,
}

/// Per-call execution switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Run code preprocessors, including `%use`.
    pub process_magics: bool,
    /// Update the binding tracker after evaluation.
    pub track_bindings: bool,
    /// Identifier chosen by the transport; allocated by the session if absent.
    pub snippet: Option<SnippetId>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            process_magics: true,
            track_bindings: true,
            snippet: None,
        }
    }
}

impl ExecuteOptions {
    /// Options for code run on behalf of a library or handler.
    ///
    /// Bindings are tracked under the nested snippet's own id. Value
    /// handlers do not run for nested code.
    pub fn nested() -> Self {
        Self::default()
    }

    pub fn with_snippet(mut self, snippet: SnippetId) -> Self {
        self.snippet = Some(snippet);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_artifact() {
        assert!(DisplayArtifact::for_value(&Value::Unit).is_none());
        let html = DisplayArtifact::for_value(&Value::Html("<b>1</b>".into())).unwrap();
        assert!(html.is_html());
        let text = DisplayArtifact::for_value(&Value::Int(2)).unwrap();
        assert_eq!(text.mime, MIME_TEXT);
        assert_eq!(text.data, "2");
    }

    #[test]
    fn test_artifact_ids_are_unique() {
        let a = DisplayArtifact::text("a");
        let b = DisplayArtifact::text("a");
        assert_ne!(a.id, b.id);
        assert_eq!(a.with_id("fixed").id, "fixed");
    }
}
