//! Error types for jotter-core.

use thiserror::Error;

use crate::evaluator::Diagnostic;
use crate::session::SnippetId;

/// Result type for jotter-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension point at which a library-provided handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionPoint {
    /// Code preprocessor (line magics and friends).
    Preprocessor,
    /// Library activation: declarations, init code, handler registration.
    Activation,
    /// Per-snippet init code run before each top-level snippet.
    BeforeSnippet,
    /// Value handler run against newly captured bindings.
    ValueHandler,
    /// Renderer producing the display artifact of a result.
    Renderer,
    /// Type or file annotation handler.
    Annotation,
    /// After-execution hook.
    AfterSnippet,
    /// Scheduled follow-up execution.
    Scheduled,
    /// Shutdown snippet or hook.
    Shutdown,
}

impl std::fmt::Display for ExtensionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExtensionPoint::Preprocessor => "preprocessor",
            ExtensionPoint::Activation => "library activation",
            ExtensionPoint::BeforeSnippet => "before-snippet init",
            ExtensionPoint::ValueHandler => "value handler",
            ExtensionPoint::Renderer => "renderer",
            ExtensionPoint::Annotation => "annotation handler",
            ExtensionPoint::AfterSnippet => "after-snippet hook",
            ExtensionPoint::Scheduled => "scheduled execution",
            ExtensionPoint::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in jotter-core.
#[derive(Debug, Error)]
pub enum Error {
    /// No strategy in the resolver chain produced a definition.
    #[error("library not found: {reference} (tried: {})", attempted.join(", "))]
    LibraryNotFound {
        reference: String,
        attempted: Vec<String>,
    },

    /// A strategy applied but failed to produce a usable definition.
    #[error("failed to resolve library {reference}: {message}")]
    Resolution { reference: String, message: String },

    /// Library reference text could not be parsed.
    #[error("invalid library reference: {0}")]
    InvalidReference(String),

    /// Library descriptor is malformed.
    #[error("invalid library descriptor: {0}")]
    Descriptor(String),

    /// Library requires a newer kernel.
    #[error("library '{library}' requires kernel {required} or newer (current: {current})")]
    KernelVersion {
        library: String,
        required: String,
        current: String,
    },

    /// The evaluator rejected or failed the snippet.
    #[error("evaluation of {snippet} failed: {}", render_diagnostics(diagnostics))]
    Evaluation {
        snippet: SnippetId,
        diagnostics: Vec<Diagnostic>,
    },

    /// A library-provided handler failed.
    #[error("{point} failed{}{}: {source}",
        library.as_ref().map(|l| format!(" in library '{}'", l)).unwrap_or_default(),
        snippet.map(|s| format!(" for {}", s)).unwrap_or_default())]
    Extension {
        point: ExtensionPoint,
        library: Option<String>,
        snippet: Option<SnippetId>,
        #[source]
        source: Box<Error>,
    },

    /// Execution was interrupted by an external signal.
    #[error("execution interrupted")]
    Interrupted,

    /// The session was shut down.
    #[error("session is shut down")]
    ShutDown,

    /// A second top-level execution was attempted while one is in flight.
    #[error("another snippet is already executing")]
    ConcurrentExecution,

    /// A lazy binding was read before it was realized.
    #[error("binding '{0}' is not initialized yet")]
    BindingNotRealized(String),

    /// Binding is not tracked by the session.
    #[error("unknown binding: {0}")]
    UnknownBinding(String),

    /// Network request failed.
    #[error("network error: {0}")]
    Network(String),

    /// Handler-reported failure.
    #[error("{0}")]
    Handler(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn render_diagnostics(diagnostics: &[Diagnostic]) -> String {
    if diagnostics.is_empty() {
        return "no diagnostics".to_string();
    }
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Wrap this error with the extension point and library that produced it.
    pub fn in_extension(
        self,
        point: ExtensionPoint,
        library: Option<&str>,
        snippet: Option<SnippetId>,
    ) -> Self {
        // An interrupt is not a handler failure
        if let Error::Interrupted = self {
            return self;
        }
        Error::Extension {
            point,
            library: library.map(str::to_string),
            snippet,
            source: Box::new(self),
        }
    }

    /// Whether this error, or the error it wraps, is an interrupt.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Interrupted => true,
            Error::Extension { source, .. } => source.is_interrupted(),
            _ => false,
        }
    }

    /// Name of the library this error originated from, if known.
    pub fn library(&self) -> Option<&str> {
        match self {
            Error::Extension {
                library: Some(library),
                ..
            } => Some(library),
            Error::Extension { source, .. } => source.library(),
            Error::KernelVersion { library, .. } => Some(library),
            _ => None,
        }
    }

    /// Render the error with a recovery hint suitable for a terminal.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::LibraryNotFound { .. } => {
                Some("check the library name, or point at it explicitly with `name@file[path]`")
            }
            Error::InvalidReference(_) => {
                Some("references look like `name`, `name@ref[branch]` or `name(arg=value)`")
            }
            Error::KernelVersion { .. } => Some("upgrade jotter to use this library"),
            Error::Network(_) => Some("retry, or use a bundled library with `name@embedded`"),
            Error::ConcurrentExecution => Some("wait for the running snippet to finish"),
            Error::BindingNotRealized(_) => Some("force the lazy value before reading it"),
            _ => None,
        };
        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_not_found_names_attempts() {
        let err = Error::LibraryNotFound {
            reference: "plots@ref[main]".to_string(),
            attempted: vec!["local-cache".to_string(), "version-ref".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("plots@ref[main]"));
        assert!(msg.contains("local-cache, version-ref"));
    }

    #[test]
    fn test_extension_context() {
        let err = Error::Handler("boom".to_string()).in_extension(
            ExtensionPoint::AfterSnippet,
            Some("plots"),
            Some(SnippetId::new(4)),
        );
        assert_eq!(err.library(), Some("plots"));
        let msg = err.to_string();
        assert!(msg.contains("after-snippet hook"));
        assert!(msg.contains("'plots'"));
        assert!(msg.contains("snippet_4"));
        assert!(msg.ends_with("boom"));
    }

    #[test]
    fn test_interrupt_is_not_wrapped() {
        let err = Error::Interrupted.in_extension(ExtensionPoint::Renderer, Some("bold"), None);
        assert!(matches!(err, Error::Interrupted));
        assert!(err.is_interrupted());
        assert!(!Error::Handler("x".into()).is_interrupted());
    }

    #[test]
    fn test_hint() {
        assert!(Error::ConcurrentExecution.with_hint().contains("hint:"));
        assert!(!Error::Interrupted.with_hint().contains("hint:"));
    }
}
