//! Contract between the session and the language evaluator.
//!
//! The session never looks inside snippet text. It hands each snippet to an
//! [`Evaluator`] and consumes the structured [`EvalOutput`] or
//! [`EvalFailure`] it returns. Evaluators must accumulate state
//! monotonically: later snippets see earlier bindings and imports.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::session::AbortHandle;

/// Sequence number of a snippet.
///
/// Top-level snippets and nested executions are numbered separately, so
/// top-level numbers have no gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SnippetId {
    number: u64,
    nested: bool,
}

impl SnippetId {
    pub fn new(id: u64) -> Self {
        Self {
            number: id,
            nested: false,
        }
    }

    /// Id of code run on behalf of a library or handler.
    pub fn nested(id: u64) -> Self {
        Self {
            number: id,
            nested: true,
        }
    }

    pub fn as_u64(self) -> u64 {
        self.number
    }

    pub fn is_nested(self) -> bool {
        self.nested
    }

    /// Name of the binding holding the snippet's value.
    pub fn result_name(self) -> String {
        if self.nested {
            format!("nested_res{}", self.number)
        } else {
            format!("res{}", self.number)
        }
    }
}

impl fmt::Display for SnippetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nested {
            write!(f, "nested_snippet_{}", self.number)
        } else {
            write!(f, "snippet_{}", self.number)
        }
    }
}

/// Source text plus its sequence number. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub id: SnippetId,
    pub code: String,
}

impl Snippet {
    pub fn new(id: SnippetId, code: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
        }
    }
}

/// A value produced by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Markup to be displayed as HTML.
    Html(String),
    /// Instance of a user-declared type.
    Object { type_name: String, repr: String },
}

impl Value {
    /// Name of the value's type, as matched by renderers.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Unit => "Unit",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Str(_) => "Str",
            Value::Html(_) => "Html",
            Value::Object { type_name, .. } => type_name,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => f.write_str("()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) | Value::Html(s) => f.write_str(s),
            Value::Object { repr, .. } => f.write_str(repr),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A compile or runtime problem, with its position in the snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}:{}: {}: {}", self.line, self.column, severity, self.message)
    }
}

/// Reads the current value of a binding from the evaluator's state.
///
/// Reading an unrealized lazy value must fail with
/// [`Error::BindingNotRealized`](crate::Error::BindingNotRealized) rather
/// than force it.
pub trait ValueSource: Send + Sync {
    fn read(&self) -> Result<Value>;
}

/// A binding made visible by a snippet.
#[derive(Clone)]
pub struct Property {
    pub name: String,
    pub mutable: bool,
    pub source: Arc<dyn ValueSource>,
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("mutable", &self.mutable)
            .finish_non_exhaustive()
    }
}

/// A type declared by a snippet, with its annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredType {
    pub name: String,
    pub annotations: Vec<String>,
}

/// A file-level annotation such as `@file:Experimental`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAnnotation {
    pub name: String,
}

/// Declarations a library hands to the evaluator before its init code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declarations {
    pub dependencies: Vec<String>,
    pub repositories: Vec<String>,
    pub imports: Vec<String>,
}

impl Declarations {
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.repositories.is_empty() && self.imports.is_empty()
    }
}

/// Successful evaluation of one snippet.
#[derive(Debug, Clone, Default)]
pub struct EvalOutput {
    /// Value of the last expression, if any.
    pub value: Option<Value>,
    /// Binding the value was stored under, such as `res3`.
    pub result_name: Option<String>,
    /// Bindings declared or assigned by the snippet.
    pub properties: Vec<Property>,
    /// Imports added by the snippet.
    pub imports: Vec<String>,
    pub declared_types: Vec<DeclaredType>,
    pub file_annotations: Vec<FileAnnotation>,
}

/// Why an evaluation did not produce output.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalFailure {
    /// Compile or runtime errors.
    Diagnostics(Vec<Diagnostic>),
    /// The abort handle was triggered. No state was committed.
    Interrupted,
}

/// The language evaluator the session delegates to.
pub trait Evaluator: Send {
    /// Accept dependency, repository and import declarations.
    fn declare(&mut self, declarations: &Declarations) -> Result<()>;

    /// Compile and run one snippet against the accumulated state.
    fn evaluate(
        &mut self,
        snippet: &Snippet,
        abort: &AbortHandle,
    ) -> std::result::Result<EvalOutput, EvalFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::Str("hi".into()).to_string(), "hi");
        assert_eq!(Value::Unit.to_string(), "()");
        let obj = Value::Object {
            type_name: "Point".into(),
            repr: "Point".into(),
        };
        assert_eq!(obj.type_name(), "Point");
    }

    #[test]
    fn test_nested_ids_are_distinct() {
        assert_ne!(SnippetId::new(1), SnippetId::nested(1));
        assert_eq!(SnippetId::nested(1).to_string(), "nested_snippet_1");
        assert_eq!(SnippetId::new(3).result_name(), "res3");
        assert!(!SnippetId::new(3).is_nested());
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::error("unknown name 'y'", 2, 5);
        assert_eq!(d.to_string(), "2:5: error: unknown name 'y'");
    }

    #[test]
    fn test_value_equality_is_structural() {
        assert_eq!(Value::Str("a".into()), Value::Str("a".into()));
        assert_ne!(Value::Int(1), Value::Str("1".into()));
    }
}
