//! Extension points libraries plug into.
//!
//! Handlers receive a [`KernelHost`], the session's view of the execution in
//! progress. Through it they can run nested code, schedule follow-ups,
//! display artifacts and request further libraries.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::evaluator::{DeclaredType, FileAnnotation, SnippetId, Value};
use crate::library::LibraryRequest;
use crate::session::outcome::{DisplayArtifact, SnippetResult};

/// Placeholder for the rendered binding in code renderer templates.
pub const IT_PLACEHOLDER: &str = "$it";

/// Session services available to handlers.
pub trait KernelHost {
    /// Top-level snippet being executed, if any.
    fn snippet(&self) -> Option<SnippetId>;

    /// Run code now, in a child of the current frame.
    fn execute(&mut self, code: &str) -> Result<SnippetResult>;

    /// Queue an execution to run after the current snippet's pipeline.
    fn schedule(&mut self, execution: Execution);

    /// Show an artifact to the user.
    fn display(&mut self, artifact: DisplayArtifact);

    /// Ask for a library to be activated before the snippet is evaluated.
    fn request_library(&mut self, request: LibraryRequest);

    /// Options of the libraries visible from the current frame.
    fn library_options(&self) -> BTreeMap<String, String>;

    /// Current value of a tracked binding.
    fn binding_value(&mut self, name: &str) -> Result<Value>;
}

/// A queued follow-up execution.
pub enum Execution {
    Code(String),
    Callback(Box<dyn FnOnce(&mut dyn KernelHost) -> Result<()> + Send>),
}

impl Execution {
    pub fn code(code: impl Into<String>) -> Self {
        Execution::Code(code.into())
    }

    pub fn callback(f: impl FnOnce(&mut dyn KernelHost) -> Result<()> + Send + 'static) -> Self {
        Execution::Callback(Box::new(f))
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Execution::Code(code) => f.debug_tuple("Code").field(code).finish(),
            Execution::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Rewrites snippet text before evaluation.
pub trait CodePreprocessor: Send + Sync {
    fn accepts(&self, _code: &str) -> bool {
        true
    }

    fn process(&self, code: &str, host: &mut dyn KernelHost) -> Result<String>;
}

/// Turns a value into a display artifact.
pub trait Renderer: Send + Sync {
    fn accepts(&self, value: &Value) -> bool;

    /// `binding` names the variable holding the value, when there is one.
    fn render(
        &self,
        host: &mut dyn KernelHost,
        value: &Value,
        binding: Option<&str>,
    ) -> Result<DisplayArtifact>;
}

/// Reacts to a newly declared binding, optionally emitting follow-up code.
pub trait ValueHandler: Send + Sync {
    fn accepts(&self, value: &Value) -> bool;

    fn handle(&self, host: &mut dyn KernelHost, name: &str, value: &Value)
    -> Result<Option<String>>;
}

/// Handles types carrying a given annotation.
pub trait ClassAnnotationHandler: Send + Sync {
    fn annotation(&self) -> &str;

    fn handle(&self, host: &mut dyn KernelHost, types: &[DeclaredType]) -> Result<()>;
}

/// Handles file-level annotations of a given name.
pub trait FileAnnotationHandler: Send + Sync {
    fn annotation(&self) -> &str;

    fn handle(&self, host: &mut dyn KernelHost, annotations: &[FileAnnotation]) -> Result<()>;
}

/// Runs before every top-level snippet.
pub trait BeforeExecutionHook: Send + Sync {
    fn before(&self, host: &mut dyn KernelHost) -> Result<()>;
}

/// Runs after every evaluation, with its value.
pub trait AfterExecutionHook: Send + Sync {
    fn accepts(&self, _value: Option<&Value>) -> bool {
        true
    }

    fn after(&self, host: &mut dyn KernelHost, value: Option<&Value>) -> Result<()>;
}

/// Runs when the session shuts down.
pub trait ShutdownHook: Send + Sync {
    fn shutdown(&self, host: &mut dyn KernelHost) -> Result<Option<Value>>;
}

/// [`BeforeExecutionHook`] backed by a closure.
pub struct BeforeFn<F>(pub F);

impl<F> BeforeExecutionHook for BeforeFn<F>
where
    F: Fn(&mut dyn KernelHost) -> Result<()> + Send + Sync,
{
    fn before(&self, host: &mut dyn KernelHost) -> Result<()> {
        (self.0)(host)
    }
}

/// [`AfterExecutionHook`] backed by a closure, accepting every value.
pub struct AfterFn<F>(pub F);

impl<F> AfterExecutionHook for AfterFn<F>
where
    F: Fn(&mut dyn KernelHost, Option<&Value>) -> Result<()> + Send + Sync,
{
    fn after(&self, host: &mut dyn KernelHost, value: Option<&Value>) -> Result<()> {
        (self.0)(host, value)
    }
}

/// [`ShutdownHook`] backed by a closure.
pub struct ShutdownFn<F>(pub F);

impl<F> ShutdownHook for ShutdownFn<F>
where
    F: Fn(&mut dyn KernelHost) -> Result<Option<Value>> + Send + Sync,
{
    fn shutdown(&self, host: &mut dyn KernelHost) -> Result<Option<Value>> {
        (self.0)(host)
    }
}

/// Renderer declared in a library descriptor: runs a code template for
/// values of one type and displays what the template evaluates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRenderer {
    type_name: String,
    template: String,
}

impl CodeRenderer {
    pub fn new(type_name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            template: template.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl Renderer for CodeRenderer {
    fn accepts(&self, value: &Value) -> bool {
        value.type_name() == self.type_name
    }

    fn render(
        &self,
        host: &mut dyn KernelHost,
        value: &Value,
        binding: Option<&str>,
    ) -> Result<DisplayArtifact> {
        let binding = binding.ok_or_else(|| {
            Error::Handler(format!(
                "cannot render {} without a binding name",
                value.type_name()
            ))
        })?;
        let code = self.template.replace(IT_PLACEHOLDER, binding);
        let result = host.execute(&code)?;
        Ok(result
            .display
            .or_else(|| result.value.as_ref().and_then(DisplayArtifact::for_value))
            .unwrap_or_else(|| DisplayArtifact::text(value.to_string())))
    }
}
