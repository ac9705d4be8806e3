//! Jotter Core - Interactive notebook kernel engine
//!
//! This crate provides the core functionality for Jotter notebooks:
//! - Session coordination: the snippet execution pipeline and its hooks
//! - Library resolution: references, descriptors, pinning and caching
//! - Binding tracking: lazily refreshed views of evaluator state
//! - Priority registries for every extension point
//! - Execution frames scoping library options to nested executions
//!
//! The language itself is pluggable through [`Evaluator`]; [`calc`] is a
//! small reference language used by the CLI.

pub mod bindings;
pub mod calc;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod frames;
pub mod library;
pub mod magics;
pub mod paths;
pub mod registry;
pub mod session;

pub use bindings::{Binding, BindingDelta, BindingTracker};
pub use calc::CalcEvaluator;
pub use config::SessionConfig;
pub use error::{Error, ExtensionPoint, Result};
pub use evaluator::{Diagnostic, EvalFailure, EvalOutput, Evaluator, Snippet, SnippetId, Value};
pub use frames::{FrameId, FrameStack};
pub use library::{LibraryDefinition, LibraryReference, LibraryRequest, ResolverChain};
pub use paths::KernelDirs;
pub use registry::{PriorityRegistry, TiePolicy};
pub use session::{
    AbortHandle, DisplayArtifact, EvaluationResult, ExecuteOptions, ExecutionOutcome, KernelHost,
    Session, SharedSession,
};
