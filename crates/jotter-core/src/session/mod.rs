//! Session coordinator.
//!
//! A [`Session`] owns the evaluator, the binding tracker, the handler
//! registries and the frame stack, and drives every submitted snippet
//! through the execution pipeline:
//!
//! 1. code preprocessors rewrite the text and request libraries;
//! 2. requested libraries are resolved and activated;
//! 3. the evaluator runs the snippet;
//! 4. new bindings are captured;
//! 5. value handlers, annotation handlers and the renderer run;
//! 6. after-execution hooks run;
//! 7. scheduled follow-up executions are drained in FIFO order.
//!
//! Failures in steps 5 to 7 are recorded on the result instead of failing
//! the snippet. An interrupted snippet leaves no trace in the session.

mod context;
pub mod extensions;
mod host;
pub mod outcome;
mod pipeline;
mod registries;
mod shared;

pub use context::{AbortHandle, ExecutionCallback};
pub use extensions::{
    AfterExecutionHook, AfterFn, BeforeExecutionHook, BeforeFn, ClassAnnotationHandler,
    CodePreprocessor, CodeRenderer, Execution, FileAnnotationHandler, KernelHost, Renderer,
    ShutdownFn, ShutdownHook, ValueHandler,
};
pub use outcome::{
    CollectingSink, DisplayArtifact, DisplaySink, EvaluationResult, ExecuteOptions,
    ExecutionOutcome, ShutdownResult, SnippetResult,
};
pub use registries::Registries;
pub use shared::SharedSession;

pub use crate::evaluator::{Snippet, SnippetId};

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::bindings::{BindingDelta, BindingTracker};
use crate::config::SessionConfig;
use crate::error::{Error, ExtensionPoint, Result};
use crate::evaluator::Evaluator;
use crate::frames::{FrameMark, FrameStack};
use crate::library::{LibraryDefinition, LibraryRequest, ResolverChain};
use crate::magics::UseMagic;

/// Init or shutdown code contributed by a library.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LibraryCode {
    library: String,
    code: String,
}

/// State accumulated while one top-level snippet runs, nested executions
/// included.
#[derive(Debug, Default)]
struct RunState {
    snippet: Option<SnippetId>,
    queue: VecDeque<Execution>,
    requests: Vec<LibraryRequest>,
    displays: Vec<DisplayArtifact>,
    warnings: Vec<String>,
    extension_errors: Vec<Error>,
    added_dependencies: Vec<String>,
    added_imports: Vec<String>,
    /// Binding changes of the snippet and its nested executions, in order.
    bindings: BindingDelta,
}

impl RunState {
    fn new(snippet: SnippetId) -> Self {
        Self {
            snippet: Some(snippet),
            ..Self::default()
        }
    }

    fn finish(self, snippet: SnippetId, result: SnippetResult) -> EvaluationResult {
        EvaluationResult {
            snippet,
            value: result.value,
            result_name: result.result_name,
            display: result.display,
            bindings: self.bindings,
            added_dependencies: self.added_dependencies,
            added_imports: self.added_imports,
            displays: self.displays,
            warnings: self.warnings,
            extension_errors: self.extension_errors,
        }
    }
}

/// Session state saved before a top-level snippet, restored on interrupt.
struct Checkpoint {
    tracker: BindingTracker,
    frames: FrameMark,
    registries: Registries,
    activated: FxHashSet<String>,
    libraries: usize,
    init_cells: usize,
    shutdown_codes: usize,
}

/// An interactive session.
pub struct Session {
    config: SessionConfig,
    evaluator: Box<dyn Evaluator>,
    resolver: Arc<ResolverChain>,
    tracker: BindingTracker,
    frames: FrameStack,
    registries: Registries,
    /// Activation keys of every library activated so far.
    activated: FxHashSet<String>,
    /// Names of activated libraries, in activation order.
    libraries: Vec<String>,
    init_cells: Vec<LibraryCode>,
    shutdown_codes: Vec<LibraryCode>,
    abort: AbortHandle,
    callback: Option<Arc<dyn ExecutionCallback>>,
    sink: Option<Box<dyn DisplaySink>>,
    next_snippet: u64,
    next_nested: u64,
    run: RunState,
    shut_down: bool,
}

impl Session {
    /// Create a session with the built-in `%use` preprocessor registered.
    pub fn new(
        evaluator: impl Evaluator + 'static,
        resolver: Arc<ResolverChain>,
        config: SessionConfig,
    ) -> Self {
        let mut registries = Registries::new(config.tie_policy);
        registries
            .preprocessors
            .register(Arc::new(UseMagic), UseMagic::PRIORITY);

        Self {
            config,
            evaluator: Box::new(evaluator),
            resolver,
            tracker: BindingTracker::new(),
            frames: FrameStack::new(),
            registries,
            activated: FxHashSet::default(),
            libraries: Vec::new(),
            init_cells: Vec::new(),
            shutdown_codes: Vec::new(),
            abort: AbortHandle::new(),
            callback: None,
            sink: None,
            next_snippet: 1,
            next_nested: 1,
            run: RunState::default(),
            shut_down: false,
        }
    }

    /// Report snippet progress to `callback`.
    pub fn with_callback(mut self, callback: Arc<dyn ExecutionCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Forward display artifacts to `sink` as they are produced.
    pub fn with_display_sink(mut self, sink: Box<dyn DisplaySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<ResolverChain> {
        &self.resolver
    }

    pub fn bindings(&self) -> &BindingTracker {
        &self.tracker
    }

    pub fn bindings_mut(&mut self) -> &mut BindingTracker {
        &mut self.tracker
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Registries, for handlers installed outside of any library.
    pub fn registries_mut(&mut self) -> &mut Registries {
        &mut self.registries
    }

    pub fn frames(&self) -> &FrameStack {
        &self.frames
    }

    /// Handle that interrupts the running snippet from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Names of the activated libraries, in activation order.
    pub fn libraries(&self) -> &[String] {
        &self.libraries
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Run one top-level snippet through the whole pipeline.
    ///
    /// Evaluation errors and failures before evaluation are returned as
    /// `Err`. An interrupt yields [`ExecutionOutcome::Interrupted`] with the
    /// session state rolled back to what it was before the call.
    pub fn execute(&mut self, code: &str, options: ExecuteOptions) -> Result<ExecutionOutcome> {
        if self.shut_down {
            return Err(Error::ShutDown);
        }
        let snippet = self.allocate_snippet(options.snippet);
        self.abort.reset();
        let checkpoint = self.checkpoint();
        self.run = RunState::new(snippet);

        if let Some(callback) = &self.callback {
            callback.on_snippet_started(snippet, code);
        }
        tracing::debug!("Executing {}", snippet);

        let result = self.run_top_level(snippet, code, options);
        let run = std::mem::take(&mut self.run);

        match result {
            Ok(result) => {
                self.frames.release(checkpoint.frames);
                let evaluation = run.finish(snippet, result);
                if let Some(callback) = &self.callback {
                    callback.on_snippet_completed(snippet, &evaluation);
                }
                Ok(ExecutionOutcome::Completed(evaluation))
            }
            Err(e) if e.is_interrupted() => {
                self.restore(checkpoint);
                tracing::info!("{} interrupted, session state rolled back", snippet);
                if let Some(callback) = &self.callback {
                    callback.on_snippet_interrupted(snippet);
                }
                Ok(ExecutionOutcome::Interrupted { snippet })
            }
            Err(e) => {
                self.frames.release(checkpoint.frames);
                if let Some(callback) = &self.callback {
                    callback.on_snippet_error(snippet, &e);
                }
                Err(e)
            }
        }
    }

    /// Activate a library built in code, outside of any snippet.
    ///
    /// Returns the artifacts the activation displayed. Activating the same
    /// library name twice is a no-op.
    pub fn activate(&mut self, definition: LibraryDefinition) -> Result<Vec<DisplayArtifact>> {
        let key = format!("code|{}", definition.name);
        if self.activated.contains(&key) {
            tracing::debug!("Library {} is already active", definition.name);
            return Ok(Vec::new());
        }
        self.outside_snippet(|session| {
            let root = session.frames.root();
            session.activate_definition(definition, key, root)
        })
    }

    /// Resolve and activate a library outside of any snippet.
    pub fn request_library(&mut self, request: LibraryRequest) -> Result<Vec<DisplayArtifact>> {
        self.outside_snippet(|session| {
            let root = session.frames.root();
            session.activate_request(&request, root)
        })
    }

    /// Run shutdown code and hooks of every active library, once.
    ///
    /// Every shutdown step runs even if earlier ones fail.
    pub fn shutdown(&mut self) -> Vec<ShutdownResult> {
        if self.shut_down {
            return Vec::new();
        }
        self.shut_down = true;
        self.run = RunState::default();
        let root = self.frames.root();
        let mut results = Vec::new();

        for LibraryCode { library, code } in std::mem::take(&mut self.shutdown_codes) {
            let outcome = self
                .execute_nested(&code, root)
                .map(|result| result.value)
                .map_err(|e| e.in_extension(ExtensionPoint::Shutdown, Some(&library), None));
            if let Err(e) = &outcome {
                tracing::warn!("{}", e);
            }
            results.push(ShutdownResult {
                library: Some(library),
                outcome,
            });
        }

        for (hook, owner) in self.registries.shutdown_hooks.snapshot_owned() {
            let outcome = hook
                .shutdown(&mut self.host(root))
                .map_err(|e| e.in_extension(ExtensionPoint::Shutdown, owner.as_deref(), None));
            if let Err(e) = &outcome {
                tracing::warn!("{}", e);
            }
            results.push(ShutdownResult {
                library: owner.map(|o| o.to_string()),
                outcome,
            });
        }

        self.run = RunState::default();
        tracing::info!("Session shut down ({} shutdown steps)", results.len());
        results
    }

    fn outside_snippet(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<Vec<DisplayArtifact>> {
        if self.shut_down {
            return Err(Error::ShutDown);
        }
        self.run = RunState::default();
        let root = self.frames.root();
        let result = f(self).and_then(|()| self.drain_queue(root));
        let run = std::mem::take(&mut self.run);
        for error in &run.extension_errors {
            tracing::warn!("{}", error);
        }
        result.map(|()| run.displays)
    }

    fn allocate_snippet(&mut self, requested: Option<SnippetId>) -> SnippetId {
        match requested {
            Some(id) => {
                self.next_snippet = self.next_snippet.max(id.as_u64() + 1);
                id
            }
            None => {
                let id = SnippetId::new(self.next_snippet);
                self.next_snippet += 1;
                id
            }
        }
    }

    fn allocate_nested(&mut self) -> SnippetId {
        let id = SnippetId::nested(self.next_nested);
        self.next_nested += 1;
        id
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            tracker: self.tracker.clone(),
            frames: self.frames.mark(),
            registries: self.registries.clone(),
            activated: self.activated.clone(),
            libraries: self.libraries.len(),
            init_cells: self.init_cells.len(),
            shutdown_codes: self.shutdown_codes.len(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.tracker = checkpoint.tracker;
        self.frames.rollback(checkpoint.frames);
        self.registries = checkpoint.registries;
        self.activated = checkpoint.activated;
        self.libraries.truncate(checkpoint.libraries);
        self.init_cells.truncate(checkpoint.init_cells);
        self.shutdown_codes.truncate(checkpoint.shutdown_codes);
    }

    fn display(&mut self, artifact: DisplayArtifact) {
        if let Some(sink) = self.sink.as_mut() {
            sink.display(&artifact);
        }
        self.run.displays.push(artifact);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("next_snippet", &self.next_snippet)
            .field("next_nested", &self.next_nested)
            .field("libraries", &self.libraries)
            .field("bindings", &self.tracker.len())
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}
