//! The execution pipeline behind [`Session::execute`].

use std::sync::Arc;

use crate::bindings::BindingDelta;
use crate::error::{Error, ExtensionPoint, Result};
use crate::evaluator::{DeclaredType, Declarations, EvalFailure, EvalOutput, Snippet, SnippetId, Value};
use crate::frames::{ActiveLibrary, FrameId};
use crate::library::{LibraryDefinition, LibraryRequest, Variable};
use crate::session::extensions::{CodeRenderer, Execution, ValueHandler};
use crate::session::host::ExecutionContext;
use crate::session::outcome::{DisplayArtifact, ExecuteOptions, SnippetResult};
use crate::session::{LibraryCode, Session};

/// Nested executions deeper than this fail instead of recursing.
pub(crate) const MAX_NESTING_DEPTH: usize = 32;

/// Priority of renderers declared as code templates in descriptors.
const CODE_RENDERER_PRIORITY: i32 = 0;

impl Session {
    pub(super) fn host(&mut self, frame: FrameId) -> ExecutionContext<'_> {
        ExecutionContext::new(self, frame)
    }

    pub(super) fn run_top_level(
        &mut self,
        snippet: SnippetId,
        code: &str,
        options: ExecuteOptions,
    ) -> Result<SnippetResult> {
        let root = self.frames.root();
        self.run_before_snippet(snippet, root)?;
        let result = self.run_code(snippet, code, root, options, true)?;
        self.drain_queue(root)?;
        // Requests made by hooks after the preprocessors ran
        self.activate_requests(root)?;
        Ok(result)
    }

    /// Per-snippet library init code, then before-execution hooks.
    fn run_before_snippet(&mut self, snippet: SnippetId, frame: FrameId) -> Result<()> {
        for LibraryCode { library, code } in self.init_cells.clone() {
            self.execute_nested(&code, frame).map_err(|e| {
                e.in_extension(ExtensionPoint::BeforeSnippet, Some(&library), Some(snippet))
            })?;
        }
        for (hook, owner) in self.registries.before_hooks.snapshot_owned() {
            hook.before(&mut self.host(frame)).map_err(|e| {
                e.in_extension(ExtensionPoint::BeforeSnippet, owner.as_deref(), Some(snippet))
            })?;
        }
        Ok(())
    }

    /// Run code on behalf of a handler or library, in a child of `parent`.
    pub(crate) fn execute_nested(&mut self, code: &str, parent: FrameId) -> Result<SnippetResult> {
        let depth = self.frames.depth(parent);
        if depth >= MAX_NESTING_DEPTH {
            return Err(Error::Handler(format!(
                "nested executions exceed the maximum depth of {}",
                MAX_NESTING_DEPTH
            )));
        }

        let mark = self.frames.mark();
        let frame = self.frames.push(parent);
        let snippet = self.allocate_nested();
        tracing::debug!(depth = depth + 1, "Executing nested {}", snippet);

        let result = self.run_code(snippet, code, frame, ExecuteOptions::nested(), false);
        self.frames.release(mark);
        result
    }

    fn run_code(
        &mut self,
        snippet: SnippetId,
        code: &str,
        frame: FrameId,
        options: ExecuteOptions,
        top_level: bool,
    ) -> Result<SnippetResult> {
        let code = if options.process_magics {
            self.preprocess(snippet, code, frame)?
        } else {
            code.to_string()
        };
        self.activate_requests(frame)?;

        if self.abort.is_aborted() {
            return Err(Error::Interrupted);
        }
        let output = match self
            .evaluator
            .evaluate(&Snippet::new(snippet, code), &self.abort)
        {
            Ok(output) => output,
            Err(EvalFailure::Interrupted) => return Err(Error::Interrupted),
            Err(EvalFailure::Diagnostics(diagnostics)) => {
                return Err(Error::Evaluation {
                    snippet,
                    diagnostics,
                });
            }
        };
        self.run.added_imports.extend(output.imports.iter().cloned());

        let bindings = if options.track_bindings && self.config.track_bindings {
            self.tracker.update(snippet, &output.properties)
        } else {
            BindingDelta::default()
        };
        self.run.bindings.merge(bindings.clone());

        if options.track_bindings && top_level {
            self.run_value_handlers(snippet, frame, &output)?;
        }
        self.run_annotation_handlers(snippet, frame, &output)?;
        let display = self.render(snippet, frame, &output)?;
        if top_level {
            self.run_after_hooks(snippet, frame, output.value.as_ref())?;
        }

        Ok(SnippetResult {
            snippet: Some(snippet),
            value: output.value,
            result_name: output.result_name,
            display,
            bindings,
        })
    }

    fn preprocess(&mut self, snippet: SnippetId, code: &str, frame: FrameId) -> Result<String> {
        let mut code = code.to_string();
        for (preprocessor, owner) in self.registries.preprocessors.snapshot_owned() {
            if !preprocessor.accepts(&code) {
                continue;
            }
            code = preprocessor
                .process(&code, &mut self.host(frame))
                .map_err(|e| {
                    e.in_extension(ExtensionPoint::Preprocessor, owner.as_deref(), Some(snippet))
                })?;
        }
        Ok(code)
    }

    /// Record a failed post-evaluation step without failing the snippet.
    ///
    /// Interrupts are passed through.
    fn isolate(
        &mut self,
        result: Result<()>,
        point: ExtensionPoint,
        library: Option<&str>,
        snippet: SnippetId,
    ) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_interrupted() => Err(Error::Interrupted),
            Err(e) => {
                let e = e.in_extension(point, library, Some(snippet));
                tracing::warn!("{}", e);
                self.run.extension_errors.push(e);
                Ok(())
            }
        }
    }

    fn run_value_handlers(
        &mut self,
        snippet: SnippetId,
        frame: FrameId,
        output: &EvalOutput,
    ) -> Result<()> {
        let declared = output
            .properties
            .iter()
            .filter(|p| !p.mutable && output.result_name.as_deref() != Some(p.name.as_str()));

        for property in declared {
            let value = match property.source.read() {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!("Skipping value handlers for {}: {}", property.name, e);
                    continue;
                }
            };
            let Some((handler, owner)) = self
                .registries
                .value_handlers
                .first_accepting_owned(|h| h.accepts(&value))
            else {
                continue;
            };
            let result = self.handle_value(handler.as_ref(), &property.name, &value, frame);
            self.isolate(result, ExtensionPoint::ValueHandler, owner.as_deref(), snippet)?;
        }
        Ok(())
    }

    fn handle_value(
        &mut self,
        handler: &dyn ValueHandler,
        name: &str,
        value: &Value,
        frame: FrameId,
    ) -> Result<()> {
        if let Some(code) = handler.handle(&mut self.host(frame), name, value)? {
            self.execute_nested(&code, frame)?;
        }
        Ok(())
    }

    fn run_annotation_handlers(
        &mut self,
        snippet: SnippetId,
        frame: FrameId,
        output: &EvalOutput,
    ) -> Result<()> {
        if !output.declared_types.is_empty() {
            for (handler, owner) in self.registries.class_annotations.snapshot_owned() {
                let types: Vec<DeclaredType> = output
                    .declared_types
                    .iter()
                    .filter(|t| t.annotations.iter().any(|a| a == handler.annotation()))
                    .cloned()
                    .collect();
                if types.is_empty() {
                    continue;
                }
                let result = handler.handle(&mut self.host(frame), &types);
                self.isolate(result, ExtensionPoint::Annotation, owner.as_deref(), snippet)?;
            }
        }

        if !output.file_annotations.is_empty() {
            for (handler, owner) in self.registries.file_annotations.snapshot_owned() {
                let annotations: Vec<_> = output
                    .file_annotations
                    .iter()
                    .filter(|a| a.name == handler.annotation())
                    .cloned()
                    .collect();
                if annotations.is_empty() {
                    continue;
                }
                let result = handler.handle(&mut self.host(frame), &annotations);
                self.isolate(result, ExtensionPoint::Annotation, owner.as_deref(), snippet)?;
            }
        }
        Ok(())
    }

    /// Render the value with the first accepting renderer, falling back to
    /// its plain form.
    fn render(
        &mut self,
        snippet: SnippetId,
        frame: FrameId,
        output: &EvalOutput,
    ) -> Result<Option<DisplayArtifact>> {
        let Some(value) = output.value.as_ref() else {
            return Ok(None);
        };
        if value.is_unit() {
            return Ok(None);
        }
        let Some((renderer, owner)) = self
            .registries
            .renderers
            .first_accepting_owned(|r| r.accepts(value))
        else {
            return Ok(DisplayArtifact::for_value(value));
        };

        match renderer.render(&mut self.host(frame), value, output.result_name.as_deref()) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) => {
                self.isolate(Err(e), ExtensionPoint::Renderer, owner.as_deref(), snippet)?;
                Ok(DisplayArtifact::for_value(value))
            }
        }
    }

    fn run_after_hooks(
        &mut self,
        snippet: SnippetId,
        frame: FrameId,
        value: Option<&Value>,
    ) -> Result<()> {
        for (hook, owner) in self.registries.after_hooks.snapshot_owned() {
            if !hook.accepts(value) {
                continue;
            }
            let result = hook.after(&mut self.host(frame), value);
            self.isolate(result, ExtensionPoint::AfterSnippet, owner.as_deref(), snippet)?;
        }
        Ok(())
    }

    /// Run queued executions until the queue is empty, including those
    /// queued while draining.
    pub(super) fn drain_queue(&mut self, frame: FrameId) -> Result<()> {
        while let Some(execution) = self.run.queue.pop_front() {
            if self.abort.is_aborted() {
                return Err(Error::Interrupted);
            }
            let result = match execution {
                Execution::Code(code) => self.execute_nested(&code, frame).map(|_| ()),
                Execution::Callback(callback) => callback(&mut self.host(frame)),
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_interrupted() => return Err(Error::Interrupted),
                Err(e) => {
                    let e = e.in_extension(ExtensionPoint::Scheduled, None, self.run.snippet);
                    tracing::warn!("{}", e);
                    self.run.extension_errors.push(e);
                }
            }
        }
        Ok(())
    }

    fn activate_requests(&mut self, frame: FrameId) -> Result<()> {
        for request in std::mem::take(&mut self.run.requests) {
            self.activate_request(&request, frame)?;
        }
        Ok(())
    }

    /// Resolve and activate one request unless the same reference and
    /// arguments are already active.
    pub(super) fn activate_request(&mut self, request: &LibraryRequest, frame: FrameId) -> Result<()> {
        let (reference, mut warnings) = self.resolver.canonicalize(&request.reference);
        let key = activation_key(&reference.key(), &request.arguments);

        if self.activated.contains(&key) || self.frames.is_active(frame, &key) {
            tracing::debug!("Library {} is already active", reference);
            self.run.warnings.extend(warnings);
            return Ok(());
        }

        let resolved = self
            .resolver
            .resolve_canonical(&reference, request, &mut warnings);
        self.run.warnings.extend(warnings);
        let (definition, origin) = resolved?;
        tracing::info!("Resolved library {} from {}", reference, origin);

        self.activate_definition(definition, key, frame)
    }

    pub(super) fn activate_definition(
        &mut self,
        definition: LibraryDefinition,
        key: String,
        frame: FrameId,
    ) -> Result<()> {
        let snippet = self.run.snippet;
        let name = definition.name.clone();

        if let Some(required) = &definition.min_kernel_version {
            if !version_at_least(&self.config.kernel_version, required) {
                return Err(Error::KernelVersion {
                    library: name,
                    required: required.clone(),
                    current: self.config.kernel_version.clone(),
                });
            }
        }

        let declarations = Declarations {
            dependencies: definition.dependencies.clone(),
            repositories: definition.repositories.clone(),
            imports: definition.imports.clone(),
        };
        if !declarations.is_empty() {
            self.evaluator
                .declare(&declarations)
                .map_err(|e| e.in_extension(ExtensionPoint::Activation, Some(&name), snippet))?;
            self.run.added_dependencies.extend(declarations.dependencies);
            self.run.added_imports.extend(declarations.imports);
        }

        // Active before init runs, so init code requesting it again is a no-op
        self.activated.insert(key.clone());
        self.frames.add_library(
            frame,
            ActiveLibrary {
                key,
                name: name.clone(),
                options: definition.options.clone(),
            },
        );

        for code in &definition.init {
            self.execute_nested(code, frame)
                .map_err(|e| e.in_extension(ExtensionPoint::Activation, Some(&name), snippet))?;
        }

        for code in &definition.init_cell {
            push_unique(&mut self.init_cells, &name, code);
        }
        for code in &definition.shutdown {
            push_unique(&mut self.shutdown_codes, &name, code);
        }

        self.registries
            .register_extensions(&definition.extensions, Some(&name));
        for (type_name, template) in &definition.code_renderers {
            self.registries.renderers.register_owned(
                Arc::new(CodeRenderer::new(type_name.clone(), template.clone())),
                CODE_RENDERER_PRIORITY,
                Some(&name),
            );
        }

        for resource in &definition.resources {
            self.display(DisplayArtifact::html(resource.to_html()));
        }

        tracing::info!("Activated library {}", name);
        self.libraries.push(name);
        Ok(())
    }
}

/// Identity of an activation: canonical reference plus call-site arguments.
fn activation_key(reference_key: &str, arguments: &[Variable]) -> String {
    let arguments: Vec<String> = arguments
        .iter()
        .map(|a| format!("{}={}", a.name, a.value))
        .collect();
    format!("{}({})", reference_key, arguments.join(","))
}

fn push_unique(codes: &mut Vec<LibraryCode>, library: &str, code: &str) {
    if !codes.iter().any(|c| c.code == code) {
        codes.push(LibraryCode {
            library: library.to_string(),
            code: code.to_string(),
        });
    }
}

/// Compare dotted versions numerically; missing or non-numeric parts count
/// as zero.
pub(crate) fn version_at_least(current: &str, required: &str) -> bool {
    fn parts(version: &str) -> Vec<u64> {
        version
            .trim()
            .split(['.', '-'])
            .map(|p| p.parse().unwrap_or(0))
            .collect()
    }

    let (mut current, mut required) = (parts(current), parts(required));
    let len = current.len().max(required.len());
    current.resize(len, 0);
    required.resize(len, 0);
    current >= required
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_at_least() {
        assert!(version_at_least("0.3.0", "0.3"));
        assert!(version_at_least("1.0.0", "0.9.12"));
        assert!(!version_at_least("0.3.0", "0.10.0"));
        assert!(version_at_least("0.3.0-dev", "0.3.0"));
    }

    #[test]
    fn test_activation_key_includes_arguments() {
        let plain = activation_key("ref-main|plots", &[]);
        let with_args = activation_key("ref-main|plots", &[Variable::named("v", "2")]);
        assert_ne!(plain, with_args);
        assert_eq!(with_args, "ref-main|plots(v=2)");
    }

    #[test]
    fn test_push_unique() {
        let mut codes = Vec::new();
        push_unique(&mut codes, "a", "tick()");
        push_unique(&mut codes, "b", "tick()");
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].library, "a");
    }
}
