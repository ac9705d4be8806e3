//! Resolved library contents.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::library::descriptor::LibraryDescriptor;
use crate::session::extensions::{
    AfterExecutionHook, BeforeExecutionHook, ClassAnnotationHandler, CodePreprocessor,
    FileAnnotationHandler, Renderer, ShutdownHook, ValueHandler,
};

/// Kind of a resource bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Js,
    Css,
    Html,
}

/// A script, stylesheet or HTML fragment displayed when a library activates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    pub content: String,
}

impl Resource {
    /// HTML fragment that loads this resource.
    pub fn to_html(&self) -> String {
        match self.kind {
            ResourceKind::Js => format!(
                "<script type=\"text/javascript\" data-library=\"{}\">\n{}\n</script>",
                self.name, self.content
            ),
            ResourceKind::Css => format!(
                "<style data-library=\"{}\">\n{}\n</style>",
                self.name, self.content
            ),
            ResourceKind::Html => self.content.clone(),
        }
    }
}

/// Extension handlers contributed by a library, each with its priority.
#[derive(Clone, Default)]
pub struct Extensions {
    pub preprocessors: Vec<(Arc<dyn CodePreprocessor>, i32)>,
    pub renderers: Vec<(Arc<dyn Renderer>, i32)>,
    pub value_handlers: Vec<(Arc<dyn ValueHandler>, i32)>,
    pub class_annotations: Vec<(Arc<dyn ClassAnnotationHandler>, i32)>,
    pub file_annotations: Vec<(Arc<dyn FileAnnotationHandler>, i32)>,
    pub before_hooks: Vec<(Arc<dyn BeforeExecutionHook>, i32)>,
    pub after_hooks: Vec<(Arc<dyn AfterExecutionHook>, i32)>,
    pub shutdown_hooks: Vec<(Arc<dyn ShutdownHook>, i32)>,
}

impl Extensions {
    /// Total number of handlers.
    pub fn len(&self) -> usize {
        self.preprocessors.len()
            + self.renderers.len()
            + self.value_handlers.len()
            + self.class_annotations.len()
            + self.file_annotations.len()
            + self.before_hooks.len()
            + self.after_hooks.len()
            + self.shutdown_hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("preprocessors", &self.preprocessors.len())
            .field("renderers", &self.renderers.len())
            .field("value_handlers", &self.value_handlers.len())
            .field("class_annotations", &self.class_annotations.len())
            .field("file_annotations", &self.file_annotations.len())
            .field("before_hooks", &self.before_hooks.len())
            .field("after_hooks", &self.after_hooks.len())
            .field("shutdown_hooks", &self.shutdown_hooks.len())
            .finish()
    }
}

fn same_handlers<T: ?Sized>(a: &[(Arc<T>, i32)], b: &[(Arc<T>, i32)]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|((x, px), (y, py))| Arc::ptr_eq(x, y) && px == py)
}

impl PartialEq for Extensions {
    fn eq(&self, other: &Self) -> bool {
        same_handlers(&self.preprocessors, &other.preprocessors)
            && same_handlers(&self.renderers, &other.renderers)
            && same_handlers(&self.value_handlers, &other.value_handlers)
            && same_handlers(&self.class_annotations, &other.class_annotations)
            && same_handlers(&self.file_annotations, &other.file_annotations)
            && same_handlers(&self.before_hooks, &other.before_hooks)
            && same_handlers(&self.after_hooks, &other.after_hooks)
            && same_handlers(&self.shutdown_hooks, &other.shutdown_hooks)
    }
}

/// Everything a library contributes to a session.
///
/// Definitions come either from a descriptor (see
/// [`LibraryDescriptor::into_definition`]) or are built in code with the
/// `with_*` methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Opaque dependency declarations handed to the evaluator.
    pub dependencies: Vec<String>,
    pub repositories: Vec<String>,
    pub imports: Vec<String>,
    /// Snippets run once when the library activates.
    pub init: Vec<String>,
    /// Snippets run before every top-level snippet.
    pub init_cell: Vec<String>,
    /// Snippets run when the session shuts down.
    pub shutdown: Vec<String>,
    /// `(type name, code template)` pairs; `$it` names the rendered value.
    pub code_renderers: Vec<(String, String)>,
    pub resources: Vec<Resource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_kernel_version: Option<String>,
    /// Bound parameter values, visible through the execution frame.
    pub options: BTreeMap<String, String>,
    #[serde(skip)]
    pub extensions: Extensions,
    #[serde(skip)]
    pub descriptor: Option<LibraryDescriptor>,
}

impl LibraryDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_import(mut self, import: impl Into<String>) -> Self {
        self.imports.push(import.into());
        self
    }

    pub fn with_init(mut self, code: impl Into<String>) -> Self {
        self.init.push(code.into());
        self
    }

    pub fn with_init_cell(mut self, code: impl Into<String>) -> Self {
        self.init_cell.push(code.into());
        self
    }

    pub fn with_shutdown(mut self, code: impl Into<String>) -> Self {
        self.shutdown.push(code.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_preprocessor(mut self, handler: Arc<dyn CodePreprocessor>, priority: i32) -> Self {
        self.extensions.preprocessors.push((handler, priority));
        self
    }

    pub fn with_renderer(mut self, handler: Arc<dyn Renderer>, priority: i32) -> Self {
        self.extensions.renderers.push((handler, priority));
        self
    }

    pub fn with_value_handler(mut self, handler: Arc<dyn ValueHandler>, priority: i32) -> Self {
        self.extensions.value_handlers.push((handler, priority));
        self
    }

    pub fn with_class_annotation(
        mut self,
        handler: Arc<dyn ClassAnnotationHandler>,
        priority: i32,
    ) -> Self {
        self.extensions.class_annotations.push((handler, priority));
        self
    }

    pub fn with_file_annotation(
        mut self,
        handler: Arc<dyn FileAnnotationHandler>,
        priority: i32,
    ) -> Self {
        self.extensions.file_annotations.push((handler, priority));
        self
    }

    pub fn with_before_hook(mut self, hook: Arc<dyn BeforeExecutionHook>, priority: i32) -> Self {
        self.extensions.before_hooks.push((hook, priority));
        self
    }

    pub fn with_after_hook(mut self, hook: Arc<dyn AfterExecutionHook>, priority: i32) -> Self {
        self.extensions.after_hooks.push((hook, priority));
        self
    }

    pub fn with_shutdown_hook(mut self, hook: Arc<dyn ShutdownHook>, priority: i32) -> Self {
        self.extensions.shutdown_hooks.push((hook, priority));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_html() {
        let js = Resource {
            name: "plots".into(),
            kind: ResourceKind::Js,
            content: "init()".into(),
        };
        assert!(js.to_html().starts_with("<script"));
        assert!(js.to_html().contains("init()"));

        let css = Resource {
            kind: ResourceKind::Css,
            ..js.clone()
        };
        assert!(css.to_html().starts_with("<style"));

        let html = Resource {
            kind: ResourceKind::Html,
            content: "<b>hi</b>".into(),
            ..js
        };
        assert_eq!(html.to_html(), "<b>hi</b>");
    }

    #[test]
    fn test_serialized_definition_skips_handlers() {
        let def = LibraryDefinition::new("math")
            .with_dependency("org.math:core:1.0")
            .with_init("val pi = 3");
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["name"], "math");
        assert_eq!(json["dependencies"][0], "org.math:core:1.0");
        assert_eq!(json["initCell"], serde_json::json!([]));
        assert!(json.get("extensions").is_none());
    }
}
