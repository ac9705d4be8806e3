//! The session's handler registries, one per extension point.

use std::sync::Arc;

use crate::library::Extensions;
use crate::registry::{PriorityRegistry, TiePolicy};
use crate::session::extensions::{
    AfterExecutionHook, BeforeExecutionHook, ClassAnnotationHandler, CodePreprocessor,
    FileAnnotationHandler, Renderer, ShutdownHook, ValueHandler,
};

#[derive(Debug, Clone)]
pub struct Registries {
    pub preprocessors: PriorityRegistry<dyn CodePreprocessor>,
    pub renderers: PriorityRegistry<dyn Renderer>,
    pub value_handlers: PriorityRegistry<dyn ValueHandler>,
    pub class_annotations: PriorityRegistry<dyn ClassAnnotationHandler>,
    pub file_annotations: PriorityRegistry<dyn FileAnnotationHandler>,
    pub before_hooks: PriorityRegistry<dyn BeforeExecutionHook>,
    pub after_hooks: PriorityRegistry<dyn AfterExecutionHook>,
    pub shutdown_hooks: PriorityRegistry<dyn ShutdownHook>,
}

impl Default for Registries {
    fn default() -> Self {
        Self::new(TiePolicy::default())
    }
}

impl Registries {
    pub fn new(policy: TiePolicy) -> Self {
        Self {
            preprocessors: PriorityRegistry::new(policy),
            renderers: PriorityRegistry::new(policy),
            value_handlers: PriorityRegistry::new(policy),
            class_annotations: PriorityRegistry::new(policy),
            file_annotations: PriorityRegistry::new(policy),
            before_hooks: PriorityRegistry::new(policy),
            after_hooks: PriorityRegistry::new(policy),
            shutdown_hooks: PriorityRegistry::new(policy),
        }
    }

    /// Register every handler a library contributes.
    pub fn register_extensions(&mut self, extensions: &Extensions, owner: Option<&str>) {
        fn add<T: ?Sized>(
            registry: &mut PriorityRegistry<T>,
            handlers: &[(Arc<T>, i32)],
            owner: Option<&str>,
        ) {
            for (handler, priority) in handlers {
                registry.register_owned(Arc::clone(handler), *priority, owner);
            }
        }

        add(&mut self.preprocessors, &extensions.preprocessors, owner);
        add(&mut self.renderers, &extensions.renderers, owner);
        add(&mut self.value_handlers, &extensions.value_handlers, owner);
        add(&mut self.class_annotations, &extensions.class_annotations, owner);
        add(&mut self.file_annotations, &extensions.file_annotations, owner);
        add(&mut self.before_hooks, &extensions.before_hooks, owner);
        add(&mut self.after_hooks, &extensions.after_hooks, owner);
        add(&mut self.shutdown_hooks, &extensions.shutdown_hooks, owner);
    }
}
