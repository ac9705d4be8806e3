//! The [`KernelHost`] handed to handlers.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::evaluator::{SnippetId, Value};
use crate::frames::FrameId;
use crate::library::LibraryRequest;
use crate::session::Session;
use crate::session::extensions::{Execution, KernelHost};
use crate::session::outcome::{DisplayArtifact, SnippetResult};

/// A session borrowed for the duration of one handler call, positioned at
/// the frame the handler runs in.
pub(crate) struct ExecutionContext<'a> {
    session: &'a mut Session,
    frame: FrameId,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(session: &'a mut Session, frame: FrameId) -> Self {
        Self { session, frame }
    }
}

impl KernelHost for ExecutionContext<'_> {
    fn snippet(&self) -> Option<SnippetId> {
        self.session.run.snippet
    }

    fn execute(&mut self, code: &str) -> Result<SnippetResult> {
        self.session.execute_nested(code, self.frame)
    }

    fn schedule(&mut self, execution: Execution) {
        self.session.run.queue.push_back(execution);
    }

    fn display(&mut self, artifact: DisplayArtifact) {
        self.session.display(artifact);
    }

    fn request_library(&mut self, request: LibraryRequest) {
        tracing::debug!("Library requested: {}", request);
        self.session.run.requests.push(request);
    }

    fn library_options(&self) -> BTreeMap<String, String> {
        self.session.frames.library_options(self.frame)
    }

    fn binding_value(&mut self, name: &str) -> Result<Value> {
        self.session.tracker.value(name)
    }
}
