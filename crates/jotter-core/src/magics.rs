//! Line magics.
//!
//! `%use lib1, lib2(arg=1), lib3@ref[v2]` requests libraries for the snippet
//! it appears in. Magic lines are blanked so evaluator diagnostics keep their
//! line numbers.

use crate::error::{Error, Result};
use crate::library::parse_requests;
use crate::session::{CodePreprocessor, KernelHost};

/// Preprocessor for `%use` lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct UseMagic;

impl UseMagic {
    /// Runs before library-provided preprocessors with default priority.
    pub const PRIORITY: i32 = 100;
}

/// Text after `%use` if the line is a `%use` magic.
fn use_arguments(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("%use")?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

impl CodePreprocessor for UseMagic {
    fn accepts(&self, code: &str) -> bool {
        code.lines().any(|line| use_arguments(line).is_some())
    }

    fn process(&self, code: &str, host: &mut dyn KernelHost) -> Result<String> {
        let mut lines = Vec::new();
        for line in code.lines() {
            let Some(arguments) = use_arguments(line) else {
                lines.push(line);
                continue;
            };
            if arguments.is_empty() {
                return Err(Error::InvalidReference(
                    "%use needs at least one library".to_string(),
                ));
            }
            for request in parse_requests(arguments)? {
                host.request_library(request);
            }
            lines.push("");
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::evaluator::{SnippetId, Value};
    use crate::library::LibraryRequest;
    use crate::session::{DisplayArtifact, Execution, SnippetResult};

    #[derive(Default)]
    struct RecordingHost {
        requests: Vec<LibraryRequest>,
    }

    impl KernelHost for RecordingHost {
        fn snippet(&self) -> Option<SnippetId> {
            None
        }

        fn execute(&mut self, _code: &str) -> Result<SnippetResult> {
            Ok(SnippetResult::default())
        }

        fn schedule(&mut self, _execution: Execution) {}

        fn display(&mut self, _artifact: DisplayArtifact) {}

        fn request_library(&mut self, request: LibraryRequest) {
            self.requests.push(request);
        }

        fn library_options(&self) -> BTreeMap<String, String> {
            BTreeMap::new()
        }

        fn binding_value(&mut self, name: &str) -> Result<Value> {
            Err(Error::UnknownBinding(name.to_string()))
        }
    }

    #[test]
    fn test_use_line_is_blanked() {
        let mut host = RecordingHost::default();
        let code = "%use math, bold\nval x = pi";

        assert!(UseMagic.accepts(code));
        let processed = UseMagic.process(code, &mut host).unwrap();

        assert_eq!(processed, "\nval x = pi");
        let names: Vec<&str> = host
            .requests
            .iter()
            .map(|r| r.reference.name.as_str())
            .collect();
        assert_eq!(names, vec!["math", "bold"]);
    }

    #[test]
    fn test_arguments_are_parsed() {
        let mut host = RecordingHost::default();
        UseMagic
            .process("%use math(scale=10)", &mut host)
            .unwrap();
        assert_eq!(host.requests[0].arguments[0].name, "scale");
        assert_eq!(host.requests[0].arguments[0].value, "10");
    }

    #[test]
    fn test_other_lines_untouched() {
        assert!(!UseMagic.accepts("val used = 1\n%useless"));
        assert!(use_arguments("  %use  math ").is_some());
    }

    #[test]
    fn test_empty_use_is_rejected() {
        let mut host = RecordingHost::default();
        let err = UseMagic.process("%use", &mut host).unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
    }
}
