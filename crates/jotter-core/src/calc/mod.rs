//! A small line-oriented expression language implementing [`Evaluator`].
//!
//! `calc` is the evaluator the CLI runs notebooks with, and what the
//! session's tests exercise the pipeline against. It supports immutable
//! (`val`), mutable (`var`) and lazy (`lazy val`) bindings, imports, type
//! and file annotations, integer arithmetic, string concatenation and a few
//! builtins (`str`, `len`, `html`, `force`, `sleep`).
//!
//! The value of a trailing expression is stored in `res<N>`, `N` being the
//! snippet number.

mod interp;
mod syntax;

use crate::error::Result;
use crate::evaluator::{
    DeclaredType, Declarations, Diagnostic, EvalFailure, EvalOutput, Evaluator, FileAnnotation,
    Property, Snippet, Value, ValueSource,
};
use crate::session::AbortHandle;

use interp::{BindingCell, Fault, Interp, State};
use syntax::{Stmt, parse};

/// Evaluator for the calc language.
#[derive(Debug, Default)]
pub struct CalcEvaluator {
    state: State,
}

impl CalcEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dependencies declared by activated libraries, in order.
    pub fn dependencies(&self) -> &[String] {
        &self.state.dependencies
    }

    /// Imports from libraries and snippets, in order.
    pub fn imports(&self) -> &[String] {
        &self.state.imports
    }

    /// Current value of a binding, if it is realized.
    pub fn value(&self, name: &str) -> Option<Value> {
        self.state.slots.get(name).and_then(|slot| slot.cell.read().ok())
    }

    /// Names of all bindings, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.state.slots.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Evaluator for CalcEvaluator {
    fn declare(&mut self, declarations: &Declarations) -> Result<()> {
        for dependency in &declarations.dependencies {
            tracing::debug!("Declared dependency {}", dependency);
        }
        self.state
            .dependencies
            .extend(declarations.dependencies.iter().cloned());
        self.state
            .repositories
            .extend(declarations.repositories.iter().cloned());
        for import in &declarations.imports {
            if !self.state.imports.contains(import) {
                self.state.imports.push(import.clone());
            }
        }
        Ok(())
    }

    fn evaluate(
        &mut self,
        snippet: &Snippet,
        abort: &AbortHandle,
    ) -> std::result::Result<EvalOutput, EvalFailure> {
        let statements = parse(&snippet.code).map_err(EvalFailure::Diagnostics)?;

        let mut staged = self.state.clone();
        let mut output = EvalOutput::default();
        // Declared or assigned names, in order, without repeats
        let mut touched: Vec<String> = Vec::new();
        let mut last = None;

        for statement in statements {
            if abort.is_aborted() {
                return Err(EvalFailure::Interrupted);
            }
            last = None;
            let mut interp = Interp {
                state: &mut staged,
                abort,
            };

            match statement {
                Stmt::Val {
                    name,
                    expr,
                    lazy: false,
                } => {
                    let value = interp.eval(&expr).map_err(into_failure)?;
                    staged.bind(&name, BindingCell::ready(&name, value), false);
                    touch(&mut touched, name);
                }
                Stmt::Val {
                    name,
                    expr,
                    lazy: true,
                } => {
                    staged.bind(&name, BindingCell::pending(&name, expr), false);
                    touch(&mut touched, name);
                }
                Stmt::Var { name, expr } => {
                    let value = interp.eval(&expr).map_err(into_failure)?;
                    staged.bind(&name, BindingCell::ready(&name, value), true);
                    touch(&mut touched, name);
                }
                Stmt::Assign { name, expr, pos } => {
                    match staged.slots.get(&name) {
                        None => {
                            return Err(failure(pos.error(format!("unknown name '{}'", name))));
                        }
                        Some(slot) if !slot.mutable => {
                            return Err(failure(
                                pos.error(format!("val '{}' cannot be reassigned", name)),
                            ));
                        }
                        Some(_) => {}
                    }
                    let value = Interp {
                        state: &mut staged,
                        abort,
                    }
                    .eval(&expr)
                    .map_err(into_failure)?;
                    staged.bind(&name, BindingCell::ready(&name, value), true);
                    touch(&mut touched, name);
                }
                Stmt::Import(path) => {
                    if !staged.imports.contains(&path) {
                        staged.imports.push(path.clone());
                    }
                    output.imports.push(path);
                }
                Stmt::Class { name, annotations } => {
                    staged.types.insert(name.clone());
                    output
                        .declared_types
                        .push(DeclaredType { name, annotations });
                }
                Stmt::FileAnnotation(name) => {
                    output.file_annotations.push(FileAnnotation { name });
                }
                Stmt::Expr(expr) => {
                    last = Some(interp.eval(&expr).map_err(into_failure)?);
                }
            }
        }

        if let Some(value) = last {
            if !value.is_unit() {
                let name = snippet.id.result_name();
                staged.bind(&name, BindingCell::ready(&name, value.clone()), false);
                touch(&mut touched, name.clone());
                output.result_name = Some(name);
            }
            output.value = Some(value);
        }

        output.properties = touched
            .iter()
            .filter_map(|name| {
                staged.slots.get(name).map(|slot| Property {
                    name: name.clone(),
                    mutable: slot.mutable,
                    source: slot.cell.clone(),
                })
            })
            .collect();

        self.state = staged;
        Ok(output)
    }
}

fn touch(touched: &mut Vec<String>, name: String) {
    touched.retain(|n| *n != name);
    touched.push(name);
}

fn failure(diagnostic: Diagnostic) -> EvalFailure {
    EvalFailure::Diagnostics(vec![diagnostic])
}

fn into_failure(fault: Fault) -> EvalFailure {
    match fault {
        Fault::Diagnostic(diagnostic) => failure(diagnostic),
        Fault::Interrupted => EvalFailure::Interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::SnippetId;

    fn run(
        evaluator: &mut CalcEvaluator,
        id: u64,
        code: &str,
    ) -> std::result::Result<EvalOutput, EvalFailure> {
        evaluator.evaluate(&Snippet::new(SnippetId::new(id), code), &AbortHandle::new())
    }

    #[test]
    fn test_result_binding() {
        let mut evaluator = CalcEvaluator::new();
        let output = run(&mut evaluator, 1, "val x = 1").unwrap();
        assert!(output.value.is_none());
        assert_eq!(output.properties.len(), 1);

        let output = run(&mut evaluator, 2, "x + 1").unwrap();
        assert_eq!(output.value, Some(Value::Int(2)));
        assert_eq!(output.result_name.as_deref(), Some("res2"));
        assert_eq!(evaluator.value("res2"), Some(Value::Int(2)));
    }

    #[test]
    fn test_nested_result_does_not_shadow_top_level() {
        let mut evaluator = CalcEvaluator::new();
        run(&mut evaluator, 1, "10").unwrap();
        let nested = evaluator
            .evaluate(&Snippet::new(SnippetId::nested(1), "20"), &AbortHandle::new())
            .unwrap();

        assert_eq!(nested.result_name.as_deref(), Some("nested_res1"));
        assert_eq!(evaluator.value("res1"), Some(Value::Int(10)));
    }

    #[test]
    fn test_failed_snippet_commits_nothing() {
        let mut evaluator = CalcEvaluator::new();
        let failure = run(&mut evaluator, 1, "val a = 1\nval b = missing + 1").unwrap_err();

        let EvalFailure::Diagnostics(diagnostics) = failure else {
            panic!("expected diagnostics");
        };
        assert_eq!(diagnostics[0].line, 2);
        assert_eq!(diagnostics[0].column, 9);
        assert!(evaluator.value("a").is_none());
    }

    #[test]
    fn test_interrupt_commits_nothing() {
        let mut evaluator = CalcEvaluator::new();
        let abort = AbortHandle::new();
        abort.abort();
        let result = evaluator.evaluate(&Snippet::new(SnippetId::new(1), "val a = 1"), &abort);
        assert_eq!(result.unwrap_err(), EvalFailure::Interrupted);
        assert!(evaluator.names().is_empty());
    }

    #[test]
    fn test_var_and_val_rules() {
        let mut evaluator = CalcEvaluator::new();
        run(&mut evaluator, 1, "var n = 1\nval k = 2").unwrap();

        let output = run(&mut evaluator, 2, "n = n + 1").unwrap();
        assert!(output.properties[0].mutable);
        assert_eq!(evaluator.value("n"), Some(Value::Int(2)));

        assert!(run(&mut evaluator, 3, "k = 3").is_err());
    }

    #[test]
    fn test_declarations_reach_output() {
        let mut evaluator = CalcEvaluator::new();
        let output = run(
            &mut evaluator,
            1,
            "import text.format\n@file:Experimental\n@Table class Row\nRow()",
        )
        .unwrap();

        assert_eq!(output.imports, vec!["text.format"]);
        assert_eq!(output.file_annotations[0].name, "Experimental");
        assert_eq!(output.declared_types[0].annotations, vec!["Table"]);
        assert_eq!(output.value.as_ref().map(Value::type_name), Some("Row"));
    }

    #[test]
    fn test_declare_records_dependencies() {
        let mut evaluator = CalcEvaluator::new();
        evaluator
            .declare(&Declarations {
                dependencies: vec!["foo:bar:1.0".to_string()],
                repositories: Vec::new(),
                imports: vec!["foo.bar".to_string()],
            })
            .unwrap();
        assert_eq!(evaluator.dependencies(), ["foo:bar:1.0"]);
        assert_eq!(evaluator.imports(), ["foo.bar"]);
    }

    #[test]
    fn test_unit_result_is_not_bound() {
        let mut evaluator = CalcEvaluator::new();
        let output = run(&mut evaluator, 1, "sleep(0)").unwrap();
        assert_eq!(output.value, Some(Value::Unit));
        assert!(output.result_name.is_none());
    }
}
