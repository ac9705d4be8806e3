//! Run command implementation for Jotter CLI.
//!
//! Executes a snippet script headlessly through one session, the way a
//! notebook front-end would submit its cells.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use jotter_core::session::ExecutionCallback;
use jotter_core::{
    CalcEvaluator, Error, EvaluationResult, ExecuteOptions, ExecutionOutcome, KernelDirs,
    ResolverChain, Session, SessionConfig, SharedSession, SnippetId,
};

use crate::colors;

/// Line prefix separating snippets in a script.
const SNIPPET_SEPARATOR: &str = "# %%";

/// Progress callback that prints snippet status to the terminal.
struct ProgressCallback;

impl ExecutionCallback for ProgressCallback {
    fn on_snippet_started(&self, snippet: SnippetId, _code: &str) {
        print!(
            "{}  ▶ Running{} {}[{}]{}... ",
            colors::CYAN,
            colors::RESET,
            colors::BOLD,
            snippet.as_u64(),
            colors::RESET
        );
        colors::flush_stdout();
    }

    fn on_snippet_completed(&self, _snippet: SnippetId, _result: &EvaluationResult) {
        println!("{}✓{}", colors::GREEN, colors::RESET);
    }

    fn on_snippet_error(&self, _snippet: SnippetId, _error: &Error) {
        println!("{}✗{}", colors::RED, colors::RESET);
    }

    fn on_snippet_interrupted(&self, _snippet: SnippetId) {
        println!("{}interrupted{}", colors::YELLOW, colors::RESET);
    }
}

/// Split a script into snippets at separator lines, dropping blank ones.
pub fn split_snippets(text: &str) -> Vec<String> {
    let mut snippets = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim_start().starts_with(SNIPPET_SEPARATOR) {
            snippets.push(current.join("\n"));
            current.clear();
        } else {
            current.push(line);
        }
    }
    snippets.push(current.join("\n"));

    snippets.retain(|s| !s.trim().is_empty());
    snippets
}

/// Execute a snippet script.
pub async fn execute(script: &Path, config: SessionConfig, dirs: &KernelDirs) -> anyhow::Result<()> {
    let start = Instant::now();
    let text = fs::read_to_string(script)
        .with_context(|| format!("Failed to read script {}", script.display()))?;
    let snippets = split_snippets(&text);

    println!(
        "\n{}Running{} {} ({} snippets)",
        colors::BOLD,
        colors::RESET,
        script.display(),
        snippets.len()
    );

    let resolver = Arc::new(ResolverChain::from_config(&config, dirs)?);
    let session = Session::new(CalcEvaluator::new(), resolver, config)
        .with_callback(Arc::new(ProgressCallback));
    let shared = SharedSession::new(session);

    // Ctrl-C interrupts the running snippet, not the process
    let abort = shared.abort_handle();
    let interrupts = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let total = snippets.len();
    let mut completed = 0;
    let mut failed = 0;
    for (index, code) in snippets.into_iter().enumerate() {
        let session = shared.clone();
        let outcome =
            tokio::task::spawn_blocking(move || session.execute(&code, ExecuteOptions::default()))
                .await?;

        match outcome {
            Ok(ExecutionOutcome::Completed(result)) => {
                print_result(&result);
                completed += 1;
            }
            Ok(ExecutionOutcome::Interrupted { .. }) => {
                let skipped = total - index - 1;
                if skipped > 0 {
                    colors::warn(format!("skipping {} remaining snippets", skipped));
                }
                break;
            }
            Err(e) => {
                eprintln!("{}    Error:{} {}", colors::RED, colors::RESET, e.with_hint());
                failed += 1;
            }
        }
    }
    interrupts.abort();

    let session = shared.clone();
    let shutdown = tokio::task::spawn_blocking(move || session.shutdown()).await?;
    for step in shutdown {
        if let Err(e) = step.outcome {
            colors::warn(e);
        }
    }

    println!("\n{}", "─".repeat(50));
    println!(
        "{}Completed{} {} of {} snippets in {:.2}s",
        colors::GREEN,
        colors::RESET,
        completed,
        total,
        start.elapsed().as_secs_f64()
    );

    if failed > 0 {
        anyhow::bail!("{} of {} snippets failed", failed, total);
    }
    Ok(())
}

fn print_result(result: &EvaluationResult) {
    for warning in &result.warnings {
        colors::warn(warning);
    }
    for error in &result.extension_errors {
        colors::warn(error);
    }
    for artifact in &result.displays {
        println!("{}{}{}", colors::DIM, artifact.data, colors::RESET);
    }

    let declared: Vec<&str> = result
        .bindings
        .declared
        .iter()
        .map(String::as_str)
        .filter(|name| Some(*name) != result.result_name.as_deref())
        .collect();
    if !declared.is_empty() {
        println!(
            "{}    declared: {}{}",
            colors::DIM,
            declared.join(", "),
            colors::RESET
        );
    }

    if let Some(display) = &result.display {
        println!(
            "{}Out[{}]:{} {}",
            colors::BOLD,
            result.snippet.as_u64(),
            colors::RESET,
            display.data
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_snippets() {
        let script = "val a = 1\n# %% second\na + 1\n\n# %%\n\n# %%\nstr(a)\n";
        assert_eq!(split_snippets(script), vec!["val a = 1", "a + 1\n", "str(a)"]);
    }

    #[test]
    fn test_script_without_separators() {
        assert_eq!(split_snippets("1 + 1"), vec!["1 + 1"]);
        assert!(split_snippets("\n# %%\n").is_empty());
    }
}
