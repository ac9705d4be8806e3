//! End-to-end tests for Jotter CLI commands.
//!
//! Every command runs offline against a temporary home directory.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Temporary home plus a script inside it.
struct TestHome {
    temp_dir: TempDir,
}

impl TestHome {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn write(&self, filename: &str, contents: &str) -> PathBuf {
        let path = self.path().join(filename);
        fs::write(&path, contents).expect("Failed to write file");
        path
    }

    fn jotter(&self) -> Command {
        let mut cmd = Command::cargo_bin("jotter").expect("binary should build");
        cmd.arg("--offline").arg("--home").arg(self.path());
        cmd
    }
}

// =============================================================================
// run
// =============================================================================

#[test]
fn test_run_script_with_bundled_library() {
    let home = TestHome::new();
    let script = home.write(
        "script.jot",
        "%use math(scale=2)\nval x = 7\n# %%\nx * 6\n# %%\npi + e\n",
    );

    home.jotter()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("declared: x"))
        .stdout(predicate::str::contains(" 42"))
        .stdout(predicate::str::contains(" 10"))
        .stdout(predicate::str::contains("3 of 3 snippets"));
}

#[test]
fn test_run_renders_with_library_renderer() {
    let home = TestHome::new();
    let script = home.write("render.jot", "%use bold\n# %%\n20 + 1\n");

    home.jotter()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("<b>21</b>"));
}

#[test]
fn test_run_reports_failed_snippets() {
    let home = TestHome::new();
    let script = home.write("broken.jot", "val a = 1\n# %%\na + missing\n# %%\na + 1\n");

    home.jotter()
        .arg("run")
        .arg(&script)
        .assert()
        .failure()
        .stdout(predicate::str::contains("2 of 3 snippets"))
        .stderr(predicate::str::contains("unknown name 'missing'"))
        .stderr(predicate::str::contains("1 of 3 snippets failed"));
}

#[test]
fn test_run_uses_user_libraries() {
    let home = TestHome::new();
    let libraries = home.path().join(".jotter").join("libraries");
    fs::create_dir_all(&libraries).unwrap();
    fs::write(
        libraries.join("greeting.json"),
        r#"{ "properties": { "who": "world" }, "init": ["val greeting = \"hello \" + \"$who\""] }"#,
    )
    .unwrap();
    let script = home.write("user.jot", "%use greeting(who=jotter)\ngreeting\n");

    home.jotter()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("hello jotter"));
}

#[test]
fn test_run_missing_script() {
    let home = TestHome::new();

    home.jotter()
        .arg("run")
        .arg(home.path().join("nope.jot"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read script"));
}

// =============================================================================
// resolve
// =============================================================================

#[test]
fn test_resolve_prints_definition() {
    let home = TestHome::new();

    home.jotter()
        .args(["resolve", "math(scale=3)"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""name": "math""#))
        .stdout(predicate::str::contains("val pi = 3 * 3"))
        .stderr(predicate::str::contains("from embedded"));
}

#[test]
fn test_resolve_unknown_library() {
    let home = TestHome::new();

    home.jotter()
        .args(["resolve", "nonexistent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("library not found"));
}

#[test]
fn test_resolve_invalid_reference() {
    let home = TestHome::new();

    home.jotter()
        .args(["resolve", "bad name!"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid library reference"));
}

// =============================================================================
// cache
// =============================================================================

#[test]
fn test_cache_path_and_clean() {
    let home = TestHome::new();
    let cache = home.path().join(".jotter").join("cache");

    home.jotter()
        .args(["cache", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(cache.display().to_string()));

    fs::create_dir_all(cache.join("ref_abc")).unwrap();
    home.jotter().args(["cache", "clean"]).assert().success();
    assert!(cache.exists());
    assert!(!cache.join("ref_abc").exists());
}

#[test]
fn test_cache_dir_from_config() {
    let home = TestHome::new();
    let custom = home.path().join("descriptors");
    let config = home.write(
        "config.json",
        &format!(r#"{{ "cache_dir": {:?} }}"#, custom.display().to_string()),
    );

    home.jotter()
        .arg("--config")
        .arg(&config)
        .args(["cache", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("descriptors"));
}
