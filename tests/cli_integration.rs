//! Integration tests for the espalier CLI
//!
//! These tests exercise the full CLI workflow using a temporary database.
//! They verify that commands work end-to-end without mocking.

use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run espalier CLI with a specific database path
fn run_espalier(args: &[&str], db_path: &PathBuf) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_espalier"))
        .args(args)
        .env("ESPALIER_DB_PATH", db_path)
        .output()
        .expect("Failed to execute espalier")
}

/// Helper to get stdout as string
fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Helper to get stderr as string
fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_espalier"))
        .arg("--help")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("espalier"));
    assert!(out.contains("page store"));
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_espalier"))
        .arg("--version")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("espalier"));
}

// =============================================================================
// Shell Completion Tests
// =============================================================================

#[test]
fn test_completion_zsh() {
    let output = Command::new(env!("CARGO_BIN_EXE_espalier"))
        .args(["completion", "zsh"])
        .output()
        .expect("Failed to execute");

    assert!(
        output.status.success(),
        "completion zsh failed: {}",
        stderr(&output)
    );
    let out = stdout(&output);
    assert!(
        out.contains("#compdef espalier"),
        "zsh completion should contain #compdef"
    );
}

#[test]
fn test_completion_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_espalier"))
        .args(["completion", "bash"])
        .output()
        .expect("Failed to execute");

    assert!(
        output.status.success(),
        "completion bash failed: {}",
        stderr(&output)
    );
    let out = stdout(&output);
    assert!(
        out.contains("_espalier"),
        "bash completion should contain _espalier function"
    );
}

#[test]
fn test_completion_fish() {
    let output = Command::new(env!("CARGO_BIN_EXE_espalier"))
        .args(["completion", "fish"])
        .output()
        .expect("Failed to execute");

    assert!(
        output.status.success(),
        "completion fish failed: {}",
        stderr(&output)
    );
    let out = stdout(&output);
    assert!(
        out.contains("complete -c espalier"),
        "fish completion should contain complete command"
    );
}

// =============================================================================
// Init
// =============================================================================

#[test]
fn test_init_creates_config_and_store() {
    let dir = TempDir::new().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_espalier"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .expect("Failed to execute");

    assert!(output.status.success(), "init failed: {}", stderr(&output));
    assert!(stdout(&output).contains("initialized"));
    assert!(dir.path().join(".espalier/config.toml").exists());
    assert!(dir.path().join(".espalier/espalier.db").exists());
}

// =============================================================================
// Page Workflow
// =============================================================================

#[test]
fn test_full_page_workflow() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("pages.db");

    // Root first
    let output = run_espalier(&["root", "--title", "Home"], &db);
    assert!(output.status.success(), "root failed: {}", stderr(&output));

    // Create a page with markup that must be cleaned at save. Acting as
    // user 1 makes them the owner, which matters for deletion later.
    let output = run_espalier(
        &[
            "new",
            "guides",
            "--user",
            "1",
            "--title",
            "Guides",
            "--content",
            "<b>hello</b><script>alert(1)</script>",
        ],
        &db,
    );
    assert!(output.status.success(), "new failed: {}", stderr(&output));
    assert!(stdout(&output).contains("guides/"));

    // Show renders the cleaned current revision
    let output = run_espalier(&["show", "guides"], &db);
    assert!(output.status.success(), "show failed: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("Guides"));
    assert!(out.contains("hello"));
    assert!(!out.contains("script"));

    // Edit appends a revision
    let output = run_espalier(
        &["edit", "guides", "--content", "updated body", "-m", "tweak"],
        &db,
    );
    assert!(output.status.success(), "edit failed: {}", stderr(&output));
    assert!(stdout(&output).contains("revision 1"));

    // Log lists both revisions, newest first
    let output = run_espalier(&["log", "guides"], &db);
    assert!(output.status.success(), "log failed: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("r1"));
    assert!(out.contains("r0"));
    assert!(out.contains("tweak"));

    // Nested page
    let output = run_espalier(&["new", "guides/install"], &db);
    assert!(output.status.success(), "nested new failed: {}", stderr(&output));

    // Tree shows the hierarchy
    let output = run_espalier(&["tree"], &db);
    assert!(output.status.success(), "tree failed: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("(root)"));
    assert!(out.contains("guides"));
    assert!(out.contains("install"));

    // Case-insensitive resolution is the default
    let output = run_espalier(&["show", "GUIDES/Install"], &db);
    assert!(output.status.success(), "case-insensitive show failed: {}", stderr(&output));

    // Deletion is gated on the policy: anonymous is not the owner
    let output = run_espalier(&["rm", "guides", "--force"], &db);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("denied"));

    // The owner is refused without --force
    let output = run_espalier(&["rm", "guides", "--user", "1"], &db);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--force"));

    // rm --force purges the subtree
    let output = run_espalier(&["rm", "guides", "--user", "1", "--force"], &db);
    assert!(output.status.success(), "rm failed: {}", stderr(&output));
    assert!(stdout(&output).contains("deleted 2 page(s)"));

    let output = run_espalier(&["show", "guides"], &db);
    assert!(!output.status.success());
}

#[test]
fn test_new_without_root_fails() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("pages.db");

    // No site, no root yet
    let output = run_espalier(&["new", "orphan"], &db);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("error:"));
}

#[test]
fn test_unknown_site_fails() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("pages.db");

    run_espalier(&["root"], &db);
    let output = run_espalier(&["show", "", "--site", "elsewhere"], &db);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("elsewhere"));
}

#[test]
fn test_duplicate_page_fails() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("pages.db");

    run_espalier(&["root"], &db);
    let output = run_espalier(&["new", "twice"], &db);
    assert!(output.status.success());
    let output = run_espalier(&["new", "twice"], &db);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("already exists"));
}

#[test]
fn test_sites_are_independent_trees() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("pages.db");

    run_espalier(&["root", "--title", "A"], &db);
    let output = run_espalier(&["root", "--title", "B", "--site", "second"], &db);
    assert!(output.status.success(), "second site root failed: {}", stderr(&output));

    run_espalier(&["new", "only-here"], &db);
    let output = run_espalier(&["show", "only-here", "--site", "second"], &db);
    assert!(!output.status.success(), "page must not leak across sites");
}
