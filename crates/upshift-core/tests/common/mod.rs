//! Shared helpers for engine integration tests: throwaway git remotes and
//! manifest files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

pub fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

pub fn git_stdout(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Bare remote seeded with a `VERSION` file on `main`.
pub fn make_remote() -> tempfile::TempDir {
    let remote = tempfile::tempdir().unwrap();
    run_git(remote.path(), &["init", "--bare", "--initial-branch=main", "."]);

    let seed = tempfile::tempdir().unwrap();
    run_git(seed.path(), &["init", "--initial-branch=main", "."]);
    run_git(seed.path(), &["config", "user.name", "seed"]);
    run_git(seed.path(), &["config", "user.email", "seed@example.com"]);
    std::fs::write(seed.path().join("VERSION"), "1.0.0\n").unwrap();
    run_git(seed.path(), &["add", "VERSION"]);
    run_git(seed.path(), &["commit", "-m", "initial"]);
    run_git(
        seed.path(),
        &["remote", "add", "origin", &remote.path().to_string_lossy()],
    );
    run_git(seed.path(), &["push", "-u", "origin", "main"]);

    remote
}

/// Number of commits on a branch of a (bare) remote.
pub fn remote_commit_count(remote: &Path, branch: &str) -> usize {
    git_stdout(remote, &["rev-list", "--count", branch])
        .parse()
        .unwrap()
}

/// Files present in a branch tip of a (bare) remote.
pub fn remote_files(remote: &Path, branch: &str) -> Vec<String> {
    git_stdout(remote, &["ls-tree", "-r", branch, "--name-only"])
        .lines()
        .map(str::to_string)
        .collect()
}

/// Write a manifest file and return its path.
pub fn write_manifest(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}
