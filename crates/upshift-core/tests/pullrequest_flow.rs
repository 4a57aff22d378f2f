//! Pull-request reconciliation against a scripted `shell` review backend.

mod common;

use common::{make_remote, write_manifest};
use std::path::Path;
use upshift_core::{Engine, EngineOptions, PipelineOptions, ResourceResult};

fn manifest(remote: &Path, workdir: &Path, state: &Path, value: &str, gated: bool) -> String {
    let condition = if gated {
        r#"
conditions:
  never:
    kind: shell
    disablesourceinput: true
    spec:
      command: "false"
"#
    } else {
        ""
    };

    format!(
        r#"
name: pr-flow
pipelineid: prflow
scms:
  repo:
    kind: git
    spec:
      url: {url}
      branch: main
      directory: {workdir}
sources:
  version:
    kind: shell
    spec:
      command: echo {value}
{condition}
targets:
  bump:
    kind: file
    scmid: repo
    spec:
      file: VERSION
pullrequests:
  review:
    kind: shell
    scmid: repo
    targets:
      - bump
    spec:
      createcommand: printf '%s' "$UPSHIFT_PR_TITLE" > {state}/pr_created
      updatecommand: printf '%s' "$UPSHIFT_PR_ID" > {state}/pr_updated
      querycommand: cat {state}/pr_id 2>/dev/null || true
"#,
        url = remote.display(),
        workdir = workdir.display(),
        state = state.display(),
        value = value,
        condition = condition,
    )
}

async fn run_engine(manifest_path: std::path::PathBuf) -> Engine {
    let mut engine = Engine::new(EngineOptions {
        manifests: vec![manifest_path],
        pipeline: PipelineOptions::default(),
    });
    engine.prepare().await.unwrap();
    engine.run().await.unwrap();
    engine
}

#[tokio::test]
async fn test_changed_group_opens_one_review_request() {
    let remote = make_remote();
    let scratch = tempfile::tempdir().unwrap();
    let workdir = scratch.path().join("copy");

    let path = write_manifest(
        scratch.path(),
        "pr.yaml",
        &manifest(remote.path(), &workdir, scratch.path(), "2.0.0", false),
    );
    let engine = run_engine(path).await;

    assert_eq!(engine.pipelines[0].report.result, ResourceResult::Attention);

    // The create command received the derived title (the first member
    // target's change description).
    let created = std::fs::read_to_string(scratch.path().join("pr_created")).unwrap();
    assert!(created.contains("VERSION"), "unexpected title: {created}");
    assert!(!scratch.path().join("pr_updated").exists());
}

#[tokio::test]
async fn test_existing_review_request_is_updated_even_without_change() {
    let remote = make_remote();
    let scratch = tempfile::tempdir().unwrap();
    let workdir = scratch.path().join("copy");

    // The target is already satisfied (VERSION is 1.0.0 upstream) and the
    // query command reports an open review request.
    std::fs::write(scratch.path().join("pr_id"), "77\n").unwrap();
    let path = write_manifest(
        scratch.path(),
        "pr.yaml",
        &manifest(remote.path(), &workdir, scratch.path(), "1.0.0", false),
    );
    let engine = run_engine(path).await;

    assert_eq!(engine.pipelines[0].report.result, ResourceResult::Success);
    assert!(!scratch.path().join("pr_created").exists());
    let updated = std::fs::read_to_string(scratch.path().join("pr_updated")).unwrap();
    assert_eq!(updated.trim(), "77");
}

#[tokio::test]
async fn test_unchanged_group_without_existing_request_does_nothing() {
    let remote = make_remote();
    let scratch = tempfile::tempdir().unwrap();
    let workdir = scratch.path().join("copy");

    let path = write_manifest(
        scratch.path(),
        "pr.yaml",
        &manifest(remote.path(), &workdir, scratch.path(), "1.0.0", false),
    );
    let engine = run_engine(path).await;

    assert_eq!(engine.pipelines[0].report.result, ResourceResult::Success);
    assert!(!scratch.path().join("pr_created").exists());
    assert!(!scratch.path().join("pr_updated").exists());
}

#[tokio::test]
async fn test_skipped_group_is_never_reconciled() {
    let remote = make_remote();
    let scratch = tempfile::tempdir().unwrap();
    let workdir = scratch.path().join("copy");

    // A failing condition gates every target off; the group member is
    // skipped, so no review request may be created or updated.
    std::fs::write(scratch.path().join("pr_id"), "77\n").unwrap();
    let path = write_manifest(
        scratch.path(),
        "pr.yaml",
        &manifest(remote.path(), &workdir, scratch.path(), "2.0.0", true),
    );
    let engine = run_engine(path).await;

    let pipeline = &engine.pipelines[0];
    assert_eq!(pipeline.targets["bump"].result, ResourceResult::Skipped);
    assert_eq!(pipeline.report.result, ResourceResult::Skipped);
    assert!(!scratch.path().join("pr_created").exists());
    assert!(!scratch.path().join("pr_updated").exists());
}
