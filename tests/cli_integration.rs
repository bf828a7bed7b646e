//! CLI Integration Tests
//!
//! Tests the command-line interface end-to-end inside temporary projects.

use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

/// Get the binary to test, isolated from the user's config and data.
fn taskrail(project: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("taskrail").unwrap();
    cmd.current_dir(project.path())
        .env("HOME", project.path())
        .env("XDG_CONFIG_HOME", project.path().join(".config"))
        .env("XDG_DATA_HOME", project.path().join(".data"));
    cmd
}

const LINT: &str = r#"
id: lint
type: local_cli
short_description: Lint the sources
command: "echo lint %level%"
placeholders:
  - name: "%level%"
    value_resolver: STATIC
    configuration: { name: level, value: 5, description: Lint level }
"#;

const BUILD: &str = r#"
id: build
type: local_cli
short_description: Build the project
command: "echo building"
"#;

const FAIL: &str = r#"
id: fail
type: local_cli
short_description: Always fails
command: "exit 3"
"#;

const QA: &str = r"
id: qa
type: task_set
short_description: Run QA
tasks:
  - { id: lint, tags: [fast] }
  - { id: build, tags: [slow] }
";

const RELEASE: &str = r"
name: release
type: state_machine
initial_marking: start
places: [start, built, done]
metadata: { description: Release flow }
transitions:
  build: { from: start, to: built, metadata: { task: build } }
  deploy: { from: built, to: done, guard: { approved: true } }
";

/// A project with tasks and the release workflow, not yet initialized.
fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    dir.child("tasks/lint.yaml").write_str(LINT).unwrap();
    dir.child("tasks/build.yaml").write_str(BUILD).unwrap();
    dir.child("tasks/fail.yaml").write_str(FAIL).unwrap();
    dir.child("tasks/qa.yml").write_str(QA).unwrap();
    dir.child("workflows/release.yaml").write_str(RELEASE).unwrap();
    dir
}

/// A project with a key and a local workflow store.
fn initialized_project() -> TempDir {
    let dir = project();
    taskrail(&dir)
        .args(["init", "--setting", "workflow.store_path=state/workflows.json"])
        .assert()
        .success();
    dir
}

// ============================================================================
// Help & Version Tests
// ============================================================================

#[test]
fn test_help_flag() {
    let dir = TempDir::new().unwrap();
    taskrail(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Compose declarative tasks"));
}

#[test]
fn test_version_flag() {
    let dir = TempDir::new().unwrap();
    taskrail(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_completions_bash() {
    let dir = TempDir::new().unwrap();
    taskrail(&dir)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("taskrail"));
}

// ============================================================================
// List Command Tests
// ============================================================================

#[test]
fn test_list_tasks() {
    let dir = project();
    taskrail(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("lint - Lint the sources"))
        .stdout(predicate::str::contains("qa - Run QA"))
        .stdout(predicate::str::contains("Total: 4 tasks"));
}

#[test]
fn test_list_with_tags() {
    let dir = project();
    taskrail(&dir)
        .args(["list", "--tags"])
        .assert()
        .success()
        .stdout(predicate::str::contains("qa - Run QA [fast, slow]"));
}

#[test]
fn test_list_with_json_output() {
    let dir = project();
    taskrail(&dir)
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("["))
        .stdout(predicate::str::contains("\"task_set\": true"));
}

#[test]
fn test_list_without_task_dir_fails() {
    let dir = TempDir::new().unwrap();
    taskrail(&dir)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("is not a directory"));
}

#[test]
fn test_list_rejects_cycles() {
    let dir = project();
    dir.child("tasks/loop.yaml")
        .write_str("id: loop\ntype: task_set\nshort_description: Loop\ntasks: [{ id: loop }]\n")
        .unwrap();

    taskrail(&dir)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("loop -> loop"));
}

// ============================================================================
// Run Command Tests
// ============================================================================

#[test]
fn test_run_uses_resolver_value() {
    let dir = project();
    taskrail(&dir)
        .args(["run", "lint"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lint 5"))
        .stdout(predicate::str::contains("Success: Task lint finished"));
}

#[test]
fn test_run_option_overrides_resolver() {
    let dir = project();
    taskrail(&dir)
        .args(["run", "lint", "--level", "9"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lint 9"));
}

#[test]
fn test_run_task_set_filtered_by_tags() {
    let dir = project();
    taskrail(&dir)
        .args(["run", "qa", "--tags", "fast", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Info: Would run `echo lint 5`"))
        .stdout(predicate::str::contains("echo building").not());
}

#[test]
fn test_run_task_set_without_tags_runs_all_members() {
    let dir = project();
    taskrail(&dir)
        .args(["run", "qa", "-d"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Would run `echo lint 5`"))
        .stdout(predicate::str::contains("Would run `echo building`"));
}

#[test]
fn test_run_failure_sets_exit_code() {
    let dir = project();
    taskrail(&dir)
        .args(["run", "fail"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error: Command `exit 3` failed with exit code 3"));
}

#[test]
fn test_run_unknown_task() {
    let dir = project();
    taskrail(&dir)
        .args(["run", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not find task missing"));
}

#[test]
fn test_run_writes_context() {
    let dir = project();
    taskrail(&dir)
        .args(["run", "lint", "--enable-context-writing", "-o", "release=1.2"])
        .assert()
        .success();

    dir.child("taskrail.context.json").assert(predicate::str::contains("\"release\": 1.2"));
}

#[test]
fn test_run_with_failed_context_reports_own_outcome() {
    let dir = project();
    taskrail(&dir)
        .args(["run", "fail", "--enable-context-writing"])
        .assert()
        .code(1);
    dir.child("taskrail.context.json").assert(predicate::str::contains("exit code 3"));

    taskrail(&dir)
        .args(["run", "fail", "--read-context-from", "taskrail.context.json"])
        .assert()
        .code(1);

    taskrail(&dir)
        .args(["run", "lint", "--read-context-from", "taskrail.context.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Success: Task lint finished"))
        .stderr(predicate::str::contains("exit code 3").not());
}

#[test]
fn test_set_without_value_is_ignored() {
    let dir = initialized_project();
    taskrail(&dir).args(["workflow", "init", "release"]).assert().success();
    taskrail(&dir).args(["workflow", "apply", "build"]).assert().success();

    taskrail(&dir)
        .args(["workflow", "apply", "deploy", "--set", "approved"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Ignoring overwrite without key=value"))
        .stderr(predicate::str::contains("\"approved\" must be true"));
}

// ============================================================================
// Project Setup Tests
// ============================================================================

#[test]
fn test_init_writes_project_key() {
    let dir = project();
    taskrail(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Project initialized with key"));

    dir.child(".taskrail.toml").assert(predicate::str::contains("key = "));
}

#[test]
fn test_init_twice_needs_force() {
    let dir = initialized_project();
    taskrail(&dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already initialized"));
    taskrail(&dir).args(["init", "--force"]).assert().success();
}

#[test]
fn test_setting_set_and_get() {
    let dir = initialized_project();
    taskrail(&dir).args(["setting", "set", "project.workflows", "release"]).assert().success();
    taskrail(&dir)
        .args(["setting", "get", "project.workflows"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"release\""));
}

#[test]
fn test_setting_unknown_path() {
    let dir = initialized_project();
    taskrail(&dir)
        .args(["setting", "set", "project.color", "blue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Setting 'project.color' does not exist"));
}

// ============================================================================
// Workflow Command Tests
// ============================================================================

#[test]
fn test_workflow_requires_project() {
    let dir = project();
    taskrail(&dir)
        .args(["workflow", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Project is not initialized"));
}

#[test]
fn test_workflow_init_is_idempotent() {
    let dir = initialized_project();
    for _ in 0..2 {
        taskrail(&dir)
            .args(["workflow", "init", "release"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Success: Workflow \"release\" is active"));
    }

    taskrail(&dir)
        .args(["workflow", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("* release"));
}

#[test]
fn test_workflow_init_unknown_definition() {
    let dir = initialized_project();
    taskrail(&dir)
        .args(["workflow", "init", "nightly"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Workflow \"nightly\" cannot be initialized"));
}

#[test]
fn test_workflow_transitions_and_guards() {
    let dir = initialized_project();
    taskrail(&dir).args(["workflow", "init", "release"]).assert().success();

    taskrail(&dir)
        .args(["workflow", "next"])
        .assert()
        .success()
        .stdout(predicate::str::contains("build (task: build)"));

    taskrail(&dir)
        .args(["workflow", "apply", "deploy"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("The marking does not enable the transition."));

    taskrail(&dir).args(["workflow", "apply", "build"]).assert().success();

    taskrail(&dir)
        .args(["workflow", "apply", "deploy"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("\"approved\" must be true to apply \"deploy\""));

    taskrail(&dir)
        .args(["workflow", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Marking: built"))
        .stdout(predicate::str::contains("Previous: build"))
        .stdout(predicate::str::contains("Finished: false"));

    taskrail(&dir)
        .args(["workflow", "apply", "deploy", "--set", "approved=true"])
        .assert()
        .success();

    taskrail(&dir)
        .args(["workflow", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Finished: true"));
}

#[test]
fn test_workflow_gates_bound_tasks() {
    let dir = initialized_project();
    taskrail(&dir).args(["workflow", "init", "release"]).assert().success();
    taskrail(&dir).args(["run", "build", "-d"]).assert().success();

    taskrail(&dir).args(["workflow", "apply", "build"]).assert().success();

    taskrail(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("build -").not())
        .stdout(predicate::str::contains("lint -"));
    taskrail(&dir)
        .args(["run", "build"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not available in the current workflow state"));
}

#[test]
fn test_workflow_restart_resets_marking() {
    let dir = initialized_project();
    taskrail(&dir).args(["workflow", "init", "release"]).assert().success();
    taskrail(&dir).args(["workflow", "apply", "build"]).assert().success();

    taskrail(&dir)
        .args(["workflow", "restart"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Workflow \"release\" restarted"));
    taskrail(&dir)
        .args(["workflow", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Marking: start"));
}

#[test]
fn test_workflow_run_to_completion() {
    let dir = initialized_project();
    taskrail(&dir)
        .args(["workflow", "run", "release", "--set", "approved=true"])
        .assert()
        .success()
        .stdout(predicate::str::contains("building"))
        .stdout(predicate::str::contains("Info: Applied transition \"deploy\""))
        .stdout(predicate::str::contains("Success: Workflow \"release\" is finished"));

    dir.child("state/workflows.json").assert(predicate::str::contains("\"finished\""));
}

#[test]
fn test_workflow_run_stops_at_guard() {
    let dir = initialized_project();
    taskrail(&dir)
        .args(["workflow", "run"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Applied transition \"build\""))
        .stderr(predicate::str::contains("\"approved\" must be true"));
}
