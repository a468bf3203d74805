//! End-to-end engine tests: parse, evaluate, execute, record.
//!
//! Each test works in its own temporary directory; relative paths in
//! buildfiles resolve against the process working directory, so tests
//! serialize and chdir like the executor's real callers do.

use std::sync::Arc;

use serial_test::serial;
use tempfile::TempDir;

use mk_lib::exec::{ExecError, ExecOptions, Executor};
use mk_lib::graph::Graph;
use mk_lib::state::BuildState;
use mk_lib::vars::Vars;

struct TestDir {
  _temp: TempDir,
}

impl TestDir {
  fn enter() -> Self {
    let temp = TempDir::new().unwrap();
    std::env::set_current_dir(temp.path()).unwrap();
    Self { _temp: temp }
  }
}

fn write(path: &str, content: &str) {
  if let Some(dir) = std::path::Path::new(path).parent() {
    if !dir.as_os_str().is_empty() {
      std::fs::create_dir_all(dir).unwrap();
    }
  }
  std::fs::write(path, content).unwrap();
}

fn read(path: &str) -> String {
  std::fs::read_to_string(path).unwrap_or_else(|e| panic!("reading {path}: {e}"))
}

fn run_count(path: &str) -> usize {
  std::fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
}

fn build_targets(
  mkfile: &str,
  targets: &[&str],
  opts: ExecOptions,
  state: &Arc<BuildState>,
) -> Result<(), ExecError> {
  let file = mk_lib::parse(mkfile).unwrap();
  let graph = Graph::build(&file, Vars::new(), &[]).unwrap();
  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap();
  runtime.block_on(async {
    let exec = Executor::new(graph, state.clone(), opts);
    for target in targets {
      exec.build(target).await?;
    }
    Ok(())
  })
}

fn build(mkfile: &str, targets: &[&str], state: &Arc<BuildState>) -> Result<(), ExecError> {
  build_targets(mkfile, targets, ExecOptions { jobs: 1, ..ExecOptions::default() }, state)
}

#[test]
#[serial]
fn end_to_end_pattern_build() {
  let _dir = TestDir::enter();
  write("src/main.txt", "hello pattern");

  let mkfile = "build/{name}.up: src/{name}.txt\n    tr a-z A-Z < $input > $target\n\
                build/out: build/main.up\n    cat $inputs > $target\n";

  let state = Arc::new(BuildState::new());
  build(mkfile, &["build/out"], &state).unwrap();

  assert_eq!(read("build/main.up"), "HELLO PATTERN");
  assert_eq!(read("build/out"), "HELLO PATTERN");
  assert!(state.get("build/main.up").is_some());
  assert!(state.get("build/out").is_some());
}

#[test]
#[serial]
fn unchanged_build_does_not_rerun() {
  let _dir = TestDir::enter();
  write("src.txt", "v1");

  let mkfile = "out.txt: src.txt\n    cat $input > $target\n    echo ran >> runs\n";
  let state = Arc::new(BuildState::new());

  build(mkfile, &["out.txt"], &state).unwrap();
  assert_eq!(run_count("runs"), 1);

  // Same content, fresh invocation: up to date.
  build(mkfile, &["out.txt"], &state).unwrap();
  assert_eq!(run_count("runs"), 1);

  // Content change triggers a rebuild; a revert triggers one more (the
  // recorded hash is of the modified content), then it settles.
  write("src.txt", "v2");
  build(mkfile, &["out.txt"], &state).unwrap();
  assert_eq!(run_count("runs"), 2);

  write("src.txt", "v1");
  build(mkfile, &["out.txt"], &state).unwrap();
  assert_eq!(run_count("runs"), 3);
  build(mkfile, &["out.txt"], &state).unwrap();
  assert_eq!(run_count("runs"), 3);
}

#[test]
#[serial]
fn state_round_trips_through_disk() {
  let _dir = TestDir::enter();
  write("src.txt", "content");

  let mkfile = "out.txt: src.txt\n    cat $input > $target\n    echo ran >> runs\n";

  let state = Arc::new(BuildState::new());
  build(mkfile, &["out.txt"], &state).unwrap();
  state.save("").unwrap();

  let reloaded = Arc::new(BuildState::load(""));
  build(mkfile, &["out.txt"], &reloaded).unwrap();
  assert_eq!(run_count("runs"), 1);
}

#[test]
#[serial]
fn tasks_always_run() {
  let _dir = TestDir::enter();

  let mkfile = "!tick:\n    echo ran >> runs\n";
  let state = Arc::new(BuildState::new());

  build(mkfile, &["tick"], &state).unwrap();
  build(mkfile, &["tick"], &state).unwrap();
  assert_eq!(run_count("runs"), 2);
  // Tasks never record state.
  assert!(state.get("tick").is_none());
}

#[test]
#[serial]
fn force_rebuilds_fresh_targets() {
  let _dir = TestDir::enter();
  write("src.txt", "content");

  let mkfile = "out.txt: src.txt\n    cat $input > $target\n    echo ran >> runs\n";
  let state = Arc::new(BuildState::new());

  build(mkfile, &["out.txt"], &state).unwrap();
  build_targets(
    mkfile,
    &["out.txt"],
    ExecOptions { jobs: 1, force: true, ..ExecOptions::default() },
    &state,
  )
  .unwrap();
  assert_eq!(run_count("runs"), 2);
}

#[test]
#[serial]
fn dry_run_executes_nothing() {
  let _dir = TestDir::enter();
  write("src.txt", "content");

  let mkfile = "out.txt: src.txt\n    cat $input > $target\n";
  let state = Arc::new(BuildState::new());
  build_targets(
    mkfile,
    &["out.txt"],
    ExecOptions { jobs: 1, dry_run: true, ..ExecOptions::default() },
    &state,
  )
  .unwrap();

  assert!(!std::fs::exists("out.txt").unwrap());
  assert!(state.get("out.txt").is_none());
}

#[test]
#[serial]
fn order_only_prereqs_do_not_trigger_rebuilds() {
  let _dir = TestDir::enter();
  write("src.txt", "data");
  write("order.txt", "o1");

  let mkfile = "out.txt: src.txt | order.txt\n    echo inputs=$inputs > $target\n    echo ran >> runs\n";
  let state = Arc::new(BuildState::new());

  build(mkfile, &["out.txt"], &state).unwrap();
  assert_eq!(run_count("runs"), 1);
  // Order-only prereqs stay out of $inputs.
  assert_eq!(read("out.txt").trim(), "inputs=src.txt");

  write("order.txt", "o2 changed");
  build(mkfile, &["out.txt"], &state).unwrap();
  assert_eq!(run_count("runs"), 1);

  write("src.txt", "data changed");
  build(mkfile, &["out.txt"], &state).unwrap();
  assert_eq!(run_count("runs"), 2);
}

#[test]
#[serial]
fn changed_variable_narrows_after_first_build() {
  let _dir = TestDir::enter();
  write("a.txt", "aaa");
  write("b.txt", "bbb");

  let mkfile = "out.txt: a.txt b.txt\n    echo $changed > $target\n";
  let state = Arc::new(BuildState::new());

  build(mkfile, &["out.txt"], &state).unwrap();
  assert_eq!(read("out.txt").trim(), "a.txt b.txt");

  write("b.txt", "bbb modified");
  build(mkfile, &["out.txt"], &state).unwrap();
  assert_eq!(read("out.txt").trim(), "b.txt");
}

#[test]
#[serial]
fn multi_output_rule_runs_once_per_invocation() {
  let _dir = TestDir::enter();
  write("src.txt", "data");

  let mkfile = "a.out b.out: src.txt\n    cp src.txt a.out\n    cp src.txt b.out\n    echo ran >> runs\n";
  let state = Arc::new(BuildState::new());

  // Requesting every output, twice, in one invocation runs the recipe once.
  let file = mk_lib::parse(mkfile).unwrap();
  let graph = Graph::build(&file, Vars::new(), &[]).unwrap();
  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .unwrap();
  runtime.block_on(async {
    let exec = Executor::new(graph, state.clone(), ExecOptions { jobs: 4, ..ExecOptions::default() });
    let (a, b, a2, b2) = tokio::join!(exec.build("a.out"), exec.build("b.out"), exec.build("a.out"), exec.build("b.out"));
    a.unwrap();
    b.unwrap();
    a2.unwrap();
    b2.unwrap();
  });

  assert_eq!(run_count("runs"), 1);
  assert!(state.get("a.out").is_some());
  assert!(state.get("b.out").is_some());
}

#[test]
#[serial]
fn diamond_builds_each_node_once() {
  let _dir = TestDir::enter();
  write("src.txt", "data");

  let mkfile = "top: left right\n    echo top >> runs\n    touch $target\n\
                left: base\n    echo left >> runs\n    touch $target\n\
                right: base\n    echo right >> runs\n    touch $target\n\
                base: src.txt\n    echo base >> runs\n    touch $target\n";
  let state = Arc::new(BuildState::new());
  build_targets(mkfile, &["top"], ExecOptions { jobs: 4, ..ExecOptions::default() }, &state).unwrap();

  let runs = read("runs");
  assert_eq!(runs.lines().count(), 4, "{runs}");
  assert_eq!(runs.lines().filter(|l| *l == "base").count(), 1, "{runs}");
  // Dependencies complete before dependents start.
  let order: Vec<&str> = runs.lines().collect();
  assert_eq!(order.first(), Some(&"base"));
  assert_eq!(order.last(), Some(&"top"));
}

#[test]
#[serial]
fn unlimited_jobs_build_in_parallel() {
  let _dir = TestDir::enter();
  write("src.txt", "data");

  let mkfile = "all: a b c\n    touch $target\n\
                a: src.txt\n    touch $target\n\
                b: src.txt\n    touch $target\n\
                c: src.txt\n    touch $target\n";
  let state = Arc::new(BuildState::new());
  build_targets(mkfile, &["all"], ExecOptions { jobs: 0, ..ExecOptions::default() }, &state).unwrap();
  for target in ["a", "b", "c", "all"] {
    assert!(std::fs::exists(target).unwrap(), "{target} missing");
  }
}

#[test]
#[serial]
fn failing_recipe_deletes_targets_and_propagates() {
  let _dir = TestDir::enter();
  write("src.txt", "data");

  let mkfile = "app: part.txt\n    cat $input > $target\n\
                part.txt: src.txt\n    echo partial > $target\n    false\n";
  let state = Arc::new(BuildState::new());

  let err = build(mkfile, &["app"], &state).unwrap_err();
  let rendered = err.to_string();
  assert!(rendered.contains("part.txt"), "{rendered}");
  assert!(rendered.contains("app"), "{rendered}");

  // The partial output was deleted and nothing was recorded.
  assert!(!std::fs::exists("part.txt").unwrap());
  assert!(state.get("part.txt").is_none());
}

#[test]
#[serial]
fn keep_annotation_preserves_failed_output() {
  let _dir = TestDir::enter();
  write("src.txt", "data");

  let mkfile = "part.txt [keep]: src.txt\n    echo partial > $target\n    false\n";
  let state = Arc::new(BuildState::new());

  build(mkfile, &["part.txt"], &state).unwrap_err();
  assert_eq!(read("part.txt").trim(), "partial");
}

#[test]
#[serial]
fn set_e_stops_after_first_failing_line() {
  let _dir = TestDir::enter();

  let mkfile = "!boom:\n    false\n    echo never >> runs\n";
  let state = Arc::new(BuildState::new());
  build(mkfile, &["boom"], &state).unwrap_err();
  assert_eq!(run_count("runs"), 0);
}

#[test]
#[serial]
fn dash_prefix_ignores_line_failure() {
  let _dir = TestDir::enter();

  let mkfile = "!soft:\n    -false\n    echo survived >> runs\n";
  let state = Arc::new(BuildState::new());
  build(mkfile, &["soft"], &state).unwrap();
  assert_eq!(run_count("runs"), 1);
}

#[test]
#[serial]
fn recipe_env_includes_buildfile_variables() {
  let _dir = TestDir::enter();

  let mkfile = "flavor = vanilla\n!show:\n    printenv flavor > env.out\n";
  let state = Arc::new(BuildState::new());
  build(mkfile, &["show"], &state).unwrap();
  assert_eq!(read("env.out").trim(), "vanilla");
}

#[test]
#[serial]
fn fingerprint_rebuilds_only_on_output_change() {
  let _dir = TestDir::enter();
  write("meta.src", "one");

  let mkfile = "artifact [fingerprint: cat meta.src]:\n    echo ran >> runs\n";
  let state = Arc::new(BuildState::new());

  build(mkfile, &["artifact"], &state).unwrap();
  assert_eq!(run_count("runs"), 1);

  // Unchanged fingerprint output: no rebuild, even though no file named
  // `artifact` exists.
  build(mkfile, &["artifact"], &state).unwrap();
  assert_eq!(run_count("runs"), 1);

  write("meta.src", "two");
  build(mkfile, &["artifact"], &state).unwrap();
  assert_eq!(run_count("runs"), 2);
}

#[test]
#[serial]
fn missing_rule_is_an_error() {
  let _dir = TestDir::enter();
  let mkfile = "out: missing-prereq\n    touch $target\n";
  let state = Arc::new(BuildState::new());
  let err = build(mkfile, &["out"], &state).unwrap_err();
  assert!(err.to_string().contains("no rule to build"), "{err}");
}

#[test]
#[serial]
fn stem_is_available_in_recipes() {
  let _dir = TestDir::enter();
  write("src/widget.txt", "data");

  let mkfile = "build/{name}.tag: src/{name}.txt\n    echo $stem > $target\n";
  let state = Arc::new(BuildState::new());
  build(mkfile, &["build/widget.tag"], &state).unwrap();
  assert_eq!(read("build/widget.tag").trim(), "widget");
}

#[test]
#[serial]
fn why_rebuild_reports_and_clears() {
  let _dir = TestDir::enter();
  write("src.txt", "data");

  let mkfile = "out.txt: src.txt\n    cat $input > $target\n";
  let file = mk_lib::parse(mkfile).unwrap();
  let state = Arc::new(BuildState::new());

  let graph = Graph::build(&file, Vars::new(), &[]).unwrap();
  let reasons = mk_lib::why_rebuild(&graph, &state, "out.txt").unwrap();
  assert!(reasons.iter().any(|r| r.contains("no previous build")), "{reasons:?}");

  build(mkfile, &["out.txt"], &state).unwrap();
  let graph = Graph::build(&file, Vars::new(), &[]).unwrap();
  assert!(mk_lib::why_rebuild(&graph, &state, "out.txt").unwrap().is_empty());

  write("src.txt", "data changed");
  let graph = Graph::build(&file, Vars::new(), &[]).unwrap();
  let reasons = mk_lib::why_rebuild(&graph, &state, "out.txt").unwrap();
  assert!(reasons.iter().any(|r| r.contains("src.txt")), "{reasons:?}");
}
