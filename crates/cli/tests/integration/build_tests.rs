//! Build behavior through the binary: defaults, staleness, overrides,
//! failures.

use predicates::prelude::*;

use crate::common::TestEnv;

#[test]
fn builds_the_default_target() {
  let env = TestEnv::new("out.txt: src.txt\n    cat $input > $target\n");
  env.write("src.txt", "payload");

  env.mk().assert().success().stderr(predicate::str::contains("building"));
  assert_eq!(env.read("out.txt"), "payload");
  assert!(env.exists(".mk/state.json"));
}

#[test]
fn builds_a_requested_target() {
  let env = TestEnv::new("first:\n    touch $target\nsecond:\n    echo two > $target\n");
  env.mk().arg("second").assert().success();
  assert!(env.exists("second"));
  assert!(!env.exists("first"));
}

#[test]
fn second_invocation_is_up_to_date() {
  let env = TestEnv::new("out.txt: src.txt\n    cat $input > $target\n    echo ran >> runs\n");
  env.write("src.txt", "payload");

  env.mk().assert().success();
  env.mk().assert().success();
  assert_eq!(env.runs(), 1);

  env.write("src.txt", "payload v2");
  env.mk().assert().success();
  assert_eq!(env.runs(), 2);
}

#[test]
fn verbose_reports_up_to_date() {
  let env = TestEnv::new("out.txt: src.txt\n    cat $input > $target\n");
  env.write("src.txt", "payload");

  env.mk().assert().success();
  env
    .mk()
    .arg("-v")
    .assert()
    .success()
    .stderr(predicate::str::contains("is up to date"));
}

#[test]
fn force_rebuilds() {
  let env = TestEnv::new("out.txt: src.txt\n    cat $input > $target\n    echo ran >> runs\n");
  env.write("src.txt", "payload");

  env.mk().assert().success();
  env.mk().arg("-B").assert().success();
  assert_eq!(env.runs(), 2);
}

#[test]
fn variable_overrides_from_argv() {
  // `?=` in the buildfile defers to a value pre-set on the command line.
  let env = TestEnv::new("greeting ?= hello\n!greet:\n    echo $greeting > out.txt\n");
  env.mk().args(["greeting=howdy", "greet"]).assert().success();
  assert_eq!(env.read("out.txt").trim(), "howdy");

  let env = TestEnv::new("greeting ?= hello\n!greet:\n    echo $greeting > out.txt\n");
  env.mk().arg("greet").assert().success();
  assert_eq!(env.read("out.txt").trim(), "hello");
}

#[test]
fn dry_run_prints_without_executing() {
  let env = TestEnv::new("out.txt: src.txt\n    cat $input > $target\n");
  env.write("src.txt", "payload");

  env
    .mk()
    .arg("-n")
    .assert()
    .success()
    .stderr(predicate::str::contains("cat src.txt > out.txt"));
  assert!(!env.exists("out.txt"));
  assert!(!env.exists(".mk/state.json"));
}

#[test]
fn custom_buildfile_name() {
  let env = TestEnv::new("unused:\n    true\n");
  env.write("build.mk", "made:\n    touch $target\n");
  env.mk().args(["-f", "build.mk"]).assert().success();
  assert!(env.exists("made"));
}

#[test]
fn tasks_run_every_invocation() {
  let env = TestEnv::new("!tick:\n    echo ran >> runs\n");
  env.mk().arg("tick").assert().success();
  env.mk().arg("tick").assert().success();
  assert_eq!(env.runs(), 2);
}

#[test]
fn failing_recipe_fails_the_run() {
  let env = TestEnv::new("out.txt:\n    echo partial > $target\n    false\n");
  env
    .mk()
    .assert()
    .failure()
    .stderr(predicate::str::contains("mk: "))
    .stderr(predicate::str::contains("out.txt"));
  assert!(!env.exists("out.txt"));
}

#[test]
fn parse_errors_carry_line_numbers() {
  let env = TestEnv::new("cc = gcc\nthis is not a statement\n");
  env
    .mk()
    .assert()
    .failure()
    .stderr(predicate::str::contains("line 2"))
    .stderr(predicate::str::starts_with("mk: "));
}

#[test]
fn no_default_target_is_an_error() {
  let env = TestEnv::new("cc = gcc\n");
  env
    .mk()
    .assert()
    .failure()
    .stderr(predicate::str::contains("no targets specified and no default target"));
}

#[test]
fn parallel_jobs_build_a_tree() {
  let env = TestEnv::new(
    "all: a b c\n    touch $target\na:\n    touch $target\nb:\n    touch $target\nc:\n    touch $target\n",
  );
  env.mk().args(["-j", "4", "all"]).assert().success();
  for name in ["a", "b", "c", "all"] {
    assert!(env.exists(name), "{name} missing");
  }
}

#[test]
fn multi_output_runs_once_for_both_outputs() {
  let env = TestEnv::new("a.out b.out:\n    touch a.out b.out\n    echo ran >> runs\n");
  env.mk().args(["a.out", "b.out"]).assert().success();
  assert_eq!(env.runs(), 1);
}
