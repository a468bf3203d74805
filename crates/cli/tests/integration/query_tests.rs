//! Query modes: `--why`, `--graph`, `--state`, `--complete`.

use predicates::prelude::*;

use crate::common::TestEnv;

#[test]
fn why_reports_staleness_then_freshness() {
  let env = TestEnv::new("out.txt: src.txt\n    cat $input > $target\n");
  env.write("src.txt", "payload");

  env
    .mk()
    .args(["--why", "out.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("out.txt needs rebuilding"))
    .stdout(predicate::str::contains("no previous build recorded"));

  env.mk().assert().success();
  env
    .mk()
    .args(["--why", "out.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("out.txt is up to date"));

  env.write("src.txt", "payload v2");
  env
    .mk()
    .args(["--why", "out.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("src.txt"));
}

#[test]
fn why_does_not_build() {
  let env = TestEnv::new("out.txt: src.txt\n    cat $input > $target\n");
  env.write("src.txt", "payload");
  env.mk().args(["--why", "out.txt"]).assert().success();
  assert!(!env.exists("out.txt"));
}

#[test]
fn graph_emits_dot() {
  let env = TestEnv::new("app: main.o\n    cc -o $target $inputs\nmain.o: main.c\n    cc -c $input\n");
  env.write("main.c", "int main;");

  env
    .mk()
    .args(["--graph", "app"])
    .assert()
    .success()
    .stdout(predicate::str::starts_with("digraph"))
    .stdout(predicate::str::contains("main.o"));
  assert!(!env.exists("app"));
}

#[test]
fn state_dumps_recorded_entries() {
  let env = TestEnv::new("out.txt: src.txt\n    cat $input > $target\n");
  env.write("src.txt", "payload");
  env.mk().assert().success();

  env
    .mk()
    .args(["--state", "out.txt"])
    .assert()
    .success()
    .stdout(predicate::str::contains("state for out.txt"))
    .stdout(predicate::str::contains("recipe_hash"))
    .stdout(predicate::str::contains("input_hashes"));

  env
    .mk()
    .args(["--state", "never-built"])
    .assert()
    .success()
    .stdout(predicate::str::contains("no build state recorded for never-built"));
}

#[test]
fn state_requires_a_target() {
  let env = TestEnv::new("out:\n    touch $target\n");
  env
    .mk()
    .arg("--state")
    .assert()
    .failure()
    .stderr(predicate::str::contains("--state requires at least one target"));
}

#[test]
fn complete_lists_targets_and_configs() {
  let env = TestEnv::new(
    "app: main.o\n    cc -o $target $inputs\n\
     config debug:\n    opt = -O0\n\
     !clean:\n    rm -rf build\n",
  );
  env
    .mk()
    .arg("--complete")
    .assert()
    .success()
    .stdout(predicate::str::contains("app"))
    .stdout(predicate::str::contains("clean"))
    .stdout(predicate::str::contains("debug"));
}

#[test]
fn complete_is_silent_on_broken_buildfiles() {
  let env = TestEnv::new("not a valid line\n");
  env.mk().arg("--complete").assert().success().stdout(predicate::str::is_empty());
}
