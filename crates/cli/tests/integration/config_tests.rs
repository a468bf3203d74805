//! Build configs through the binary: composition, validation, state-file
//! isolation, and `requires`.

use predicates::prelude::*;

use crate::common::TestEnv;

fn config_mkfile() -> &'static str {
  "cxxflags = -Wall\n\
   builddir = build\n\
   config debug:\n    cxxflags += -O0\n\
   config asan:\n    cxxflags += -fsanitize=address\n\
   config release:\n    excludes debug\n    cxxflags += -O3\n\
   !show:\n    echo $cxxflags > flags.txt\n    echo $builddir > dir.txt\n"
}

#[test]
fn configs_compose_in_cli_order() {
  let env = TestEnv::new(config_mkfile());
  env.mk().arg("show:debug+asan").assert().success();
  assert_eq!(env.read("flags.txt").trim(), "-Wall -O0 -fsanitize=address");
  assert_eq!(env.read("dir.txt").trim(), "build-debug-asan");
}

#[test]
fn config_state_files_are_isolated() {
  let env = TestEnv::new(
    "builddir = build\n\
     config debug:\n    opt = -O0\n\
     out.txt: src.txt\n    cat $input > $target\n",
  );
  env.write("src.txt", "payload");

  env.mk().arg("out.txt:debug").assert().success();
  assert!(env.exists(".mk/state-debug.json"));
  assert!(!env.exists(".mk/state.json"));

  env.mk().arg("out.txt").assert().success();
  assert!(env.exists(".mk/state.json"));
}

#[test]
fn unknown_config_is_rejected() {
  let env = TestEnv::new(config_mkfile());
  env
    .mk()
    .arg("show:nope")
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown config \"nope\""));
}

#[test]
fn excluded_configs_are_rejected_together() {
  let env = TestEnv::new(config_mkfile());
  env
    .mk()
    .arg("show:release+debug")
    .assert()
    .failure()
    .stderr(predicate::str::contains("excludes"));
}

#[test]
fn config_requires_builds_first() {
  let env = TestEnv::new(
    "config cross:\n    requires toolchain.stamp\n\
     toolchain.stamp:\n    echo toolchain >> runs\n    touch $target\n\
     !app:\n    echo app >> runs\n",
  );
  env.mk().arg("app:cross").assert().success();
  let runs = env.read("runs");
  assert_eq!(runs.lines().collect::<Vec<_>>(), ["toolchain", "app"]);
}
