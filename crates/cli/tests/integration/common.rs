//! Shared helpers for CLI integration tests.

use assert_cmd::Command;
use tempfile::TempDir;

/// Isolated project directory with a buildfile. Every command runs with the
/// directory as its working directory, so `.mk/` state stays per-test.
pub struct TestEnv {
  temp: TempDir,
}

impl TestEnv {
  pub fn new(mkfile: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let env = Self { temp };
    env.write("mkfile", mkfile);
    env
  }

  pub fn write(&self, rel: &str, content: &str) {
    let path = self.temp.path().join(rel);
    if let Some(dir) = path.parent() {
      std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(path, content).unwrap();
  }

  pub fn read(&self, rel: &str) -> String {
    std::fs::read_to_string(self.temp.path().join(rel)).unwrap_or_else(|e| panic!("reading {rel}: {e}"))
  }

  pub fn exists(&self, rel: &str) -> bool {
    self.temp.path().join(rel).exists()
  }

  /// Lines in the `runs` side-effect file, 0 when absent.
  pub fn runs(&self) -> usize {
    std::fs::read_to_string(self.temp.path().join("runs"))
      .map(|s| s.lines().count())
      .unwrap_or(0)
  }

  pub fn mk(&self) -> Command {
    let mut cmd = Command::cargo_bin("mk").unwrap();
    cmd.current_dir(self.temp.path());
    cmd
  }
}
