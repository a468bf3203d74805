//! The build database: per-target records and the staleness algorithm.
//!
//! State is a JSON object keyed by target name, persisted under `.mk/` with
//! one file per active-config combination so configurations never share
//! staleness verdicts. A read failure means "no prior state"; write
//! failures surface at shutdown.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::hash::{HashCache, hash_bytes, hash_str};

pub const STATE_DIR: &str = ".mk";

#[derive(Debug, Error)]
pub enum StateError {
  #[error("writing build state: {0}")]
  Io(#[from] io::Error),

  #[error("encoding build state: {0}")]
  Json(#[from] serde_json::Error),
}

/// State file path for a config suffix (active config names joined with
/// `-`). The empty suffix names the base file.
pub fn state_file(config_suffix: &str) -> PathBuf {
  if config_suffix.is_empty() {
    PathBuf::from(STATE_DIR).join("state.json")
  } else {
    PathBuf::from(STATE_DIR).join(format!("state-{config_suffix}.json"))
  }
}

/// What was true of a target at its last successful build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
  /// SHA-256 of the fully expanded recipe text.
  pub recipe_hash: String,

  /// Content hash of each normal prerequisite at build time.
  #[serde(default)]
  pub input_hashes: BTreeMap<String, String>,

  /// Content hash of the produced target file (file mode).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output_hash: Option<String>,

  /// Hash of the fingerprint command's stdout (fingerprint mode).
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fingerprint_hash: Option<String>,

  /// Normal prerequisites, in declared order.
  #[serde(default)]
  pub prereqs: Vec<String>,
}

/// The persisted target map, guarded for concurrent recording during a
/// parallel build.
#[derive(Debug, Default)]
pub struct BuildState {
  targets: RwLock<HashMap<String, TargetState>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDoc {
  targets: HashMap<String, TargetState>,
}

impl BuildState {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load state for the given config suffix. Any read or decode failure
  /// yields empty state.
  pub fn load(config_suffix: &str) -> Self {
    let path = state_file(config_suffix);
    let data = match std::fs::read(&path) {
      Ok(data) => data,
      Err(_) => return Self::default(),
    };
    match serde_json::from_slice::<StateDoc>(&data) {
      Ok(doc) => {
        debug!(path = %path.display(), targets = doc.targets.len(), "loaded build state");
        Self {
          targets: RwLock::new(doc.targets),
        }
      }
      Err(err) => {
        warn!(path = %path.display(), %err, "ignoring unreadable build state");
        Self::default()
      }
    }
  }

  /// Write state for the given config suffix.
  pub fn save(&self, config_suffix: &str) -> Result<(), StateError> {
    std::fs::create_dir_all(STATE_DIR)?;
    let doc = StateDoc {
      targets: self.targets.read().unwrap().clone(),
    };
    let data = serde_json::to_string_pretty(&doc)?;
    std::fs::write(state_file(config_suffix), data)?;
    Ok(())
  }

  /// The recorded state for a target, if any.
  pub fn get(&self, name: &str) -> Option<TargetState> {
    self.targets.read().unwrap().get(name).cloned()
  }

  /// Whether the target group needs rebuilding. Only normal prerequisites
  /// participate; a hashing failure counts as stale.
  pub fn is_stale(
    &self,
    targets: &[String],
    prereqs: &[String],
    recipe_text: &str,
    fingerprint: Option<&str>,
    cache: &HashCache,
  ) -> bool {
    let snapshots = self.snapshot_targets(targets);
    let recipe_hash = hash_str(recipe_text);

    for (target, snapshot) in targets.iter().zip(&snapshots) {
      let Some(ts) = snapshot else {
        return true;
      };

      if ts.recipe_hash != recipe_hash {
        return true;
      }

      match fingerprint {
        Some(cmd) => {
          // Fingerprint mode replaces both the target-file and the
          // prerequisite-hash checks.
          match run_fingerprint(cmd) {
            Ok(hash) => {
              if ts.fingerprint_hash.as_deref() != Some(hash.as_str()) {
                return true;
              }
            }
            Err(err) => {
              debug!(target, %err, "fingerprint command failed; treating as stale");
              return true;
            }
          }
        }
        None => {
          if !std::fs::exists(target).unwrap_or(false) {
            return true;
          }

          if sorted(prereqs) != sorted(&ts.prereqs) {
            return true;
          }

          for p in prereqs {
            match cache.hash(p) {
              Ok(hash) => {
                if ts.input_hashes.get(p) != Some(&hash) {
                  return true;
                }
              }
              Err(_) => return true,
            }
          }
        }
      }
    }

    false
  }

  /// Human-readable reasons the target group is stale, empty when it is up
  /// to date.
  pub fn why_stale(
    &self,
    targets: &[String],
    prereqs: &[String],
    recipe_text: &str,
    fingerprint: Option<&str>,
    cache: &HashCache,
  ) -> Vec<String> {
    let snapshots = self.snapshot_targets(targets);
    let recipe_hash = hash_str(recipe_text);
    let mut reasons = Vec::new();

    for (target, snapshot) in targets.iter().zip(&snapshots) {
      let Some(ts) = snapshot else {
        reasons.push(format!("{target}: no previous build recorded"));
        continue;
      };

      if ts.recipe_hash != recipe_hash {
        reasons.push("recipe has changed".to_string());
      }

      match fingerprint {
        Some(cmd) => match run_fingerprint(cmd) {
          Ok(hash) => {
            if ts.fingerprint_hash.as_deref() != Some(hash.as_str()) {
              reasons.push(format!("{target}: fingerprint has changed"));
            }
          }
          Err(err) => reasons.push(format!("{target}: fingerprint command failed: {err}")),
        },
        None => {
          if !std::fs::exists(target).unwrap_or(false) {
            reasons.push(format!("{target}: target file does not exist"));
          }

          if sorted(prereqs) != sorted(&ts.prereqs) {
            reasons.push("prerequisite set has changed".to_string());
          }

          for p in prereqs {
            match cache.hash(p) {
              Ok(hash) => {
                if ts.input_hashes.get(p) != Some(&hash) {
                  reasons.push(format!("prerequisite {p:?} has changed"));
                }
              }
              Err(err) => reasons.push(format!("cannot hash prerequisite {p:?}: {err}")),
            }
          }
        }
      }
    }

    reasons
  }

  /// Record a successful build for every target in the group. Hashing
  /// happens before the write lock is taken.
  pub fn record(
    &self,
    targets: &[String],
    prereqs: &[String],
    recipe_text: &str,
    fingerprint: Option<&str>,
    cache: &HashCache,
  ) {
    let recipe_hash = hash_str(recipe_text);

    let mut input_hashes = BTreeMap::new();
    for p in prereqs {
      if let Ok(hash) = cache.hash(p) {
        input_hashes.insert(p.clone(), hash);
      }
    }

    let fingerprint_hash = fingerprint.and_then(|cmd| run_fingerprint(cmd).ok());

    let mut states = Vec::with_capacity(targets.len());
    for target in targets {
      let output_hash = match fingerprint {
        Some(_) => None,
        None => cache.hash(target).ok(),
      };
      states.push((
        target.clone(),
        TargetState {
          recipe_hash: recipe_hash.clone(),
          input_hashes: input_hashes.clone(),
          output_hash,
          fingerprint_hash: fingerprint_hash.clone(),
          prereqs: prereqs.to_vec(),
        },
      ));
    }

    let mut map = self.targets.write().unwrap();
    for (target, ts) in states {
      map.insert(target, ts);
    }
  }

  fn snapshot_targets(&self, targets: &[String]) -> Vec<Option<TargetState>> {
    let map = self.targets.read().unwrap();
    targets.iter().map(|t| map.get(t).cloned()).collect()
  }
}

/// Run the fingerprint command and hash its stdout. Stderr passes through.
fn run_fingerprint(command: &str) -> io::Result<String> {
  let out = Command::new("sh")
    .arg("-c")
    .arg(command)
    .stdin(Stdio::null())
    .stderr(Stdio::inherit())
    .output()?;
  if !out.status.success() {
    return Err(io::Error::other(format!(
      "fingerprint command {command:?} exited with {}",
      out.status
    )));
  }
  Ok(hash_bytes(&out.stdout))
}

fn sorted(list: &[String]) -> Vec<&String> {
  let mut v: Vec<&String> = list.iter().collect();
  v.sort_unstable();
  v
}
