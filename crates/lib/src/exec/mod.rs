//! The recipe executor: parallel, single-flight, ordered output.
//!
//! Every target builds on its own task. A concurrent map of completion
//! channels deduplicates work: the first request for any output of a rule
//! registers the whole target group and runs it, later requests await the
//! shared outcome. Recipe concurrency is bounded by a semaphore sized from
//! the `-j` budget; with a budget of one, recipe output streams directly,
//! otherwise it is buffered and flushed under an output lock so recipes
//! never interleave.

mod recipe;

use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::graph::{Graph, GraphError, ResolvedRule};
use crate::hash::HashCache;
use crate::state::BuildState;
use crate::util::path_dir;

pub use recipe::{expand_fingerprint, expand_recipe};

/// Errors surfaced by a build. Cloneable so one outcome can be delivered to
/// every waiter of a single-flight entry; IO causes are carried as rendered
/// messages for that reason.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
  #[error("{0}")]
  Resolve(String),

  #[error("building {prereq:?} for {target:?}: {source}")]
  Prereq {
    prereq: String,
    target: String,
    #[source]
    source: Box<ExecError>,
  },

  #[error("creating directory {dir:?}: {message}")]
  CreateDir { dir: String, message: String },

  #[error("launching shell for {target:?}: {message}")]
  Spawn { target: String, message: String },

  #[error("recipe for {target:?} failed: {message}")]
  Recipe { target: String, message: String },

  #[error("build of {0:?} was abandoned")]
  Abandoned(String),
}

impl From<GraphError> for ExecError {
  fn from(err: GraphError) -> Self {
    ExecError::Resolve(err.to_string())
  }
}

/// Executor knobs, straight from the CLI.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
  pub verbose: bool,
  /// `-B`: rebuild unconditionally.
  pub force: bool,
  /// `-n`: print recipes instead of running them.
  pub dry_run: bool,
  /// `-j`: `>0` = limit, `0` = unlimited, `<0` = host CPU count.
  pub jobs: i64,
}

type BuildOutcome = Result<(), ExecError>;
type OutcomeRx = watch::Receiver<Option<BuildOutcome>>;
type BoxedBuild = Pin<Box<dyn Future<Output = BuildOutcome> + Send>>;

pub struct Executor {
  graph: Graph,
  state: Arc<BuildState>,
  opts: ExecOptions,
  building: Mutex<HashMap<String, OutcomeRx>>,
  sem: Option<Arc<Semaphore>>,
  serial: bool,
  output: Mutex<()>,
  cache: HashCache,
}

impl Executor {
  pub fn new(graph: Graph, state: Arc<BuildState>, opts: ExecOptions) -> Arc<Self> {
    let jobs = if opts.jobs < 0 {
      std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4) as i64
    } else {
      opts.jobs
    };

    let sem = (jobs > 0).then(|| Arc::new(Semaphore::new(jobs as usize)));

    Arc::new(Executor {
      graph,
      state,
      opts,
      building: Mutex::new(HashMap::new()),
      sem,
      serial: jobs == 1,
      output: Mutex::new(()),
      cache: HashCache::new(),
    })
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// Build a target and everything it depends on. Safe to call
  /// concurrently; concurrent requests for the same target share one
  /// execution.
  pub async fn build(self: &Arc<Self>, target: &str) -> BuildOutcome {
    self.clone().build_boxed(target.to_string()).await
  }

  fn build_boxed(self: Arc<Self>, target: String) -> BoxedBuild {
    Box::pin(async move {
      enum Role {
        Waiter(OutcomeRx),
        // The resolved rule travels with the sender so co-targets were
        // registered atomically with the resolve.
        Owner(watch::Sender<Option<BuildOutcome>>, ResolvedRule),
      }

      let role = {
        let mut building = self.building.lock().unwrap();
        if let Some(rx) = building.get(&target) {
          Role::Waiter(rx.clone())
        } else {
          let rule = self.graph.resolve(&target)?;
          let (tx, rx) = watch::channel(None);
          for t in &rule.targets {
            building.insert(t.clone(), rx.clone());
          }
          Role::Owner(tx, rule)
        }
      };

      match role {
        Role::Waiter(mut rx) => {
          let outcome = {
            let value = rx
              .wait_for(Option::is_some)
              .await
              .map_err(|_| ExecError::Abandoned(target.clone()))?;
            value.clone()
          };
          outcome.unwrap_or(Err(ExecError::Abandoned(target)))
        }
        Role::Owner(tx, rule) => {
          let result = self.do_build(&target, &rule).await;
          let _ = tx.send(Some(result.clone()));
          result
        }
      }
    })
  }

  async fn do_build(self: &Arc<Self>, target: &str, rule: &ResolvedRule) -> BuildOutcome {
    // Normal and order-only prerequisites build in parallel.
    let all_prereqs: Vec<String> = rule.prereqs.iter().chain(rule.order_only.iter()).cloned().collect();

    if !all_prereqs.is_empty() {
      let mut join = JoinSet::new();
      for (idx, prereq) in all_prereqs.iter().enumerate() {
        let exec = self.clone();
        let prereq = prereq.clone();
        join.spawn(async move { (idx, exec.build_boxed(prereq).await) });
      }

      let mut results: Vec<Option<BuildOutcome>> = vec![None; all_prereqs.len()];
      while let Some(joined) = join.join_next().await {
        match joined {
          Ok((idx, result)) => results[idx] = Some(result),
          Err(err) => error!(%err, "build task panicked"),
        }
      }

      // Report the first failure in declaration order.
      for (idx, result) in results.into_iter().enumerate() {
        if let Some(Err(err)) = result {
          return Err(ExecError::Prereq {
            prereq: all_prereqs[idx].clone(),
            target: target.to_string(),
            source: Box::new(err),
          });
        }
      }
    }

    // A leaf or prerequisite-only rule has nothing to run.
    if rule.recipe.is_empty() {
      return Ok(());
    }

    let recipe_text = expand_recipe(self.graph.vars(), rule, &self.state, &self.cache);
    let fingerprint = expand_fingerprint(self.graph.vars(), rule);

    // Tasks always run; -B skips the staleness check entirely.
    if !rule.is_task
      && !self.opts.force
      && !self
        .state
        .is_stale(&rule.targets, &rule.prereqs, &recipe_text, fingerprint.as_deref(), &self.cache)
    {
      debug!(target = %rule.target, "up to date");
      if self.opts.verbose {
        let _guard = self.output.lock().unwrap();
        eprintln!("mk: {:?} is up to date", rule.target);
      }
      return Ok(());
    }

    let _permit = match &self.sem {
      Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore closed")),
      None => None,
    };

    self.run_recipe(rule, &recipe_text, fingerprint.as_deref()).await
  }

  async fn run_recipe(&self, rule: &ResolvedRule, recipe_text: &str, fingerprint: Option<&str>) -> BuildOutcome {
    if !rule.is_task && !self.opts.dry_run {
      for target in &rule.targets {
        let dir = path_dir(target);
        if dir != "." && !dir.is_empty() {
          std::fs::create_dir_all(&dir).map_err(|e| ExecError::CreateDir {
            dir,
            message: e.to_string(),
          })?;
        }
      }
    }

    let mut banner = format!("mk: building {:?}\n", rule.target);
    if self.opts.verbose || self.opts.dry_run {
      for line in recipe_text.lines() {
        banner.push_str("  ");
        banner.push_str(line);
        banner.push('\n');
      }
    }

    if self.opts.dry_run {
      let _guard = self.output.lock().unwrap();
      eprint!("{banner}");
      return Ok(());
    }

    info!(target = %rule.target, "running recipe");

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(format!("set -e\n{recipe_text}"));
    cmd.env_clear();
    cmd.envs(self.graph.vars().environ());

    let status = if self.serial {
      // One recipe at a time: stream output directly.
      {
        let _guard = self.output.lock().unwrap();
        eprint!("{banner}");
      }
      cmd.status().await
    } else {
      // Parallel recipes: buffer, then flush atomically on completion.
      match cmd.output().await {
        Ok(out) => {
          let _guard = self.output.lock().unwrap();
          eprint!("{banner}");
          let _ = std::io::stdout().write_all(&out.stdout);
          let _ = std::io::stderr().write_all(&out.stderr);
          Ok(out.status)
        }
        Err(err) => Err(err),
      }
    };

    let status = status.map_err(|e| ExecError::Spawn {
      target: rule.target.clone(),
      message: e.to_string(),
    })?;

    if !status.success() {
      // Drop partial outputs so a later run does not trust them.
      if !rule.is_task && !rule.keep {
        for target in &rule.targets {
          let _ = std::fs::remove_file(target);
        }
      }
      return Err(ExecError::Recipe {
        target: rule.target.clone(),
        message: status.to_string(),
      });
    }

    if !rule.is_task {
      self
        .state
        .record(&rule.targets, &rule.prereqs, recipe_text, fingerprint, &self.cache);
    }

    Ok(())
  }
}

/// Explain why a target would rebuild, expanding the recipe through the
/// same path the executor uses so the compared recipe text is identical.
pub fn why_rebuild(graph: &Graph, state: &BuildState, target: &str) -> Result<Vec<String>, GraphError> {
  let rule = graph.resolve(target)?;
  if rule.recipe.is_empty() {
    return Ok(Vec::new());
  }

  let cache = HashCache::new();
  let recipe_text = expand_recipe(graph.vars(), &rule, state, &cache);
  let fingerprint = expand_fingerprint(graph.vars(), &rule);
  Ok(state.why_stale(&rule.targets, &rule.prereqs, &recipe_text, fingerprint.as_deref(), &cache))
}
