//! The dependency graph: AST evaluation, rule registration, includes, and
//! build configurations.
//!
//! Evaluation walks the statement list in order, mutating the variable
//! store and registering rules. Rules are kept twice: expanded (explicit
//! rules and parsed pattern rules, used by the resolver) and raw (the AST
//! node plus the scope prefix it was registered under), so the whole
//! registry can be re-expanded after config variable overrides apply.

mod dot;
mod resolve;

use std::collections::HashMap;
use std::io;

use thiserror::Error;
use tracing::debug;

use crate::ast::{AssignOp, BuildFile, Cmp, CondTest, Conditional, ConfigDef, Include, Loop, RuleDecl, Stmt};
use crate::parse::{self, ParseError};
use crate::pattern::{Pattern, PatternError};
use crate::stdlib;
use crate::util::{join_path, path_dir, rel_path};
use crate::vars::Vars;

pub use dot::dot_graph;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error(transparent)]
  Pattern(#[from] PatternError),

  #[error("unknown config {0:?}")]
  UnknownConfig(String),

  #[error("config {config:?} excludes {other:?}; cannot use both")]
  ConfigConflict { config: String, other: String },

  #[error("cannot open {path}: {source}")]
  IncludeOpen { path: String, source: io::Error },

  #[error("parsing {path}: {source}")]
  IncludeParse { path: String, source: ParseError },

  #[error("include glob {pattern:?}: {source}")]
  IncludeGlob {
    pattern: String,
    source: glob::PatternError,
  },

  #[error("ambiguous pattern rules for {target:?}: multiple rules have recipes")]
  AmbiguousRules { target: String },

  #[error("no rule to build {0:?}")]
  NoRule(String),
}

/// A rule ready for execution: concrete targets and prerequisites, with the
/// stem bound when it came from a pattern match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRule {
  /// First listed target; what `$target` expands to.
  pub target: String,
  /// Every output of the (possibly multi-output) rule.
  pub targets: Vec<String>,
  pub prereqs: Vec<String>,
  pub order_only: Vec<String>,
  pub recipe: Vec<String>,
  pub is_task: bool,
  pub keep: bool,
  pub fingerprint: Option<String>,
  /// First capture value of the matched target pattern.
  pub stem: Option<String>,
}

#[derive(Debug, Clone)]
struct PatternRule {
  target_patterns: Vec<Pattern>,
  prereq_patterns: Vec<Pattern>,
  order_only_patterns: Vec<Pattern>,
  recipe: Vec<String>,
  keep: bool,
  fingerprint: Option<String>,
}

#[derive(Debug, Clone)]
struct RawRule {
  rule: RuleDecl,
  scope_prefix: String,
}

/// The evaluated graph for one invocation.
#[derive(Debug, Default)]
pub struct Graph {
  rules: Vec<ResolvedRule>,
  patterns: Vec<PatternRule>,
  vars: Vars,
  scope_prefix: String,
  raw_rules: Vec<RawRule>,
  configs: HashMap<String, ConfigDef>,
  active_configs: Vec<String>,
}

impl Graph {
  /// Evaluate a parsed buildfile, then apply the active configs in CLI
  /// order and re-expand the rule registry under the new variable values.
  pub fn build(file: &BuildFile, vars: Vars, active_configs: &[String]) -> Result<Graph, GraphError> {
    let mut graph = Graph {
      vars,
      active_configs: active_configs.to_vec(),
      ..Graph::default()
    };

    graph.evaluate(&file.stmts)?;

    if !graph.active_configs.is_empty() {
      graph.apply_configs()?;
      graph.re_expand_rules()?;
    }

    debug!(
      rules = graph.rules.len(),
      patterns = graph.patterns.len(),
      configs = graph.configs.len(),
      "graph evaluated"
    );
    Ok(graph)
  }

  /// The variable store as left by evaluation.
  pub fn vars(&self) -> &Vars {
    &self.vars
  }

  /// First non-task explicit target, else the first explicit target.
  pub fn default_target(&self) -> Option<String> {
    self
      .rules
      .iter()
      .find(|r| !r.is_task)
      .or_else(|| self.rules.first())
      .map(|r| r.target.clone())
  }

  /// Every explicit target, in declaration order.
  pub fn targets(&self) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    self
      .rules
      .iter()
      .flat_map(|r| r.targets.iter())
      .filter(|t| seen.insert(t.as_str().to_string()))
      .cloned()
      .collect()
  }

  /// Registered config names, sorted.
  pub fn config_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.configs.keys().cloned().collect();
    names.sort_unstable();
    names
  }

  /// Targets that active configs require to be built first.
  pub fn config_requires(&self) -> Vec<String> {
    self
      .active_configs
      .iter()
      .filter_map(|name| self.configs.get(name))
      .flat_map(|cfg| cfg.requires.iter().cloned())
      .collect()
  }

  fn evaluate(&mut self, stmts: &[Stmt]) -> Result<(), GraphError> {
    for stmt in stmts {
      self.eval_stmt(stmt)?;
    }
    Ok(())
  }

  fn eval_stmt(&mut self, stmt: &Stmt) -> Result<(), GraphError> {
    match stmt {
      Stmt::VarAssign(va) => {
        // Names can be computed (cflags_$config).
        let name = self.vars.expand(&va.name);
        match va.op {
          AssignOp::Set if va.lazy => self.vars.set_lazy(&name, &va.value),
          AssignOp::Set => {
            let value = self.vars.expand(&va.value);
            self.vars.set(&name, &value);
          }
          AssignOp::Append => {
            let value = self.vars.expand(&va.value);
            self.vars.append(&name, &value);
          }
          AssignOp::CondSet => {
            let value = self.vars.expand(&va.value);
            if self.vars.get(&name).is_empty() {
              self.vars.set(&name, &value);
            }
          }
        }
        Ok(())
      }

      Stmt::Rule(rule) => self.add_rule(rule),

      Stmt::Conditional(cond) => self.eval_conditional(cond),

      Stmt::Include(inc) => self.eval_include(inc),

      Stmt::FuncDef(def) => {
        self.vars.set_func(def.clone());
        Ok(())
      }

      Stmt::ConfigDef(cfg) => {
        self.configs.insert(cfg.name.clone(), cfg.clone());
        Ok(())
      }

      Stmt::Loop(l) => self.eval_loop(l),
    }
  }

  fn eval_loop(&mut self, l: &Loop) -> Result<(), GraphError> {
    let list = self.vars.expand(&l.list);
    for item in list.split_whitespace() {
      self.vars.set(&l.var, item);
      self.evaluate(&l.body)?;
    }
    Ok(())
  }

  fn eval_conditional(&mut self, cond: &Conditional) -> Result<(), GraphError> {
    for branch in &cond.branches {
      match &branch.test {
        CondTest::Else => return self.evaluate(&branch.body),
        CondTest::Cmp { left, cmp, right } => {
          let left = self.vars.expand(left);
          let right = self.vars.expand(right);
          let matched = match cmp {
            Cmp::Eq => left == right,
            Cmp::Ne => left != right,
          };
          if matched {
            return self.evaluate(&branch.body);
          }
        }
      }
    }
    Ok(())
  }

  fn add_rule(&mut self, rule: &RuleDecl) -> Result<(), GraphError> {
    // Keep the raw node for re-expansion after config application.
    self.raw_rules.push(RawRule {
      rule: rule.clone(),
      scope_prefix: self.scope_prefix.clone(),
    });

    let mut targets = self.expand_words(&rule.targets);
    let mut prereqs = self.expand_words(&rule.prereqs);
    let mut order_only = self.expand_words(&rule.order_only);

    if !self.scope_prefix.is_empty() {
      let prefix = self.scope_prefix.clone();
      for list in [&mut targets, &mut prereqs, &mut order_only] {
        for item in list.iter_mut() {
          *item = join_path(&prefix, item);
        }
      }
    }

    let Some(first) = targets.first().cloned() else {
      return Ok(());
    };

    let is_pattern = targets
      .iter()
      .map(|t| Pattern::parse(t).map(|p| p.is_pattern()))
      .collect::<Result<Vec<_>, _>>()?
      .into_iter()
      .any(|p| p);

    if is_pattern {
      let parse_all = |items: &[String]| -> Result<Vec<Pattern>, PatternError> {
        items.iter().map(|s| Pattern::parse(s)).collect()
      };
      self.patterns.push(PatternRule {
        target_patterns: parse_all(&targets)?,
        prereq_patterns: parse_all(&prereqs)?,
        order_only_patterns: parse_all(&order_only)?,
        recipe: rule.recipe.clone(),
        keep: rule.keep,
        fingerprint: rule.fingerprint.clone(),
      });
    } else {
      self.rules.push(ResolvedRule {
        target: first,
        targets,
        prereqs,
        order_only,
        recipe: rule.recipe.clone(),
        is_task: rule.is_task,
        keep: rule.keep,
        fingerprint: rule.fingerprint.clone(),
        stem: None,
      });
    }

    Ok(())
  }

  fn expand_words(&mut self, items: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for item in items {
      let expanded = self.vars.expand(item);
      out.extend(expanded.split_whitespace().map(str::to_string));
    }
    out
  }

  fn eval_include(&mut self, inc: &Include) -> Result<(), GraphError> {
    let path = self.vars.expand(&inc.path);

    // `include {dir}/mkfile as {dir}`: discover scoped includes by glob.
    if path.contains('{') {
      return self.eval_pattern_include(&path);
    }

    let path = if self.scope_prefix.is_empty() {
      path
    } else {
      join_path(&self.scope_prefix, &path)
    };
    self.do_include(&path, inc.alias.as_deref())
  }

  fn eval_pattern_include(&mut self, pattern: &str) -> Result<(), GraphError> {
    // Each {…} capture globs as *.
    let mut glob_pattern = pattern.to_string();
    while let Some(start) = glob_pattern.find('{') {
      let Some(end) = glob_pattern[start..].find('}') else {
        break;
      };
      glob_pattern.replace_range(start..start + end + 1, "*");
    }

    if !self.scope_prefix.is_empty() {
      glob_pattern = join_path(&self.scope_prefix, &glob_pattern);
    }

    let entries = glob::glob(&glob_pattern).map_err(|source| GraphError::IncludeGlob {
      pattern: glob_pattern.clone(),
      source,
    })?;

    for entry in entries.flatten() {
      let matched = entry.to_string_lossy().into_owned();
      let dir = path_dir(&matched);
      let alias = if self.scope_prefix.is_empty() {
        dir
      } else {
        rel_path(&self.scope_prefix, &dir)
      };
      debug!(path = %matched, alias = %alias, "discovered include");
      self.do_include(&matched, Some(&alias))?;
    }
    Ok(())
  }

  fn do_include(&mut self, path: &str, alias: Option<&str>) -> Result<(), GraphError> {
    let text = match std::fs::read_to_string(path) {
      Ok(text) => text,
      Err(source) => match stdlib::lookup(path) {
        Some(text) => text.to_string(),
        None => {
          return Err(GraphError::IncludeOpen {
            path: path.to_string(),
            source,
          });
        }
      },
    };

    let file = parse::parse(&text).map_err(|source| GraphError::IncludeParse {
      path: path.to_string(),
      source,
    })?;

    match alias {
      // Unscoped: paste into the current scope.
      None => self.evaluate(&file.stmts),
      Some(alias) => self.eval_scoped_include(path, alias, &file),
    }
  }

  /// Evaluate an include in a child store cloned from the parent; rules get
  /// the included file's directory as their scope prefix, and every name
  /// the child sets or changes is exported to the parent as `alias.name`.
  fn eval_scoped_include(&mut self, path: &str, alias: &str, file: &BuildFile) -> Result<(), GraphError> {
    let parent_snapshot = self.vars.snapshot();
    let child_vars = self.vars.clone();
    let parent_vars = std::mem::replace(&mut self.vars, child_vars);

    let mut prefix = path_dir(path);
    if prefix == "." {
      prefix = alias.to_string();
    }
    let parent_prefix = std::mem::replace(&mut self.scope_prefix, prefix);

    let result = self.evaluate(&file.stmts);

    let child_snapshot = self.vars.snapshot();
    self.vars = parent_vars;
    self.scope_prefix = parent_prefix;

    for (name, value) in child_snapshot {
      if parent_snapshot.get(&name) != Some(&value) {
        self.vars.set(&format!("{alias}.{name}"), &value);
      }
    }

    result
  }

  fn apply_configs(&mut self) -> Result<(), GraphError> {
    for name in &self.active_configs {
      if !self.configs.contains_key(name) {
        return Err(GraphError::UnknownConfig(name.clone()));
      }
    }

    for name in &self.active_configs {
      let cfg = &self.configs[name];
      for excluded in &cfg.excludes {
        if let Some(other) = self.active_configs.iter().find(|c| *c == excluded) {
          return Err(GraphError::ConfigConflict {
            config: name.clone(),
            other: other.clone(),
          });
        }
      }
    }

    // Variable overrides apply in CLI order.
    let overrides: Vec<_> = self
      .active_configs
      .iter()
      .flat_map(|name| self.configs[name].vars.clone())
      .collect();
    for va in overrides {
      let value = self.vars.expand(&va.value);
      match va.op {
        AssignOp::Set => self.vars.set(&va.name, &value),
        AssignOp::Append => self.vars.append(&va.name, &value),
        AssignOp::CondSet => {
          if self.vars.get(&va.name).is_empty() {
            self.vars.set(&va.name, &value);
          }
        }
      }
    }

    // Keep per-config build trees apart.
    let builddir = self.vars.get("builddir");
    if !builddir.is_empty() {
      let suffixed = format!("{builddir}-{}", self.active_configs.join("-"));
      debug!(builddir = %suffixed, "suffixed builddir for active configs");
      self.vars.set("builddir", &suffixed);
    }

    Ok(())
  }

  /// Rebuild the rule registry from the raw rules under the post-config
  /// variable values.
  fn re_expand_rules(&mut self) -> Result<(), GraphError> {
    let saved = std::mem::take(&mut self.raw_rules);
    self.rules.clear();
    self.patterns.clear();

    for raw in saved {
      let prev = std::mem::replace(&mut self.scope_prefix, raw.scope_prefix.clone());
      let result = self.add_rule(&raw.rule);
      self.scope_prefix = prev;
      result?;
    }
    Ok(())
  }
}
