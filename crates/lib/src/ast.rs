//! AST for the buildfile language.
//!
//! A buildfile parses into a flat list of [`Stmt`] nodes. Bodies of
//! conditionals and loops nest their own statement lists. Every node keeps
//! the 1-based source line it started on for error reporting.

/// A parsed buildfile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFile {
  pub stmts: Vec<Stmt>,
}

/// A top-level or block-level statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
  VarAssign(VarAssign),
  Rule(RuleDecl),
  Conditional(Conditional),
  Include(Include),
  FuncDef(FuncDef),
  ConfigDef(ConfigDef),
  Loop(Loop),
}

impl Stmt {
  /// Source line the statement started on.
  pub fn line(&self) -> usize {
    match self {
      Stmt::VarAssign(n) => n.line,
      Stmt::Rule(n) => n.line,
      Stmt::Conditional(n) => n.line,
      Stmt::Include(n) => n.line,
      Stmt::FuncDef(n) => n.line,
      Stmt::ConfigDef(n) => n.line,
      Stmt::Loop(n) => n.line,
    }
  }
}

/// Assignment operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
  /// `name = value`
  Set,
  /// `name += value`
  Append,
  /// `name ?= value` (set only if currently empty)
  CondSet,
}

/// `name = value`, `name += value`, `name ?= value`, `lazy name = value`.
///
/// The name may itself contain variable references (`cflags_$config`); it is
/// expanded at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarAssign {
  pub name: String,
  pub op: AssignOp,
  pub value: String,
  pub lazy: bool,
  pub line: usize,
}

/// A build rule: `[!]targets [annotations] : prereqs [| order-only]` plus an
/// indented recipe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDecl {
  pub targets: Vec<String>,
  pub prereqs: Vec<String>,
  /// Prerequisites after `|`: built, but never part of staleness or `$inputs`.
  pub order_only: Vec<String>,
  pub recipe: Vec<String>,
  /// `!` prefix: always run, not a file.
  pub is_task: bool,
  /// `[keep]`: don't delete targets when the recipe fails.
  pub keep: bool,
  /// `[fingerprint: command]`: hash the command's stdout instead of files.
  pub fingerprint: Option<String>,
  pub line: usize,
}

/// `include PATH [as NAME]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
  pub path: String,
  pub alias: Option<String>,
  pub line: usize,
}

/// `if`/`elif`/`else`/`end`. Only the first matching branch executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditional {
  pub branches: Vec<CondBranch>,
  pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondBranch {
  pub test: CondTest,
  pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CondTest {
  Cmp { left: String, cmp: Cmp, right: String },
  Else,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
  Eq,
  Ne,
}

/// `fn name(params): ... return expr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncDef {
  pub name: String,
  pub params: Vec<String>,
  /// The return expression, expanded in a child scope at call time.
  pub body: String,
  pub line: usize,
}

/// `config name:` with `excludes`, `requires`, and variable overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDef {
  pub name: String,
  pub excludes: Vec<String>,
  pub requires: Vec<String>,
  pub vars: Vec<VarAssign>,
  pub line: usize,
}

/// `for var in list: ... end`. The list expression stays unexpanded until
/// evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loop {
  pub var: String,
  pub list: String,
  pub body: Vec<Stmt>,
  pub line: usize,
}
