//! Line-oriented parser for the buildfile language.
//!
//! Parsing runs in two passes: lines ending in a trailing backslash are
//! joined with their successor (the backslash becomes a single space), then
//! statements are dispatched by prefix. Blocks (`if`/`for`/`config`/`fn`
//! bodies, recipes) are delimited by indentation and the `end`/`else`/`elif`
//! keywords.

use thiserror::Error;

use crate::ast::{
  AssignOp, BuildFile, Cmp, CondBranch, CondTest, Conditional, ConfigDef, FuncDef, Include, Loop, RuleDecl, Stmt,
  VarAssign,
};
use crate::util::{is_ident_cont, is_ident_start};

#[derive(Debug, Error)]
pub enum ParseError {
  #[error("line {line}: unrecognized syntax: {text}")]
  UnrecognizedSyntax { line: usize, text: String },

  #[error("line {line}: unexpected indented line outside a rule")]
  UnexpectedIndent { line: usize },

  #[error("line {line}: recursive definition: {name} references itself")]
  RecursiveDefinition { line: usize, name: String },

  #[error("line {line}: invalid function definition: {text}")]
  InvalidFuncDef { line: usize, text: String },

  #[error("line {line}: function {name:?} has no return statement")]
  MissingReturn { line: usize, name: String },

  #[error("line {line}: config requires a name")]
  ConfigMissingName { line: usize },

  #[error("line {line}: unrecognized config property: {text}")]
  BadConfigProperty { line: usize, text: String },

  #[error("line {line}: invalid for loop syntax: {text}")]
  BadLoop { line: usize, text: String },

  #[error("line {line}: expected 'end' to close for loop, got: {text}")]
  LoopUnterminated { line: usize, text: String },

  #[error("line {line}: unexpected end of file in for loop")]
  LoopEof { line: usize },

  #[error("line {line}: unexpected end of file in conditional")]
  CondEof { line: usize },

  #[error("line {line}: expected comparison (== or !=), got: {text}")]
  BadCondExpr { line: usize, text: String },

  #[error("line {line}: include requires a path")]
  IncludeMissingPath { line: usize },
}

/// Parse a buildfile from text.
pub fn parse(input: &str) -> Result<BuildFile, ParseError> {
  let raw: Vec<&str> = input.lines().collect();

  // Join continuations: a trailing backslash merges the next line, with the
  // backslash itself replaced by a single space.
  let mut lines: Vec<(String, usize)> = Vec::new();
  let mut i = 0;
  while i < raw.len() {
    let start = i + 1;
    let mut line = raw[i].to_string();
    while line.ends_with('\\') && i + 1 < raw.len() {
      line.pop();
      line.push(' ');
      line.push_str(raw[i + 1]);
      i += 1;
    }
    lines.push((line, start));
    i += 1;
  }

  let mut p = Parser { lines, pos: 0 };
  let stmts = p.parse_block(false)?;
  Ok(BuildFile { stmts })
}

struct Parser {
  lines: Vec<(String, usize)>,
  pos: usize,
}

impl Parser {
  fn peek(&self) -> Option<&(String, usize)> {
    self.lines.get(self.pos)
  }

  fn parse_block(&mut self, in_block: bool) -> Result<Vec<Stmt>, ParseError> {
    let mut stmts = Vec::new();
    while let Some((line, lineno)) = self.peek() {
      let lineno = *lineno;
      let trimmed = line.trim();

      if trimmed.is_empty() || trimmed.starts_with('#') {
        self.pos += 1;
        continue;
      }

      // Block terminators are handled by the enclosing conditional/loop.
      if in_block && (trimmed == "end" || trimmed == "else" || trimmed.starts_with("elif ")) {
        break;
      }

      if !in_block && line.starts_with([' ', '\t']) {
        return Err(ParseError::UnexpectedIndent { line: lineno });
      }

      let trimmed = trimmed.to_string();
      if let Some(stmt) = self.parse_statement(&trimmed, lineno)? {
        stmts.push(stmt);
      }
    }
    Ok(stmts)
  }

  fn parse_statement(&mut self, trimmed: &str, lineno: usize) -> Result<Option<Stmt>, ParseError> {
    self.pos += 1; // consume the statement line

    if trimmed.starts_with("include ") {
      return parse_include(trimmed, lineno).map(Some);
    }

    if trimmed.starts_with("if ") {
      return self.parse_conditional(trimmed, lineno).map(Some);
    }

    if trimmed.starts_with("fn ") {
      return self.parse_func_def(trimmed, lineno).map(Some);
    }

    if trimmed.starts_with("config ") && trimmed.ends_with(':') {
      return self.parse_config_def(trimmed, lineno).map(Some);
    }

    if trimmed.starts_with("for ") && trimmed.ends_with(':') {
      return self.parse_loop(trimmed, lineno).map(Some);
    }

    if let Some(rest) = trimmed.strip_prefix("lazy ") {
      if let Some((name, value)) = parse_assign(rest) {
        if contains_var_ref(&value, &name) {
          return Err(ParseError::RecursiveDefinition { line: lineno, name });
        }
        return Ok(Some(Stmt::VarAssign(VarAssign {
          name,
          op: AssignOp::Set,
          value,
          lazy: true,
          line: lineno,
        })));
      }
    }

    if let Some((name, value)) = parse_assign(trimmed) {
      if contains_var_ref(&value, &name) {
        return Err(ParseError::RecursiveDefinition { line: lineno, name });
      }
      return Ok(Some(Stmt::VarAssign(VarAssign {
        name,
        op: AssignOp::Set,
        value,
        lazy: false,
        line: lineno,
      })));
    }
    if let Some((name, value)) = parse_op_assign(trimmed, "+=") {
      return Ok(Some(Stmt::VarAssign(VarAssign {
        name,
        op: AssignOp::Append,
        value,
        lazy: false,
        line: lineno,
      })));
    }
    if let Some((name, value)) = parse_op_assign(trimmed, "?=") {
      return Ok(Some(Stmt::VarAssign(VarAssign {
        name,
        op: AssignOp::CondSet,
        value,
        lazy: false,
        line: lineno,
      })));
    }

    if let Some(mut rule) = parse_rule_header(trimmed) {
      rule.recipe = self.parse_recipe();
      rule.line = lineno;
      return Ok(Some(Stmt::Rule(rule)));
    }

    Err(ParseError::UnrecognizedSyntax {
      line: lineno,
      text: trimmed.to_string(),
    })
  }

  fn parse_func_def(&mut self, line: &str, lineno: usize) -> Result<Stmt, ParseError> {
    // fn name(param1, param2):
    let rest = line.strip_prefix("fn ").unwrap_or(line);
    let (open, close) = match (rest.find('('), rest.find(')')) {
      (Some(o), Some(c)) if o < c => (o, c),
      _ => {
        return Err(ParseError::InvalidFuncDef {
          line: lineno,
          text: line.to_string(),
        });
      }
    };

    let name = rest[..open].trim().to_string();
    let params: Vec<String> = rest[open + 1..close]
      .split(',')
      .map(str::trim)
      .filter(|p| !p.is_empty())
      .map(str::to_string)
      .collect();

    // The last indented `return EXPR` line supplies the body.
    let mut body = String::new();
    while let Some((body_line, _)) = self.peek() {
      if body_line.is_empty() {
        self.pos += 1;
        continue;
      }
      if !body_line.starts_with([' ', '\t']) {
        break;
      }
      let trimmed = body_line.trim().to_string();
      self.pos += 1;
      if let Some(expr) = trimmed.strip_prefix("return ") {
        body = expr.trim().to_string();
      }
    }

    if body.is_empty() {
      return Err(ParseError::MissingReturn { line: lineno, name });
    }

    Ok(Stmt::FuncDef(FuncDef {
      name,
      params,
      body,
      line: lineno,
    }))
  }

  fn parse_config_def(&mut self, line: &str, lineno: usize) -> Result<Stmt, ParseError> {
    let name = line
      .strip_prefix("config ")
      .unwrap_or(line)
      .strip_suffix(':')
      .unwrap_or(line)
      .trim()
      .to_string();
    if name.is_empty() {
      return Err(ParseError::ConfigMissingName { line: lineno });
    }

    let mut cfg = ConfigDef {
      name,
      line: lineno,
      ..ConfigDef::default()
    };

    while let Some((body_line, body_lineno)) = self.peek() {
      let body_lineno = *body_lineno;
      if body_line.is_empty() {
        self.pos += 1;
        continue;
      }
      if !body_line.starts_with([' ', '\t']) {
        break;
      }
      let trimmed = body_line.trim().to_string();
      self.pos += 1;
      if trimmed.is_empty() {
        continue;
      }

      if let Some(rest) = trimmed.strip_prefix("excludes ") {
        cfg.excludes.extend(rest.split_whitespace().map(str::to_string));
      } else if let Some(rest) = trimmed.strip_prefix("requires ") {
        cfg.requires.extend(rest.split_whitespace().map(str::to_string));
      } else if let Some((name, value)) = parse_assign(&trimmed) {
        cfg.vars.push(VarAssign {
          name,
          op: AssignOp::Set,
          value,
          lazy: false,
          line: body_lineno,
        });
      } else if let Some((name, value)) = parse_op_assign(&trimmed, "+=") {
        cfg.vars.push(VarAssign {
          name,
          op: AssignOp::Append,
          value,
          lazy: false,
          line: body_lineno,
        });
      } else if let Some((name, value)) = parse_op_assign(&trimmed, "?=") {
        cfg.vars.push(VarAssign {
          name,
          op: AssignOp::CondSet,
          value,
          lazy: false,
          line: body_lineno,
        });
      } else {
        return Err(ParseError::BadConfigProperty {
          line: body_lineno,
          text: trimmed,
        });
      }
    }

    Ok(Stmt::ConfigDef(cfg))
  }

  fn parse_loop(&mut self, line: &str, lineno: usize) -> Result<Stmt, ParseError> {
    // for var in list:
    let inner = line
      .strip_prefix("for ")
      .unwrap_or(line)
      .strip_suffix(':')
      .unwrap_or(line);
    let (var, list) = inner.split_once(" in ").ok_or_else(|| ParseError::BadLoop {
      line: lineno,
      text: line.to_string(),
    })?;
    let var = var.trim().to_string();
    let list = list.trim().to_string();
    if var.is_empty() || list.is_empty() {
      return Err(ParseError::BadLoop {
        line: lineno,
        text: line.to_string(),
      });
    }

    let body = self.parse_block(true)?;

    let (term, term_line) = match self.peek() {
      Some((l, n)) => (l.trim().to_string(), *n),
      None => return Err(ParseError::LoopEof { line: lineno }),
    };
    if term != "end" {
      return Err(ParseError::LoopUnterminated {
        line: term_line,
        text: term,
      });
    }
    self.pos += 1;

    Ok(Stmt::Loop(Loop {
      var,
      list,
      body,
      line: lineno,
    }))
  }

  fn parse_conditional(&mut self, line: &str, lineno: usize) -> Result<Stmt, ParseError> {
    let mut cond = Conditional {
      branches: Vec::new(),
      line: lineno,
    };
    let mut test = parse_cond_expr(line, lineno)?;

    loop {
      let body = self.parse_block(true)?;
      cond.branches.push(CondBranch { test, body });

      let (term, term_line) = match self.peek() {
        Some((l, n)) => (l.trim().to_string(), *n),
        None => return Err(ParseError::CondEof { line: lineno }),
      };
      self.pos += 1;

      if term == "end" {
        break;
      }
      test = parse_cond_expr(&term, term_line)?;
    }

    Ok(Stmt::Conditional(cond))
  }

  /// Collect the run of indented lines following a rule header. The first
  /// recipe line's leading whitespace is stripped from every line so
  /// relative indentation survives.
  fn parse_recipe(&mut self) -> Vec<String> {
    let mut lines = Vec::new();
    let mut indent: Option<String> = None;
    while let Some((line, _)) = self.peek() {
      if line.is_empty() {
        self.pos += 1;
        continue;
      }
      if !line.starts_with([' ', '\t']) {
        break;
      }
      let line = line.clone();
      self.pos += 1;
      let prefix = indent.get_or_insert_with(|| {
        let end = line.len() - line.trim_start_matches([' ', '\t']).len();
        line[..end].to_string()
      });
      lines.push(line.strip_prefix(prefix.as_str()).unwrap_or(&line).to_string());
    }
    lines
  }
}

fn parse_cond_expr(line: &str, lineno: usize) -> Result<CondTest, ParseError> {
  if line == "else" {
    return Ok(CondTest::Else);
  }

  let rest = line
    .strip_prefix("if ")
    .or_else(|| line.strip_prefix("elif "))
    .ok_or_else(|| ParseError::BadCondExpr {
      line: lineno,
      text: line.to_string(),
    })?;

  if let Some((left, right)) = rest.split_once(" == ") {
    return Ok(CondTest::Cmp {
      left: left.trim().to_string(),
      cmp: Cmp::Eq,
      right: right.trim().to_string(),
    });
  }
  if let Some((left, right)) = rest.split_once(" != ") {
    return Ok(CondTest::Cmp {
      left: left.trim().to_string(),
      cmp: Cmp::Ne,
      right: right.trim().to_string(),
    });
  }

  Err(ParseError::BadCondExpr {
    line: lineno,
    text: rest.to_string(),
  })
}

/// `name = value`, rejecting `+=`/`?=`/`!=` forms and rule headers (a `:`
/// before the `=`).
fn parse_assign(line: &str) -> Option<(String, String)> {
  let bytes = line.as_bytes();
  for i in 0..bytes.len() {
    if bytes[i] != b'=' {
      continue;
    }
    if i > 0 && matches!(bytes[i - 1], b'+' | b'!' | b'?') {
      return None;
    }
    let prefix = &line[..i];
    if prefix.contains(':') {
      return None;
    }
    let name = prefix.trim();
    if !is_valid_var_name(name) {
      return None;
    }
    return Some((name.to_string(), line[i + 1..].trim().to_string()));
  }
  None
}

/// `name += value` / `name ?= value`.
fn parse_op_assign(line: &str, op: &str) -> Option<(String, String)> {
  let idx = line.find(op)?;
  let prefix = &line[..idx];
  if prefix.contains(':') {
    return None;
  }
  let name = prefix.trim();
  if !is_valid_var_name(name) {
    return None;
  }
  Some((name.to_string(), line[idx + op.len()..].trim().to_string()))
}

/// `[!]TARGETS [annotations] : PREREQS [| ORDER-ONLY]`. The rule separator
/// is the first `:` at bracket depth zero so `[fingerprint: …]` may contain
/// colons.
fn parse_rule_header(line: &str) -> Option<RuleDecl> {
  let (is_task, line) = match line.strip_prefix('!') {
    Some(rest) => (true, rest),
    None => (false, line),
  };

  let mut colon_idx = None;
  let mut depth = 0usize;
  for (i, b) in line.bytes().enumerate() {
    match b {
      b'[' => depth += 1,
      b']' => depth = depth.saturating_sub(1),
      b':' if depth == 0 => {
        colon_idx = Some(i);
        break;
      }
      _ => {}
    }
  }
  let colon_idx = colon_idx?;

  let mut target_str = line[..colon_idx].trim().to_string();
  let prereq_str = line[colon_idx + 1..].trim();

  if target_str.is_empty() {
    return None;
  }

  let mut fingerprint = None;
  if let Some(idx) = target_str.find("[fingerprint:") {
    if let Some(end) = target_str[idx..].find(']') {
      let cmd = target_str[idx + "[fingerprint:".len()..idx + end].trim().to_string();
      fingerprint = Some(cmd);
      target_str = format!("{}{}", &target_str[..idx], &target_str[idx + end + 1..])
        .trim()
        .to_string();
    }
  }

  let mut keep = false;
  if let Some(idx) = target_str.find("[keep]") {
    keep = true;
    target_str = format!("{}{}", &target_str[..idx], &target_str[idx + "[keep]".len()..])
      .trim()
      .to_string();
  }

  let targets: Vec<String> = target_str.split_whitespace().map(str::to_string).collect();

  let (normal_str, order_only_str) = match prereq_str.split_once('|') {
    Some((n, o)) => (n, o),
    None => (prereq_str, ""),
  };
  let prereqs: Vec<String> = normal_str.split_whitespace().map(str::to_string).collect();
  let order_only: Vec<String> = order_only_str.split_whitespace().map(str::to_string).collect();

  Some(RuleDecl {
    targets,
    prereqs,
    order_only,
    recipe: Vec::new(),
    is_task,
    keep,
    fingerprint,
    line: 0,
  })
}

fn parse_include(line: &str, lineno: usize) -> Result<Stmt, ParseError> {
  let rest = line.strip_prefix("include ").unwrap_or(line);
  let parts: Vec<&str> = rest.split_whitespace().collect();
  if parts.is_empty() {
    return Err(ParseError::IncludeMissingPath { line: lineno });
  }

  let alias = if parts.len() >= 3 && parts[1] == "as" {
    Some(parts[2].to_string())
  } else {
    None
  };
  Ok(Stmt::Include(Include {
    path: parts[0].to_string(),
    alias,
    line: lineno,
  }))
}

/// Whether the value references `$name` (maximal identifier run) or
/// `${name}`. Used to reject self-referential definitions at parse time.
fn contains_var_ref(value: &str, name: &str) -> bool {
  let bytes = value.as_bytes();
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] != b'$' {
      i += 1;
      continue;
    }
    i += 1;
    if i >= bytes.len() {
      break;
    }
    if bytes[i] == b'{' {
      if let Some(end) = value[i..].find('}') {
        if &value[i + 1..i + end] == name {
          return true;
        }
      }
      i += 1;
    } else if is_ident_start(bytes[i]) {
      let start = i;
      while i < bytes.len() && is_ident_cont(bytes[i]) {
        i += 1;
      }
      if &value[start..i] == name {
        return true;
      }
    } else {
      i += 1;
    }
  }
  false
}

fn is_valid_var_name(name: &str) -> bool {
  let bytes = name.as_bytes();
  let Some(&first) = bytes.first() else {
    return false;
  };
  if !is_ident_start(first) {
    return false;
  }
  bytes[1..]
    .iter()
    .all(|&c| is_ident_cont(c) || matches!(c, b'$' | b'{' | b'}'))
}
