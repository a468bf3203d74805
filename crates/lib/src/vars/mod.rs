//! Variable store and `$`-expansion.
//!
//! Three maps share one namespace: eager values, lazy expressions (expanded
//! and promoted to eager on first read), and user-defined functions. The
//! store is seeded from the process environment, and every stored value is
//! exported back into the environment of executed recipes.
//!
//! [`Vars::expand`] rewrites a string in one left-to-right pass:
//!
//! | form            | meaning                                             |
//! |-----------------|-----------------------------------------------------|
//! | `$$`            | literal `$`                                         |
//! | `${name}`       | value of `name`                                     |
//! | `$[func args]`  | built-in or user function call                      |
//! | `$name`         | value of `name` (maximal identifier run)            |
//! | `$name.member`  | scoped variable `name.member`, else path property   |
//! | `$name:old=new` | suffix substitution over each word of the value     |
//! | `$(…)`          | untouched, passed through to the shell              |

mod funcs;

use std::collections::HashMap;

use crate::ast::FuncDef;
use crate::util::{is_ident_cont, is_ident_start, path_base, path_dir};

#[derive(Debug, Clone, Default)]
pub struct Vars {
  vals: HashMap<String, String>,
  lazy: HashMap<String, String>,
  funcs: HashMap<String, FuncDef>,
}

impl Vars {
  /// A store seeded from the process environment.
  pub fn new() -> Self {
    let mut vars = Self::default();
    for (k, v) in std::env::vars_os() {
      if let (Ok(k), Ok(v)) = (k.into_string(), v.into_string()) {
        vars.vals.insert(k, v);
      }
    }
    vars
  }

  /// An empty store, ignoring the environment. Mostly for tests.
  pub fn empty() -> Self {
    Self::default()
  }

  /// Set a variable immediately.
  pub fn set(&mut self, name: &str, value: &str) {
    self.vals.insert(name.to_string(), value.to_string());
    self.lazy.remove(name);
  }

  /// Store an expression for deferred evaluation.
  pub fn set_lazy(&mut self, name: &str, expr: &str) {
    self.lazy.insert(name.to_string(), expr.to_string());
    self.vals.remove(name);
  }

  /// Register a user-defined function.
  pub fn set_func(&mut self, def: FuncDef) {
    self.funcs.insert(def.name.clone(), def);
  }

  /// Append a word-separated value.
  pub fn append(&mut self, name: &str, value: &str) {
    let existing = self.get(name);
    if existing.is_empty() {
      self.set(name, value);
    } else {
      self.set(name, &format!("{existing} {value}"));
    }
  }

  /// Read a variable. A lazy expression is expanded once and promoted to an
  /// eager value. Unknown names read as empty.
  pub fn get(&mut self, name: &str) -> String {
    if let Some(expr) = self.lazy.remove(name) {
      let value = self.expand(&expr);
      self.vals.insert(name.to_string(), value.clone());
      return value;
    }
    self.vals.get(name).cloned().unwrap_or_default()
  }

  /// The eager values, as environment pairs for recipe execution.
  pub fn environ(&self) -> Vec<(String, String)> {
    self.vals.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
  }

  /// All values, resolving lazy expressions.
  pub fn snapshot(&mut self) -> HashMap<String, String> {
    let names: Vec<String> = self.lazy.keys().cloned().collect();
    for name in names {
      self.get(&name);
    }
    self.vals.clone()
  }

  /// Expand every `$` form in `s`.
  pub fn expand(&mut self, s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;

    while i < bytes.len() {
      if bytes[i] != b'$' {
        let next = s[i..].find('$').map_or(s.len(), |j| i + j);
        out.push_str(&s[i..next]);
        i = next;
        continue;
      }

      i += 1; // past the $
      if i >= bytes.len() {
        out.push('$');
        break;
      }

      match bytes[i] {
        b'$' => {
          out.push('$');
          i += 1;
        }

        b'{' => match s[i..].find('}') {
          Some(end) => {
            let name = s[i + 1..i + end].to_string();
            let value = self.get(&name);
            out.push_str(&value);
            i += end + 1;
          }
          None => {
            out.push_str("${");
            i += 1;
          }
        },

        b'[' => match find_matching_bracket(&s[i..]) {
          Some(end) => {
            let inner = s[i + 1..i + end].to_string();
            let value = self.eval_func(&inner);
            out.push_str(&value);
            i += end + 1;
          }
          None => {
            out.push_str("$[");
            i += 1;
          }
        },

        c if is_ident_start(c) => {
          let start = i;
          while i < bytes.len() && is_ident_cont(bytes[i]) {
            i += 1;
          }
          let name = s[start..i].to_string();
          let mut value = self.get(&name);

          // `.member`: scoped variable wins when bound non-empty, else a
          // path property of the value.
          if i + 1 < bytes.len() && bytes[i] == b'.' && is_ident_start(bytes[i + 1]) {
            let mstart = i + 1;
            let mut j = mstart;
            while j < bytes.len() && is_ident_cont(bytes[j]) {
              j += 1;
            }
            let member = &s[mstart..j];
            let scoped = self.get(&format!("{name}.{member}"));
            if !scoped.is_empty() {
              value = scoped;
              i = j;
              if i + 1 < bytes.len() && bytes[i] == b'.' && is_ident_start(bytes[i + 1]) {
                let pstart = i + 1;
                let mut k = pstart;
                while k < bytes.len() && is_ident_cont(bytes[k]) {
                  k += 1;
                }
                value = var_property(&value, &s[pstart..k]);
                i = k;
              }
            } else {
              value = var_property(&value, member);
              i = j;
            }
            out.push_str(&value);
            continue;
          }

          // `:old=new` substitution reference; the tail ends at the next
          // whitespace, and the `=` must appear before it.
          if i < bytes.len() && bytes[i] == b':' {
            let rest = &s[i + 1..];
            let ws = rest.find(char::is_whitespace).unwrap_or(rest.len());
            if let Some(eq) = rest[..ws].find('=') {
              let old = rest[..eq].to_string();
              let repl = rest[eq + 1..ws].to_string();
              value = substitute_suffix(&value, &old, &repl);
              i += 1 + ws;
            }
          }

          out.push_str(&value);
        }

        _ => out.push('$'),
      }
    }

    out
  }

  fn eval_func(&mut self, inner: &str) -> String {
    let (name, args) = match inner.split_once(' ') {
      Some((n, a)) => (n, a.trim()),
      None => (inner, ""),
    };

    match name {
      "wildcard" => self.func_wildcard(args),
      "shell" => self.func_shell(args),
      "patsubst" => self.func_patsubst(args),
      "subst" => self.func_subst(args),
      "filter" => self.func_filter(args),
      "filter-out" => self.func_filter_out(args),
      "dir" => self.func_dir(args),
      "notdir" => self.func_notdir(args),
      "basename" => self.func_basename(args),
      "suffix" => self.func_suffix(args),
      "addprefix" => self.func_addprefix(args),
      "addsuffix" => self.func_addsuffix(args),
      "sort" => self.func_sort(args),
      "word" => self.func_word(args),
      "words" => self.func_words(args),
      "strip" => self.func_strip(args),
      "findstring" => self.func_findstring(args),
      "if" => self.func_if(args),
      _ => match self.funcs.get(name).cloned() {
        Some(def) => self.call_user_func(&def, args),
        None => String::new(),
      },
    }
  }

  /// Invoke a user-defined function: expand the arguments, split into
  /// words, bind positionally (extras join into the last parameter), and
  /// expand the body in a cloned store.
  fn call_user_func(&mut self, def: &FuncDef, args: &str) -> String {
    let expanded = self.expand(args);
    let words: Vec<&str> = expanded.split_whitespace().collect();

    let mut child = self.clone();
    for (i, param) in def.params.iter().enumerate() {
      child.set(param, words.get(i).copied().unwrap_or(""));
    }
    if !def.params.is_empty() && words.len() > def.params.len() {
      let last = def.params.len() - 1;
      child.set(&def.params[last], &words[last..].join(" "));
    }

    child.expand(&def.body)
  }
}

/// `dir`/`file` path properties of a value.
fn var_property(value: &str, prop: &str) -> String {
  match prop {
    "dir" => path_dir(value),
    "file" => path_base(value),
    _ => String::new(),
  }
}

/// Replace the suffix `old` with `new` in every word that carries it.
fn substitute_suffix(value: &str, old: &str, new: &str) -> String {
  let old_pat = format!("%{old}");
  let new_pat = format!("%{new}");
  value
    .split_whitespace()
    .map(|w| funcs::patsubst_word(&old_pat, &new_pat, w))
    .collect::<Vec<_>>()
    .join(" ")
}

/// Index of the `]` matching the `[` at the start of `s`, respecting
/// nesting.
fn find_matching_bracket(s: &str) -> Option<usize> {
  let mut depth = 0usize;
  for (i, b) in s.bytes().enumerate() {
    match b {
      b'[' => depth += 1,
      b']' => {
        depth -= 1;
        if depth == 0 {
          return Some(i);
        }
      }
      _ => {}
    }
  }
  None
}
