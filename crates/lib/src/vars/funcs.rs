//! Built-in functions reachable through `$[func args]`.
//!
//! Multi-argument functions separate arguments with `,`; list arguments are
//! whitespace-separated words. Pattern arguments use `%` as the single
//! wildcard with literal prefix/suffix matching.

use std::process::Command;

use super::Vars;
use crate::util::{path_base, path_dir, path_ext};

impl Vars {
  /// `$[wildcard pattern…]` — filesystem glob, space-joined matches.
  pub(super) fn func_wildcard(&mut self, args: &str) -> String {
    let expanded = self.expand(args);
    let mut all = Vec::new();
    for pat in expanded.split_whitespace() {
      let Ok(paths) = glob::glob(pat) else {
        return String::new();
      };
      for path in paths.flatten() {
        all.push(path.to_string_lossy().into_owned());
      }
    }
    all.join(" ")
  }

  /// `$[shell cmd]` — stdout of a shell command, newlines collapsed to
  /// spaces. A failing command expands empty.
  pub(super) fn func_shell(&mut self, args: &str) -> String {
    let cmd = self.expand(args);
    let Ok(out) = Command::new("sh").arg("-c").arg(&cmd).output() else {
      return String::new();
    };
    if !out.status.success() {
      return String::new();
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    stdout.trim().replace('\n', " ")
  }

  /// `$[patsubst pattern,replacement,text]`.
  pub(super) fn func_patsubst(&mut self, args: &str) -> String {
    let parts: Vec<&str> = args.splitn(3, ',').collect();
    if parts.len() != 3 {
      return String::new();
    }
    let pattern = parts[0].trim().to_string();
    let replacement = parts[1].trim().to_string();
    let text = self.expand(parts[2]);
    text
      .split_whitespace()
      .map(|w| patsubst_word(&pattern, &replacement, w))
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// `$[subst from,to,text]` — plain string replacement.
  pub(super) fn func_subst(&mut self, args: &str) -> String {
    let parts: Vec<&str> = args.splitn(3, ',').collect();
    if parts.len() != 3 {
      return String::new();
    }
    let from = parts[0].trim().to_string();
    let to = parts[1].trim().to_string();
    self.expand(parts[2]).trim().replace(&from, &to)
  }

  /// `$[filter pattern,text]` — words matching the `%` pattern.
  pub(super) fn func_filter(&mut self, args: &str) -> String {
    self.filter_impl(args, true)
  }

  /// `$[filter-out pattern,text]` — words not matching the `%` pattern.
  pub(super) fn func_filter_out(&mut self, args: &str) -> String {
    self.filter_impl(args, false)
  }

  fn filter_impl(&mut self, args: &str, want_match: bool) -> String {
    let Some((pattern, text)) = args.split_once(',') else {
      return String::new();
    };
    let pattern = pattern.trim().to_string();
    let text = self.expand(text);
    text
      .split_whitespace()
      .filter(|w| patsubst_match(&pattern, w) == want_match)
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// `$[dir names…]` — directory part with trailing `/`; `.` becomes `./`.
  pub(super) fn func_dir(&mut self, args: &str) -> String {
    let text = self.expand(args);
    text
      .split_whitespace()
      .map(|w| {
        let d = path_dir(w);
        if d == "." { "./".to_string() } else { format!("{d}/") }
      })
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// `$[notdir names…]` — final path components.
  pub(super) fn func_notdir(&mut self, args: &str) -> String {
    let text = self.expand(args);
    text
      .split_whitespace()
      .map(path_base)
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// `$[basename names…]` — names with their last extension stripped.
  pub(super) fn func_basename(&mut self, args: &str) -> String {
    let text = self.expand(args);
    text
      .split_whitespace()
      .map(|w| w[..w.len() - path_ext(w).len()].to_string())
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// `$[suffix names…]` — the non-empty extensions.
  pub(super) fn func_suffix(&mut self, args: &str) -> String {
    let text = self.expand(args);
    text
      .split_whitespace()
      .map(path_ext)
      .filter(|e| !e.is_empty())
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// `$[addprefix prefix,names]`.
  pub(super) fn func_addprefix(&mut self, args: &str) -> String {
    let Some((prefix, text)) = args.split_once(',') else {
      return String::new();
    };
    let prefix = prefix.trim().to_string();
    let text = self.expand(text);
    text
      .split_whitespace()
      .map(|w| format!("{prefix}{w}"))
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// `$[addsuffix suffix,names]`.
  pub(super) fn func_addsuffix(&mut self, args: &str) -> String {
    let Some((suffix, text)) = args.split_once(',') else {
      return String::new();
    };
    let suffix = suffix.trim().to_string();
    let text = self.expand(text);
    text
      .split_whitespace()
      .map(|w| format!("{w}{suffix}"))
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// `$[sort list]` — sorted and deduplicated.
  pub(super) fn func_sort(&mut self, args: &str) -> String {
    let text = self.expand(args);
    let mut words: Vec<&str> = text.split_whitespace().collect();
    words.sort_unstable();
    words.dedup();
    words.join(" ")
  }

  /// `$[word n,text]` — the 1-indexed nth word.
  pub(super) fn func_word(&mut self, args: &str) -> String {
    let Some((n, text)) = args.split_once(',') else {
      return String::new();
    };
    let Ok(n) = n.trim().parse::<usize>() else {
      return String::new();
    };
    if n < 1 {
      return String::new();
    }
    let text = self.expand(text);
    text.split_whitespace().nth(n - 1).unwrap_or("").to_string()
  }

  /// `$[words text]` — the word count.
  pub(super) fn func_words(&mut self, args: &str) -> String {
    self.expand(args).split_whitespace().count().to_string()
  }

  /// `$[strip text]` — whitespace normalized to single spaces.
  pub(super) fn func_strip(&mut self, args: &str) -> String {
    self.expand(args).split_whitespace().collect::<Vec<_>>().join(" ")
  }

  /// `$[findstring find,in]` — `find` when it occurs in `in`, else empty.
  pub(super) fn func_findstring(&mut self, args: &str) -> String {
    let Some((find, text)) = args.split_once(',') else {
      return String::new();
    };
    let find = find.trim();
    if self.expand(text).contains(find) {
      find.to_string()
    } else {
      String::new()
    }
  }

  /// `$[if cond,then[,else]]` — the empty string is false.
  pub(super) fn func_if(&mut self, args: &str) -> String {
    let parts: Vec<&str> = args.splitn(3, ',').collect();
    if parts.len() < 2 {
      return String::new();
    }
    let cond = self.expand(parts[0]);
    if !cond.trim().is_empty() {
      return self.expand(parts[1]).trim().to_string();
    }
    match parts.get(2) {
      Some(else_val) => self.expand(else_val).trim().to_string(),
      None => String::new(),
    }
  }
}

/// Apply a `%` pattern substitution to a single word; a non-matching word
/// passes through unchanged.
pub(crate) fn patsubst_word(pattern: &str, replacement: &str, word: &str) -> String {
  let Some((prefix, suffix)) = pattern.split_once('%') else {
    return if word == pattern { replacement.to_string() } else { word.to_string() };
  };
  match word.strip_prefix(prefix).and_then(|w| w.strip_suffix(suffix)) {
    Some(stem) => replacement.replace('%', stem),
    None => word.to_string(),
  }
}

/// Whether a word matches a `%` pattern.
fn patsubst_match(pattern: &str, word: &str) -> bool {
  match pattern.split_once('%') {
    Some((prefix, suffix)) => {
      word.len() >= prefix.len() + suffix.len() && word.starts_with(prefix) && word.ends_with(suffix)
    }
    None => word == pattern,
  }
}
