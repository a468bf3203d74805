//! Target and prerequisite patterns with named captures.
//!
//! `build/{name}.o` captures `name`; `{arch:x86*,arm*}` constrains the
//! capture with a glob alternation; `{ver/\d+\.\d+}` constrains it with an
//! anchored regular expression. A capture never matches `/`, and a name
//! repeated within one pattern must bind the same value everywhere.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
  #[error("pattern {pattern:?}: invalid regex in capture {capture:?}: {source}")]
  InvalidRegex {
    pattern: String,
    capture: String,
    source: regex::Error,
  },
}

/// A parsed pattern: literal parts interleaved with named captures.
///
/// When captures are present, `parts.len() == captures.len() + 1`, with
/// `parts[i]` preceding `captures[i]`.
#[derive(Debug, Clone)]
pub struct Pattern {
  parts: Vec<String>,
  captures: Vec<String>,
  constraints: Vec<Option<Constraint>>,
  raw: String,
}

#[derive(Debug, Clone)]
enum Constraint {
  /// Comma-separated shell-glob alternatives.
  Glob(String),
  /// Anchored regular expression.
  Regex(regex::Regex),
}

impl Constraint {
  fn matches(&self, candidate: &str) -> bool {
    match self {
      Constraint::Glob(alts) => alts
        .split(',')
        .any(|alt| glob::Pattern::new(alt).is_ok_and(|p| p.matches(candidate))),
      Constraint::Regex(re) => re.is_match(candidate),
    }
  }
}

impl Pattern {
  /// Parse a pattern string. A string with no captures parses to a pure
  /// literal that only matches itself.
  pub fn parse(s: &str) -> Result<Pattern, PatternError> {
    let mut parts = Vec::new();
    let mut captures = Vec::new();
    let mut constraints = Vec::new();

    let mut rest = s;
    let mut current = String::new();

    while !rest.is_empty() {
      let Some(idx) = rest.find('{') else {
        current.push_str(rest);
        break;
      };

      let inner = &rest[idx + 1..];
      let Some((name, constraint, end)) = parse_capture(s, inner)? else {
        // No closing brace: the remainder is literal text.
        current.push_str(rest);
        break;
      };

      current.push_str(&rest[..idx]);
      parts.push(std::mem::take(&mut current));
      captures.push(name);
      constraints.push(constraint);
      rest = &inner[end + 1..];
    }
    parts.push(current);

    if captures.is_empty() {
      return Ok(Pattern {
        parts: Vec::new(),
        captures: Vec::new(),
        constraints: Vec::new(),
        raw: s.to_string(),
      });
    }

    Ok(Pattern {
      parts,
      captures,
      constraints,
      raw: s.to_string(),
    })
  }

  /// Whether the pattern has any captures.
  pub fn is_pattern(&self) -> bool {
    !self.captures.is_empty()
  }

  /// The original pattern text.
  pub fn raw(&self) -> &str {
    &self.raw
  }

  /// Capture names in order of appearance.
  pub fn capture_names(&self) -> &[String] {
    &self.captures
  }

  /// Match a concrete string, returning the capture bindings.
  pub fn matches(&self, s: &str) -> Option<HashMap<String, String>> {
    if self.captures.is_empty() {
      return (s == self.raw).then(HashMap::new);
    }
    self.match_at(s, 0, &HashMap::new())
  }

  fn match_at(&self, s: &str, idx: usize, bound: &HashMap<String, String>) -> Option<HashMap<String, String>> {
    let s = s.strip_prefix(self.parts[idx].as_str())?;

    if idx >= self.captures.len() {
      return s.is_empty().then(|| bound.clone());
    }

    let name = &self.captures[idx];

    // Last capture with nothing after it: it must swallow the remainder.
    if idx == self.captures.len() - 1 && self.parts[idx + 1].is_empty() {
      if s.contains('/') || !self.constraint_ok(idx, s) {
        return None;
      }
      if let Some(existing) = bound.get(name) {
        if existing != s {
          return None;
        }
      }
      let mut result = bound.clone();
      result.insert(name.clone(), s.to_string());
      return Some(result);
    }

    // Try every split point, shortest candidate first, backtracking into the
    // rest of the pattern.
    for i in (0..=s.len()).filter(|&i| s.is_char_boundary(i)) {
      let candidate = &s[..i];
      if candidate.contains('/') {
        continue;
      }
      if !self.constraint_ok(idx, candidate) {
        continue;
      }
      if let Some(existing) = bound.get(name) {
        if existing != candidate {
          continue;
        }
      }
      let mut next = bound.clone();
      next.insert(name.clone(), candidate.to_string());
      if let Some(result) = self.match_at(&s[i..], idx + 1, &next) {
        return Some(result);
      }
    }

    None
  }

  fn constraint_ok(&self, idx: usize, candidate: &str) -> bool {
    match self.constraints.get(idx) {
      Some(Some(c)) => c.matches(candidate),
      _ => true,
    }
  }

  /// Substitute capture values to produce a concrete string.
  pub fn expand(&self, captures: &HashMap<String, String>) -> String {
    if self.captures.is_empty() {
      return self.raw.clone();
    }
    let mut out = String::new();
    for (i, part) in self.parts.iter().enumerate() {
      out.push_str(part);
      if let Some(name) = self.captures.get(i) {
        if let Some(value) = captures.get(name) {
          out.push_str(value);
        }
      }
    }
    out
  }
}

type ParsedCapture = (String, Option<Constraint>, usize);

/// Parse the content following `{`. Returns the capture name, optional
/// constraint, and the index of the closing `}` within `inner`, or `None`
/// when the brace never closes.
fn parse_capture(pattern: &str, inner: &str) -> Result<Option<ParsedCapture>, PatternError> {
  for (i, b) in inner.bytes().enumerate() {
    match b {
      b'}' => return Ok(Some((inner[..i].to_string(), None, i))),

      b':' => {
        let Some(close) = inner[i + 1..].find('}') else {
          return Ok(None);
        };
        let close = close + i + 1;
        let glob = inner[i + 1..close].to_string();
        return Ok(Some((inner[..i].to_string(), Some(Constraint::Glob(glob)), close)));
      }

      b'/' => {
        let Some(end) = find_regex_end(inner, i + 1) else {
          return Ok(None);
        };
        let name = inner[..i].to_string();
        let source = &inner[i + 1..end];
        let re = regex::Regex::new(&format!("^(?:{source})$")).map_err(|source| PatternError::InvalidRegex {
          pattern: pattern.to_string(),
          capture: name.clone(),
          source,
        })?;
        return Ok(Some((name, Some(Constraint::Regex(re)), end)));
      }

      _ => {}
    }
  }
  Ok(None)
}

/// Walk regex syntax from `pos`, tracking escapes, character classes, and
/// brace quantifiers (`{2,4}`), to find the `}` that closes the capture
/// rather than one belonging to the regex.
fn find_regex_end(s: &str, pos: usize) -> Option<usize> {
  let bytes = s.as_bytes();
  let mut in_class = false;
  let mut escaped = false;
  let mut i = pos;
  while i < bytes.len() {
    let c = bytes[i];
    if escaped {
      escaped = false;
      i += 1;
      continue;
    }
    match c {
      b'\\' => escaped = true,
      _ if in_class => {
        if c == b']' {
          in_class = false;
        }
      }
      b'[' => in_class = true,
      b'{' => {
        // Quantifier: skip past its closing brace.
        if let Some(j) = s[i + 1..].find('}') {
          i += j + 1;
        }
      }
      b'}' => return Some(i),
      _ => {}
    }
    i += 1;
  }
  None
}
