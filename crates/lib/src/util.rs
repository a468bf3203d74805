//! Small path and identifier helpers shared across the engine.
//!
//! Paths in buildfiles are always `/`-separated strings; these helpers work
//! on them directly instead of round-tripping through `std::path`.

/// Directory part of a path, without a trailing slash. `.` when the path has
/// no directory component.
pub(crate) fn path_dir(p: &str) -> String {
  let trimmed = p.trim_end_matches('/');
  if trimmed.is_empty() {
    return if p.is_empty() { ".".to_string() } else { "/".to_string() };
  }
  match trimmed.rfind('/') {
    Some(0) => "/".to_string(),
    Some(i) => trimmed[..i].to_string(),
    None => ".".to_string(),
  }
}

/// Final component of a path.
pub(crate) fn path_base(p: &str) -> String {
  if p.is_empty() {
    return ".".to_string();
  }
  let trimmed = p.trim_end_matches('/');
  if trimmed.is_empty() {
    return "/".to_string();
  }
  match trimmed.rfind('/') {
    Some(i) => trimmed[i + 1..].to_string(),
    None => trimmed.to_string(),
  }
}

/// Extension of a path including the leading dot, or empty when the final
/// component has none.
pub(crate) fn path_ext(p: &str) -> &str {
  let base_start = p.rfind('/').map(|i| i + 1).unwrap_or(0);
  match p[base_start..].rfind('.') {
    Some(i) => &p[base_start + i..],
    None => "",
  }
}

/// Lexically normalize a path: drop `.` components, collapse duplicate
/// slashes, resolve `..` where possible.
pub(crate) fn clean_path(p: &str) -> String {
  let rooted = p.starts_with('/');
  let mut out: Vec<&str> = Vec::new();
  for comp in p.split('/') {
    match comp {
      "" | "." => {}
      ".." => match out.last().copied() {
        Some("..") | None if !rooted => out.push(".."),
        Some("..") | None => {}
        Some(_) => {
          out.pop();
        }
      },
      c => out.push(c),
    }
  }
  let joined = out.join("/");
  match (rooted, joined.is_empty()) {
    (true, true) => "/".to_string(),
    (true, false) => format!("/{joined}"),
    (false, true) => ".".to_string(),
    (false, false) => joined,
  }
}

/// Join two path fragments and normalize the result.
pub(crate) fn join_path(a: &str, b: &str) -> String {
  if a.is_empty() {
    return clean_path(b);
  }
  if b.is_empty() {
    return clean_path(a);
  }
  clean_path(&format!("{a}/{b}"))
}

/// Make `path` relative to `base` when it lies underneath it.
pub(crate) fn rel_path(base: &str, path: &str) -> String {
  if base.is_empty() || base == "." {
    return path.to_string();
  }
  match path.strip_prefix(base) {
    Some(rest) => {
      let rest = rest.trim_start_matches('/');
      if rest.is_empty() { ".".to_string() } else { rest.to_string() }
    }
    None => path.to_string(),
  }
}

pub(crate) fn is_ident_start(c: u8) -> bool {
  c.is_ascii_alphabetic() || c == b'_'
}

pub(crate) fn is_ident_cont(c: u8) -> bool {
  is_ident_start(c) || c.is_ascii_digit()
}
