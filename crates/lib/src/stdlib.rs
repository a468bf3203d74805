//! Embedded standard buildfiles.
//!
//! `include PATH` falls back to this table when `PATH` does not exist on
//! disk, so `include std/c.mk` works in a fresh checkout. A local file of
//! the same path always wins.

const STD_C: &str = include_str!("../std/c.mk");
const STD_CXX: &str = include_str!("../std/cxx.mk");
const STD_GO: &str = include_str!("../std/go.mk");

/// Look up an embedded buildfile by include path.
pub fn lookup(path: &str) -> Option<&'static str> {
  match path {
    "std/c.mk" => Some(STD_C),
    "std/cxx.mk" => Some(STD_CXX),
    "std/go.mk" => Some(STD_GO),
    _ => None,
  }
}

/// The embedded include paths.
pub fn paths() -> &'static [&'static str] {
  &["std/c.mk", "std/cxx.mk", "std/go.mk"]
}
