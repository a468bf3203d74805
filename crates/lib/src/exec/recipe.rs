//! Recipe and fingerprint expansion with the automatic variables.

use crate::graph::ResolvedRule;
use crate::hash::HashCache;
use crate::state::BuildState;
use crate::vars::Vars;

/// Bind the automatic variables for one rule into a recipe-local store.
fn bind_auto_vars(vars: &mut Vars, rule: &ResolvedRule) {
  vars.set("target", &rule.target);
  if let Some(first) = rule.prereqs.first() {
    vars.set("input", first);
  }
  vars.set("inputs", &rule.prereqs.join(" "));
  if let Some(stem) = &rule.stem {
    vars.set("stem", stem);
  }
}

/// Fully expand the recipe text for hashing and execution.
///
/// `$changed` holds the normal prerequisites whose content hash differs
/// from the recorded one (all of them when the target has no record). `@`
/// prefixes are stripped; a `-` prefix is stripped and the line suffixed
/// with ` || true` so its failure is ignored.
pub fn expand_recipe(base: &Vars, rule: &ResolvedRule, state: &BuildState, cache: &HashCache) -> String {
  let mut vars = base.clone();
  bind_auto_vars(&mut vars, rule);

  let recorded = state.get(&rule.target);
  let changed: Vec<&str> = rule
    .prereqs
    .iter()
    .filter(|p| match &recorded {
      None => true,
      Some(ts) => match cache.hash(p.as_str()) {
        Ok(hash) => ts.input_hashes.get(p.as_str()) != Some(&hash),
        Err(_) => true,
      },
    })
    .map(String::as_str)
    .collect();
  vars.set("changed", &changed.join(" "));

  let mut lines = Vec::with_capacity(rule.recipe.len());
  for line in &rule.recipe {
    let mut rest = line.as_str();
    let mut ignore_err = false;
    loop {
      match rest.as_bytes().first() {
        Some(b'@') => rest = &rest[1..],
        Some(b'-') => {
          ignore_err = true;
          rest = &rest[1..];
        }
        _ => break,
      }
    }

    let mut expanded = vars.expand(rest);
    if ignore_err {
      expanded.push_str(" || true");
    }
    lines.push(expanded);
  }

  lines.join("\n")
}

/// Expand the fingerprint command with the same automatic variables.
pub fn expand_fingerprint(base: &Vars, rule: &ResolvedRule) -> Option<String> {
  let fp = rule.fingerprint.as_ref()?;
  let mut vars = base.clone();
  bind_auto_vars(&mut vars, rule);
  Some(vars.expand(fp))
}
