//! Target resolution: explicit rules, merged pattern rules, leaf files.

use std::collections::HashMap;

use super::{Graph, GraphError, PatternRule, ResolvedRule};

impl Graph {
  /// Resolve a concrete target to the rule that builds it.
  ///
  /// Explicit rules win (matching any target of a multi-output group).
  /// Otherwise every matching pattern rule contributes prerequisites in
  /// declaration order, and exactly one of them may contribute the recipe;
  /// that rule also supplies `keep`, the fingerprint command, and the stem.
  /// A target with no rule resolves to a recipe-less leaf when the file
  /// exists.
  pub fn resolve(&self, target: &str) -> Result<ResolvedRule, GraphError> {
    for rule in &self.rules {
      if rule.targets.iter().any(|t| t == target) {
        return Ok(rule.clone());
      }
    }

    if let Some(merged) = self.resolve_pattern(target)? {
      return Ok(merged);
    }

    if std::fs::exists(target).unwrap_or(false) {
      return Ok(ResolvedRule {
        target: target.to_string(),
        targets: vec![target.to_string()],
        ..ResolvedRule::default()
      });
    }

    Err(GraphError::NoRule(target.to_string()))
  }

  fn resolve_pattern(&self, target: &str) -> Result<Option<ResolvedRule>, GraphError> {
    let mut merged: Option<ResolvedRule> = None;
    let mut recipes = 0usize;

    for pr in &self.patterns {
      let Some((tp_idx, captures)) = first_match(pr, target) else {
        continue;
      };
      let tp = &pr.target_patterns[tp_idx];

      let prereqs: Vec<String> = pr.prereq_patterns.iter().map(|p| p.expand(&captures)).collect();
      let order_only: Vec<String> = pr.order_only_patterns.iter().map(|p| p.expand(&captures)).collect();

      let mut entry = match merged.take() {
        Some(mut existing) => {
          existing.prereqs.extend(prereqs);
          existing.order_only.extend(order_only);
          existing
        }
        None => {
          let targets: Vec<String> = pr.target_patterns.iter().map(|p| p.expand(&captures)).collect();
          ResolvedRule {
            target: targets[0].clone(),
            targets,
            prereqs,
            order_only,
            ..ResolvedRule::default()
          }
        }
      };

      if !pr.recipe.is_empty() {
        recipes += 1;
        if recipes > 1 {
          return Err(GraphError::AmbiguousRules {
            target: target.to_string(),
          });
        }

        entry.recipe = pr.recipe.iter().map(|line| substitute_captures(line, &captures)).collect();
        entry.keep = pr.keep;
        entry.fingerprint = pr
          .fingerprint
          .as_ref()
          .map(|fp| substitute_captures(fp, &captures));
        entry.stem = tp.capture_names().first().map(|name| captures[name].clone());
      }

      merged = Some(entry);
    }

    Ok(merged)
  }
}

/// The first target pattern of `pr` matching `target`, with its bindings.
fn first_match(pr: &PatternRule, target: &str) -> Option<(usize, HashMap<String, String>)> {
  pr.target_patterns
    .iter()
    .enumerate()
    .find_map(|(i, tp)| tp.matches(target).map(|captures| (i, captures)))
}

/// Replace `{name}` occurrences with bound capture values.
fn substitute_captures(text: &str, captures: &HashMap<String, String>) -> String {
  let mut out = text.to_string();
  for (name, value) in captures {
    out = out.replace(&format!("{{{name}}}"), value);
  }
  out
}
