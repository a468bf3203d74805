//! Human-facing output for the mk CLI.
//!
//! Build banners and recipe output come straight from the executor; this
//! module covers the query modes (`--why`, `--state`) and keeps their
//! styling in one place.

use console::style;
use mk_lib::TargetState;

/// Print the staleness explanation for one target.
pub fn print_why(target: &str, reasons: &[String]) {
  if reasons.is_empty() {
    println!("{} is up to date", style(target).green());
    return;
  }
  println!("{} needs rebuilding:", style(target).yellow());
  for reason in reasons {
    println!("  - {reason}");
  }
}

/// Print one build-database entry, or a notice when none is recorded.
pub fn print_state(target: &str, state: Option<&TargetState>) {
  match state {
    Some(ts) => {
      let rendered = serde_json::to_string_pretty(ts).unwrap_or_else(|e| format!("<unencodable: {e}>"));
      println!("state for {}:\n{rendered}", style(target).cyan());
    }
    None => println!("no build state recorded for {}", style(target).dim()),
  }
}
