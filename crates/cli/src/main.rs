//! mk: a content-addressed parallel build orchestrator.
//!
//! Positional arguments mix freely: bare words are targets, `name=value`
//! pre-sets a variable, and `target:cfg1+cfg2` requests a target under a
//! combination of build configs. Errors print as `mk: <error>` on stderr
//! with exit code 1.

mod output;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use mk_lib::exec::{ExecOptions, Executor, why_rebuild};
use mk_lib::graph::{Graph, dot_graph};
use mk_lib::state::BuildState;
use mk_lib::vars::Vars;

#[derive(Debug, Parser)]
#[command(name = "mk", version, about = "Content-addressed parallel build orchestrator")]
struct Cli {
  /// Buildfile to read
  #[arg(short = 'f', long = "file", value_name = "FILE", default_value = "mkfile")]
  file: String,

  /// Verbose output
  #[arg(short = 'v', long)]
  verbose: bool,

  /// Unconditional rebuild (ignore recorded state)
  #[arg(short = 'B', long = "force")]
  force: bool,

  /// Dry run (print commands without executing)
  #[arg(short = 'n', long = "dry-run")]
  dry_run: bool,

  /// Parallel jobs (-1 = host CPUs, 0 = unlimited)
  #[arg(short = 'j', long = "jobs", value_name = "N", default_value_t = -1, allow_negative_numbers = true)]
  jobs: i64,

  /// Explain why targets are stale, then exit
  #[arg(long)]
  why: bool,

  /// Print the dependency subgraph as DOT, then exit
  #[arg(long)]
  graph: bool,

  /// Show build database entries for targets, then exit
  #[arg(long)]
  state: bool,

  /// Output completions (targets and configs), then exit
  #[arg(long)]
  complete: bool,

  /// Targets, name=value overrides, and target:cfg1+cfg2 selectors
  #[arg(value_name = "ARG")]
  args: Vec<String>,
}

fn main() {
  let cli = Cli::parse();

  let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
  FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  // Every error type here embeds its cause in Display, so the plain
  // rendering carries the full story.
  if let Err(err) = run(&cli) {
    eprintln!("mk: {err}");
    std::process::exit(1);
  }
}

fn run(cli: &Cli) -> Result<()> {
  let mut vars = Vars::new();
  let mut targets: Vec<String> = Vec::new();
  let mut active_configs: Vec<String> = Vec::new();
  let mut seen_configs: HashSet<String> = HashSet::new();

  for arg in &cli.args {
    if let Some((name, value)) = arg.split_once('=') {
      vars.set(name, value);
      continue;
    }
    match arg.split_once(':') {
      Some((target, config_str)) => {
        targets.push(target.to_string());
        for config in config_str.split('+') {
          let config = config.trim();
          if !config.is_empty() && seen_configs.insert(config.to_string()) {
            active_configs.push(config.to_string());
          }
        }
      }
      None => targets.push(arg.clone()),
    }
  }

  let config_suffix = active_configs.join("-");

  if cli.complete {
    // Completion output must never fail loudly.
    let _ = complete(&cli.file, vars);
    return Ok(());
  }

  if cli.state {
    if targets.is_empty() {
      bail!("--state requires at least one target");
    }
    let state = BuildState::load(&config_suffix);
    for target in &targets {
      output::print_state(target, state.get(target).as_ref());
    }
    return Ok(());
  }

  let text = std::fs::read_to_string(&cli.file).map_err(|e| anyhow!("cannot open {}: {e}", cli.file))?;
  let file = mk_lib::parse(&text)?;

  let state = Arc::new(BuildState::load(&config_suffix));
  let graph = Graph::build(&file, vars, &active_configs)?;

  if targets.is_empty() {
    match graph.default_target() {
      Some(target) => targets.push(target),
      None => bail!("no targets specified and no default target"),
    }
  }

  if cli.why {
    for target in &targets {
      let reasons = why_rebuild(&graph, &state, target)?;
      output::print_why(target, &reasons);
    }
    return Ok(());
  }

  if cli.graph {
    print!("{}", dot_graph(&graph, &targets)?);
    return Ok(());
  }

  // Config-required targets build before the requested ones.
  let mut build_order = graph.config_requires();
  build_order.extend(targets);

  let opts = ExecOptions {
    verbose: cli.verbose,
    force: cli.force,
    dry_run: cli.dry_run,
    jobs: cli.jobs,
  };

  let runtime = tokio::runtime::Runtime::new().map_err(|e| anyhow!("starting runtime: {e}"))?;
  runtime.block_on(async {
    let exec = Executor::new(graph, state.clone(), opts);
    for target in &build_order {
      exec.build(target).await?;
    }
    Ok::<_, anyhow::Error>(())
  })?;

  if cli.dry_run {
    return Ok(());
  }
  state.save(&config_suffix)?;
  Ok(())
}

/// Emit target and config names for shell completion. Silent on any error.
fn complete(file: &str, vars: Vars) -> Result<()> {
  let text = std::fs::read_to_string(file)?;
  let parsed = mk_lib::parse(&text)?;
  let graph = Graph::build(&parsed, vars, &[])?;
  for target in graph.targets() {
    println!("{target}");
  }
  for config in graph.config_names() {
    println!("{config}");
  }
  Ok(())
}
