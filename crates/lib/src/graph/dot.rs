//! DOT emission for `--graph`.

use std::collections::{HashMap, HashSet};

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};

use super::{Graph, GraphError};

/// Render the dependency subgraph rooted at the requested targets as DOT.
/// Tasks render with a box shape.
pub fn dot_graph(graph: &Graph, targets: &[String]) -> Result<String, GraphError> {
  let mut dg: DiGraph<String, &'static str> = DiGraph::new();
  let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
  let mut tasks: HashSet<String> = HashSet::new();
  let mut visited: HashSet<String> = HashSet::new();

  for target in targets {
    visit(graph, target, &mut dg, &mut nodes, &mut tasks, &mut visited)?;
  }

  Ok(format!(
    "{}",
    Dot::with_attr_getters(&dg, &[Config::EdgeNoLabel], &|_, _| String::new(), &|_, (_, name)| {
      if tasks.contains(name.as_str()) {
        "shape = box".to_string()
      } else {
        String::new()
      }
    })
  ))
}

fn visit(
  graph: &Graph,
  target: &str,
  dg: &mut DiGraph<String, &'static str>,
  nodes: &mut HashMap<String, NodeIndex>,
  tasks: &mut HashSet<String>,
  visited: &mut HashSet<String>,
) -> Result<(), GraphError> {
  if !visited.insert(target.to_string()) {
    return Ok(());
  }

  let rule = graph.resolve(target)?;
  if rule.is_task {
    tasks.insert(target.to_string());
  }

  let from = node(dg, nodes, target);
  for prereq in &rule.prereqs {
    let to = node(dg, nodes, prereq);
    dg.add_edge(from, to, "");
    visit(graph, prereq, dg, nodes, tasks, visited)?;
  }
  Ok(())
}

fn node(dg: &mut DiGraph<String, &'static str>, nodes: &mut HashMap<String, NodeIndex>, name: &str) -> NodeIndex {
  *nodes
    .entry(name.to_string())
    .or_insert_with(|| dg.add_node(name.to_string()))
}
