//! Component dependency graph built from the versions manifest + petgraph
//!
//! ## Graph Structure
//!
//! - **Directed Graph**: `A → B` means "A depends on B"
//! - **Nodes**: Components, in declaration order
//! - **Order**: DFS topological sort; ties follow declaration order so that two runs
//!   over the same manifest always build and publish in the same sequence
//!
//! Built once per run and shared by build order, publish order and manifest-rewrite
//! order. Construction fails fast on dangling references and cycles.

use crate::core::error::{ReleaseError, ReleaseResult};
use crate::manifest::VersionsManifest;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

/// One declared component and the names it requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
  pub name: String,
  pub requires: Vec<String>,
}

impl Declaration {
  pub fn new(name: &str, requires: &[&str]) -> Self {
    Self {
      name: name.to_string(),
      requires: requires.iter().map(|r| r.to_string()).collect(),
    }
  }
}

/// Validated, acyclic component graph
pub struct DependencyGraph {
  graph: DiGraph<String, ()>,
  name_to_node: HashMap<String, NodeIndex>,
  order: Vec<String>,
}

impl DependencyGraph {
  pub fn from_manifest(manifest: &VersionsManifest) -> ReleaseResult<Self> {
    Self::build(&manifest.declarations())
  }

  /// Build from ordered declarations, rejecting dangling references and cycles
  pub fn build(declarations: &[Declaration]) -> ReleaseResult<Self> {
    let mut graph = DiGraph::new();
    let mut name_to_node = HashMap::new();

    for decl in declarations {
      if name_to_node.contains_key(&decl.name) {
        return Err(ReleaseError::message(format!("Component '{}' is declared twice", decl.name)));
      }
      let idx = graph.add_node(decl.name.clone());
      name_to_node.insert(decl.name.clone(), idx);
    }

    for decl in declarations {
      let from = name_to_node[&decl.name];
      for dep in &decl.requires {
        let to = name_to_node.get(dep).ok_or_else(|| ReleaseError::DanglingDependency {
          component: decl.name.clone(),
          missing: dep.clone(),
        })?;
        graph.update_edge(from, *to, ());
      }
    }

    let order = topological_sort(declarations)?;

    Ok(Self {
      graph,
      name_to_node,
      order,
    })
  }

  /// Components ordered so every one follows all of its dependencies
  pub fn topological_order(&self) -> &[String] {
    &self.order
  }

  fn node(&self, name: &str) -> ReleaseResult<NodeIndex> {
    self
      .name_to_node
      .get(name)
      .copied()
      .ok_or_else(|| ReleaseError::message(format!("Component '{}' not found in graph", name)))
  }

  /// Direct dependencies of a component
  pub fn direct_dependencies(&self, name: &str) -> ReleaseResult<Vec<String>> {
    let idx = self.node(name)?;
    Ok(self.sorted_by_order(
      self
        .graph
        .neighbors_directed(idx, Direction::Outgoing)
        .map(|n| self.graph[n].clone()),
    ))
  }

  /// Components that directly require `name`
  pub fn direct_dependents(&self, name: &str) -> ReleaseResult<Vec<String>> {
    let idx = self.node(name)?;
    Ok(self.sorted_by_order(
      self
        .graph
        .neighbors_directed(idx, Direction::Incoming)
        .map(|n| self.graph[n].clone()),
    ))
  }

  /// Everything that transitively requires `name`
  pub fn transitive_dependents(&self, name: &str) -> ReleaseResult<Vec<String>> {
    let start = self.node(name)?;
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start]);

    while let Some(idx) = queue.pop_front() {
      for next in self.graph.neighbors_directed(idx, Direction::Incoming) {
        if seen.insert(next) {
          queue.push_back(next);
        }
      }
    }

    Ok(self.sorted_by_order(seen.into_iter().map(|n| self.graph[n].clone())))
  }

  fn sorted_by_order(&self, names: impl Iterator<Item = String>) -> Vec<String> {
    let mut names: Vec<String> = names.collect();
    names.sort_by_key(|n| self.order.iter().position(|o| o == n).unwrap_or(usize::MAX));
    names
  }

  /// Export as GraphViz DOT
  pub fn to_dot(&self) -> String {
    use petgraph::dot::{Config, Dot};

    let dot = Dot::with_attr_getters(
      &self.graph,
      &[Config::EdgeNoLabel, Config::NodeNoLabel],
      &|_, _| String::new(),
      &|_, (_, name)| format!("label=\"{}\"", name),
    );
    format!("{:?}", dot)
  }
}

/// DFS topological sort over ordered declarations
///
/// A component is emitted only after all of its dependencies. Roots are visited in
/// declaration order and dependencies in `requires` order. Names without a
/// declaration are treated as leaves; dangling references are rejected by
/// [`DependencyGraph::build`] before this runs.
pub fn topological_sort(declarations: &[Declaration]) -> ReleaseResult<Vec<String>> {
  let requires: HashMap<&str, &[String]> = declarations
    .iter()
    .map(|d| (d.name.as_str(), d.requires.as_slice()))
    .collect();

  let mut visited: HashSet<&str> = HashSet::new();
  let mut stack: Vec<&str> = Vec::new();
  let mut order = Vec::with_capacity(declarations.len());

  for decl in declarations {
    visit(&decl.name, &requires, &mut visited, &mut stack, &mut order)?;
  }

  Ok(order)
}

fn visit<'a>(
  name: &'a str,
  requires: &HashMap<&'a str, &'a [String]>,
  visited: &mut HashSet<&'a str>,
  stack: &mut Vec<&'a str>,
  order: &mut Vec<String>,
) -> ReleaseResult<()> {
  if visited.contains(name) {
    return Ok(());
  }
  if let Some(pos) = stack.iter().position(|s| *s == name) {
    let mut components: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
    components.push(name.to_string());
    return Err(ReleaseError::CyclicDependency { components });
  }

  stack.push(name);
  for dep in requires.get(name).copied().unwrap_or_default() {
    visit(dep, requires, visited, stack, order)?;
  }
  stack.pop();

  visited.insert(name);
  order.push(name.to_string());
  Ok(())
}

/// First cycle found, as a closed path (`A -> B -> A`)
pub fn find_cycle(declarations: &[Declaration]) -> Option<Vec<String>> {
  match topological_sort(declarations) {
    Err(ReleaseError::CyclicDependency { components }) => Some(components),
    _ => None,
  }
}
