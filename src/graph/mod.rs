//! Component dependency graph
//!
//! Built on petgraph from the versions manifest. Every ordering consumer (build,
//! publish, manifest rewrite) derives from this one structure.

pub mod dependency_graph;

pub use dependency_graph::DependencyGraph;
