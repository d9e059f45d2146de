//! Core building blocks shared by every command
//!
//! - **config**: pipeline configuration (release.toml) and environment overrides
//! - **context**: config, versions manifest and dependency graph, loaded once
//! - **error**: error taxonomy with exit codes and help messages
//! - **process**: external tool execution with timeouts
//! - **vcs**: source control host (git, GitHub releases)

pub mod config;
pub mod context;
pub mod error;
pub mod process;
pub mod vcs;
