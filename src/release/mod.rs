//! Release orchestration
//!
//! # Stages
//!
//! 1. **plan**: ask the registry and the release index what already exists and
//!    decide, per component and platform, whether to build or download
//! 2. **build**: compile libraries once, binaries per platform and variant
//! 3. **publish**: rewrite manifests to exact pins, publish libraries in
//!    dependency order, wait for each to become visible
//! 4. **artifacts**: stage binaries, write SHA256SUMS, pack deterministic
//!    tar.gz and zip archives
//! 5. **finalize**: tag every repository, create the release object
//! 6. **record**: write `release-manifest.json`
//!
//! `pipeline` runs all of them in order; each stage is also reachable on its own
//! from the CLI.
//!
//! # Invariants
//!
//! - A component is built or published only after everything it requires
//! - A published library never references an ecosystem dependency by path
//! - Tagging starts only after every required artifact exists
//! - Archives of identical inputs are byte-identical

pub mod artifacts;
pub mod build;
pub mod finalize;
pub mod notes;
pub mod pipeline;
pub mod plan;
pub mod platform;
pub mod publish;
pub mod record;
pub mod registry;
pub mod rewrite;
pub mod signing;

pub use build::{BuildTarget, CargoToolchain};
pub use pipeline::{PipelineOptions, Services};
pub use platform::Platform;
pub use registry::CratesIoRegistry;
