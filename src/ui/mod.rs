//! Terminal-facing helpers
//!
//! - **logging**: log4rs setup for diagnostics on stderr
//! - **progress**: per-component build progress bars

pub mod logging;
pub mod progress;
