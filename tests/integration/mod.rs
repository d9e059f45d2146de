//! Integration tests driving the bllvm-release binary

mod helpers;
mod test_artifacts;
mod test_manifest;
mod test_order;
