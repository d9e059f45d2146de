//! Progress indicators for concurrent platform builds
//!
//! Uses `linya`, which is built for many bars updated from many threads.

use linya::{Bar, Progress};
use std::sync::{Arc, Mutex};

/// Thread-safe multi-bar progress, or a no-op when hidden
#[derive(Clone, Default)]
pub struct BuildProgress {
  progress: Option<Arc<Mutex<Progress>>>,
}

impl BuildProgress {
  pub fn new() -> Self {
    Self {
      progress: Some(Arc::new(Mutex::new(Progress::new()))),
    }
  }

  /// Progress that draws nothing (JSON output, tests)
  pub fn hidden() -> Self {
    Self { progress: None }
  }

  pub fn add_bar(&self, total: usize, label: impl Into<String>) -> Option<Bar> {
    let progress = self.progress.as_ref()?;
    let mut progress = progress.lock().unwrap_or_else(|e| e.into_inner());
    Some(progress.bar(total, label.into()))
  }

  pub fn inc(&self, bar: Option<&Bar>) {
    if let (Some(progress), Some(bar)) = (self.progress.as_ref(), bar) {
      let mut progress = progress.lock().unwrap_or_else(|e| e.into_inner());
      progress.inc_and_draw(bar, 1);
    }
  }
}
