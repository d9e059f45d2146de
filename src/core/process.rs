//! Bounded execution of external tools
//!
//! Every subprocess (git, cargo, gh, gpg) goes through [`run`], which captures both
//! streams on reader threads and kills the child once its time budget is spent.
//! On unix the child leads its own process group and the whole group is killed,
//! so `rustc` under `cargo` or a shell's children cannot outlive the budget.

use crate::core::error::{ReleaseError, ReleaseResult};
use serde::Serialize;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Budget for `--version` probes
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a killed tool's output readers may take to reach EOF
const REAP_GRACE: Duration = Duration::from_secs(2);

/// Captured output of a finished tool
#[derive(Debug, Clone)]
pub struct ToolOutput {
  pub status: ExitStatus,
  pub stdout: String,
  pub stderr: String,
  pub elapsed: Duration,
}

impl ToolOutput {
  pub fn success(&self) -> bool {
    self.status.success()
  }

  /// stderr followed by stdout, for diagnostics
  pub fn combined(&self) -> String {
    match (self.stderr.trim().is_empty(), self.stdout.trim().is_empty()) {
      (false, false) => format!("{}\n{}", self.stderr.trim_end(), self.stdout.trim_end()),
      (false, true) => self.stderr.trim_end().to_string(),
      _ => self.stdout.trim_end().to_string(),
    }
  }
}

/// Run a command to completion or until `timeout` elapses
///
/// A timeout kills the child and returns `ToolTimeout`; callers map it to the
/// failure kind of their stage.
pub fn run(mut cmd: Command, tool: &str, timeout: Duration) -> ReleaseResult<ToolOutput> {
  log::debug!("running {:?} (timeout {}s)", cmd, timeout.as_secs());
  let started = Instant::now();

  isolate(&mut cmd);
  let mut child = cmd
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .spawn()
    .map_err(|e| ReleaseError::message(format!("Failed to start `{}`: {}", tool, e)))?;

  let stdout = drain(child.stdout.take());
  let stderr = drain(child.stderr.take());

  match child.wait_timeout(timeout)? {
    Some(status) => Ok(ToolOutput {
      status,
      stdout: join(stdout),
      stderr: join(stderr),
      elapsed: started.elapsed(),
    }),
    None => {
      terminate(&mut child);
      // A descendant that escaped the group may still hold the pipes
      let deadline = Instant::now() + REAP_GRACE;
      let _ = join_until(stdout, deadline);
      let _ = join_until(stderr, deadline);
      log::warn!("`{}` exceeded {}s and was killed", tool, timeout.as_secs());
      Err(ReleaseError::ToolTimeout {
        tool: tool.to_string(),
        seconds: timeout.as_secs(),
      })
    }
  }
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<String>> {
  stream.map(|mut s| {
    thread::spawn(move || {
      let mut buf = Vec::new();
      let _ = s.read_to_end(&mut buf);
      String::from_utf8_lossy(&buf).into_owned()
    })
  })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
  handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn join_until(handle: Option<JoinHandle<String>>, deadline: Instant) -> String {
  let Some(handle) = handle else {
    return String::new();
  };
  while !handle.is_finished() && Instant::now() < deadline {
    thread::sleep(Duration::from_millis(10));
  }
  if handle.is_finished() {
    handle.join().unwrap_or_default()
  } else {
    String::new()
  }
}

#[cfg(unix)]
fn isolate(cmd: &mut Command) {
  use std::os::unix::process::CommandExt;
  cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate(_cmd: &mut Command) {}

fn terminate(child: &mut Child) {
  kill_group(child);
  let _ = child.kill();
  let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(child: &Child) {
  let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
    return;
  };
  // SAFETY: `kill` has no memory effects; the group was created by `isolate` for this child
  unsafe {
    libc::kill(-pgid, libc::SIGKILL);
  }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Presence of an external tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolStatus {
  Available { version: String },
  Missing { reason: String },
}

impl ToolStatus {
  pub fn is_available(&self) -> bool {
    matches!(self, ToolStatus::Available { .. })
  }
}

/// Probe a tool with `<tool> --version`
pub fn probe(tool: &str) -> ToolStatus {
  let mut cmd = Command::new(tool);
  cmd.arg("--version");
  match run(cmd, tool, PROBE_TIMEOUT) {
    Ok(out) if out.success() => ToolStatus::Available {
      version: out.stdout.lines().next().unwrap_or_default().trim().to_string(),
    },
    Ok(out) => ToolStatus::Missing {
      reason: format!("`{} --version` exited with {}", tool, out.status),
    },
    Err(e) => ToolStatus::Missing { reason: e.to_string() },
  }
}
