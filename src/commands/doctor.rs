//! Health check for the external tools a release drives

use crate::core::error::{ExitCode, ReleaseResult};
use crate::core::process::{ToolStatus, probe};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ToolCheck {
  tool: &'static str,
  purpose: &'static str,
  required: bool,
  #[serde(flatten)]
  status: ToolStatus,
}

const TOOLS: &[(&str, &str, bool)] = &[
  ("git", "clone component repositories and create tags", true),
  ("cargo", "build, test and publish components", true),
  ("gh", "query and create GitHub releases", true),
  ("gpg", "sign the checksum file", false),
];

/// Run the doctor command
pub fn run_doctor(json: bool) -> ReleaseResult<()> {
  let checks: Vec<ToolCheck> = TOOLS
    .iter()
    .map(|&(tool, purpose, required)| ToolCheck {
      tool,
      purpose,
      required,
      status: probe(tool),
    })
    .collect();
  let missing_required = checks.iter().any(|c| c.required && !c.status.is_available());

  if json {
    println!("{}", serde_json::to_string_pretty(&checks)?);
  } else {
    println!("🏥 Checking external tools...");
    println!();
    for check in &checks {
      match &check.status {
        ToolStatus::Available { version } => println!("✅ {}: {}", check.tool, version),
        ToolStatus::Missing { reason } => {
          let icon = if check.required { "❌" } else { "⚠️ " };
          println!("{} {}: {}", icon, check.tool, reason);
          println!("   💡 Needed to {}", check.purpose);
        }
      }
    }
    println!();
    if missing_required {
      println!("⚠️  Required tools are missing. Releases will fail until they are installed.");
    } else {
      println!("✨ All required tools are available.");
    }
  }

  if missing_required {
    std::process::exit(ExitCode::User.as_i32());
  }
  Ok(())
}
