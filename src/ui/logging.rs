//! Diagnostic logging (stderr, optionally a file)
//!
//! User-facing output stays on stdout; everything routed through `log` lands here.

use crate::core::error::{ReleaseError, ReleaseResult};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

pub const LOG_ENV: &str = "BLLVM_RELEASE_LOG";

const CONSOLE_PATTERN: &str = "{d(%H:%M:%S)} [{l}] {t} - {m}{n}";
const FILE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} [{l}] {t} - {m}{n}";

/// Level from `BLLVM_RELEASE_LOG`, else `debug` with `-v`, else `info`
pub fn level_for(verbose: bool, env_level: Option<&str>) -> LevelFilter {
  if let Some(raw) = env_level
    && let Ok(level) = raw.trim().parse::<LevelFilter>()
  {
    return level;
  }
  if verbose { LevelFilter::Debug } else { LevelFilter::Info }
}

/// Install the global logger
pub fn init(verbose: bool, log_file: Option<&Path>) -> ReleaseResult<()> {
  let level = level_for(verbose, std::env::var(LOG_ENV).ok().as_deref());

  let console = ConsoleAppender::builder()
    .target(Target::Stderr)
    .encoder(Box::new(PatternEncoder::new(CONSOLE_PATTERN)))
    .build();

  let mut config = Config::builder().appender(Appender::builder().build("console", Box::new(console)));
  let mut root = Root::builder().appender("console");

  if let Some(path) = log_file {
    let file = FileAppender::builder()
      .encoder(Box::new(PatternEncoder::new(FILE_PATTERN)))
      .build(path)
      .map_err(|e| ReleaseError::message(format!("Failed to open log file {}: {}", path.display(), e)))?;
    config = config.appender(Appender::builder().build("file", Box::new(file)));
    root = root.appender("file");
  }

  let config = config
    .build(root.build(level))
    .map_err(|e| ReleaseError::message(format!("Invalid logging configuration: {}", e)))?;
  log4rs::init_config(config).map_err(|e| ReleaseError::message(format!("Failed to install logger: {}", e)))?;
  Ok(())
}
