mod commands;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use resfetch::Config;

#[derive(Parser, Debug)]
#[command(name = "resfetch")]
#[command(about = "Fetch JSON with retries, timeouts and a two-tier cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./resfetch.yaml or $XDG_CONFIG_HOME/resfetch/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Do not read or write the persistent cache
  #[arg(long, global = true)]
  memory_only: bool,

  /// Log cache and retry decisions
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Keep the guard alive so buffered log lines are flushed on exit
  let _log_guard = init_logging(args.verbose, args.log_file.as_deref());

  let config = Config::load(args.config.as_deref())?;

  commands::run(args.command, &config, args.memory_only).await
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Option<WorkerGuard> {
  let filter = if verbose {
    EnvFilter::new("resfetch=debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };

  match log_file {
    Some(path) => {
      let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("resfetch.log"));

      let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

      tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();

      Some(guard)
    }
    None => {
      tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

      None
    }
  }
}
