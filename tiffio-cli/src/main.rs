//! tiffio CLI - inspect and re-encode TIFF files through managed sessions.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{CmdCopy, CmdInfo};
use std::path::{Path, PathBuf};
use tiffio::{SessionConfig, SessionManager};
use tracing::debug;

/// Command-line arguments for the tiffio tool.
#[derive(Parser, Debug)]
#[command(name = "tiffio")]
#[command(version)]
#[command(about = "Inspect and re-encode TIFF files through file- or memory-backed streams")]
#[command(long_about = "Every file is decoded and encoded through a single managed session.\n\n\
    EXAMPLES:\n    \
    tiffio info scan.tif\n    \
    tiffio info scan.tif --json --from-memory\n    \
    tiffio copy scan.tif out.tif --in-memory\n    \
    tiffio --config session.json --verbose copy scan.tif out.tif")]
struct Cli {
    /// Session configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output, including every stream callback
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the directories and fields of a TIFF file
    Info(CmdInfo),
    /// Decode a TIFF file and encode it again
    Copy(CmdCopy),
}

/// Load the session configuration, or the defaults when no file is given.
fn load_config(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    let Some(path) = path else {
        return Ok(SessionConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config: {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so `--json` output stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = load_config(cli.config.as_deref())?;
    debug!(?config, "session configuration");
    let mut sessions = SessionManager::new(config);

    match &cli.command {
        Command::Info(cmd) => cmd.run(&mut sessions),
        Command::Copy(cmd) => cmd.run(&mut sessions),
    }
}
