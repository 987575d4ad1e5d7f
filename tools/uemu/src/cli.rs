//! Command-line interface definitions for uemu.

use std::path::PathBuf;

use clap::Parser;

use crate::config::DisplayBackend;

/// Runs a UEFI application as an ordinary host process.
#[derive(Debug, Parser)]
#[command(name = "uemu", version, about)]
pub struct Cli {
    /// PE32+ UEFI application to run.
    pub image: PathBuf,

    /// Wait for a keypress before exiting, to inspect the final screen.
    #[arg(long, short = 'p')]
    pub pause: bool,

    /// Configuration file (default: `uemu.toml` in the working directory, if present).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Where to show the console (overrides the configuration file).
    #[arg(long, value_enum)]
    pub display: Option<DisplayBackend>,

    /// Load the image wherever the host puts it, forcing relocation.
    #[arg(long)]
    pub no_preferred_base: bool,

    /// Only report errors.
    #[arg(long, short = 'q', conflicts_with = "verbose")]
    pub quiet: bool,

    /// Report loader and firmware diagnostics.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
