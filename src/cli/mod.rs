//! CLI argument definitions for Statecrypt.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Long version string: package version plus build metadata from `build.rs`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("STATECRYPT_GIT_COMMIT"),
    ", built ",
    env!("STATECRYPT_BUILD_TIMESTAMP"),
    ")"
);

/// Statecrypt - resolve encryption configuration for state and plan data.
///
/// Sources are merged lowest precedence first: the root declaration
/// (--root), each override document (-e) in order, then the
/// STATECRYPT_ENCRYPTION environment variable.
#[derive(Parser, Debug)]
#[command(name = "statecrypt")]
#[command(author, version, long_version = LONG_VERSION, about = "Resolve encryption configuration for state and plan data", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Root module encryption declaration (lowest precedence)
    #[arg(long = "root", global = true, value_name = "PATH")]
    pub root: Option<PathBuf>,

    /// Override document, may be repeated; later documents win.
    /// Must come before the subcommand.
    #[arg(short = 'e', long = "encryption-config", value_name = "PATH")]
    pub encryption_configs: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the merged configuration and the sources that contributed
    Resolve,

    /// Print the planned encryption flow for one purpose
    ///
    /// PURPOSE is one of backend, statefile, planfile or remote_state:<name>.
    Flow {
        /// Purpose to look up
        purpose: String,

        /// Document whose `backend` block is the default for a remote_state lookup
        #[arg(long, value_name = "PATH")]
        default: Option<PathBuf>,
    },

    /// Decode documents and report their diagnostics without merging
    Validate {
        /// Documents to check
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}
