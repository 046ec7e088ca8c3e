//! Statecrypt CLI - resolve encryption configuration for state and plan data.

use clap::Parser;
use statecrypt::cli::{Cli, Commands};
use statecrypt::commands::{self, Output};
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding the log filter (e.g. `debug`, `statecrypt=trace`).
const LOG_ENV: &str = "STATECRYPT_LOG";

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let human = cli.human_readable;

    if let Err(e) = run_command(cli) {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> Result<(), statecrypt::Error> {
    let human = cli.human_readable;
    match cli.command {
        Commands::Resolve => {
            let (sources, diags) =
                commands::load_sources(cli.root.as_deref(), &cli.encryption_configs);
            let result = commands::resolve(sources, diags)?;
            output(&result, human);
        }
        Commands::Flow { purpose, default } => {
            let (sources, diags) =
                commands::load_sources(cli.root.as_deref(), &cli.encryption_configs);
            let result = commands::flow(sources, diags, &purpose, default.as_deref())?;
            output(&result, human);
        }
        Commands::Validate { paths } => {
            let result = commands::validate(&paths);
            output(&result, human);
            if !result.valid {
                process::exit(1);
            }
        }
    }
    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

/// Log to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
