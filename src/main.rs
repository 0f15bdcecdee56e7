//! rpi-kbuild - Raspberry Pi kernel builder.
//!
//! Clones the Raspberry Pi kernel, firmware and AUFS trees, patches AUFS
//! into the kernel, materializes a `.config`, cross-compiles and collects
//! kernel image, modules and firmware into an output tree.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use rpi_kbuild::commands;
use rpi_kbuild::config::Config;
use rpi_kbuild::process::{CommandFailed, System};

#[derive(Parser)]
#[command(name = "rpi-kbuild")]
#[command(about = "Raspberry Pi kernel builder")]
#[command(
    after_help = "QUICK START:\n  rpi-kbuild preflight     Check host tools\n  rpi-kbuild build         Fetch, patch, configure, compile, collect\n  rpi-kbuild show config   Print resolved settings\n  rpi-kbuild clean all     Remove sources and outputs\n\nSettings come from the environment (or .env): PLATFORM, AUFS_ENABLE,\nPARALLEL_OPT, USE_HARDFLOAT, USE_EXISTING_SRC, UPDATE_EXISTING, ..."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full build pipeline (default)
    Build {
        /// Keep running later stages after a failure (same as KEEP_GOING=YES)
        #[arg(long)]
        keep_going: bool,
    },

    /// Run preflight checks (verify host tools before build)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Remove build outputs (default) or source trees
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show resolved configuration
    Config,
    /// Show the manifest of the last build
    Manifest,
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Clean the output tree
    Output,
    /// Clean the kernel, firmware and AUFS working trees
    Sources,
    /// Clean sources and outputs
    All,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command.unwrap_or(Commands::Build { keep_going: false }) {
        Commands::Build { keep_going } => {
            commands::cmd_build(&config, &System, keep_going)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(&config, strict)?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Manifest => commands::show::ShowTarget::Manifest,
            };
            commands::cmd_show(&config, show_target)?;
        }

        Commands::Clean { what } => {
            let clean_target = match what {
                None | Some(CleanTarget::Output) => commands::clean::CleanTarget::Output,
                Some(CleanTarget::Sources) => commands::clean::CleanTarget::Sources,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(&config, clean_target)?;
        }
    }

    Ok(())
}

/// Exit with the status of the failing external command, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<CommandFailed>())
        .map(|failed| match u8::try_from(failed.code) {
            Ok(0) | Err(_) => 1,
            Ok(code) => code,
        })
        .unwrap_or(1)
}
