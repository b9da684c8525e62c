mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tablevault_engine::errors::EXIT_INFRASTRUCTURE;
use tablevault_engine::ArchiveError;

#[derive(Parser)]
#[command(
    name = "tablevault",
    version,
    about = "Time-windowed archiver for relational tables"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an archive job
    Run {
        /// Path to archive YAML file
        config: PathBuf,
        /// Never delete from the source, whatever the config says
        #[arg(long)]
        dry_run: bool,
        /// Skip the object storage sync and retention cleanup
        #[arg(long)]
        no_upload: bool,
    },
    /// Validate configuration and connectivity
    Check {
        /// Path to archive YAML file
        config: PathBuf,
    },
    /// Show what a run would archive, without writing anything
    Plan {
        /// Path to archive YAML file
        config: PathBuf,
    },
    /// List stored checkpoints
    Checkpoints {
        /// Path to archive YAML file
        config: PathBuf,
    },
}

/// Process exit code for a failed command.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<ArchiveError>()
        .map_or(EXIT_INFRASTRUCTURE, ArchiveError::exit_code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let result = match cli.command {
        Commands::Run {
            config,
            dry_run,
            no_upload,
        } => commands::run::execute(&config, dry_run, no_upload).await,
        Commands::Check { config } => commands::check::execute(&config).await,
        Commands::Plan { config } => commands::plan::execute(&config).await,
        Commands::Checkpoints { config } => commands::checkpoints::execute(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::parse_from(["tablevault", "run", "job.yaml", "--dry-run", "--no-upload"]);
        match cli.command {
            Commands::Run {
                config,
                dry_run,
                no_upload,
            } => {
                assert_eq!(config, PathBuf::from("job.yaml"));
                assert!(dry_run);
                assert!(no_upload);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn archive_errors_keep_their_exit_code() {
        let err = anyhow::Error::new(ArchiveError::RegistryUnavailable("down".into()));
        assert_eq!(exit_code(&err), 2);
        assert_eq!(exit_code(&anyhow::anyhow!("bad yaml")), 1);
    }
}
