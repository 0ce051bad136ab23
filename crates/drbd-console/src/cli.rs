//! Command line definition.

use std::io;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(name = "drbd-console", version)]
#[command(about = "Live DRBD resource monitor with a management command queue", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the per-user config directory).
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Replay events from a file instead of running the events source.
    #[arg(long, value_name = "PATH")]
    pub events_file: Option<PathBuf>,

    /// Print a status summary after the initial state and exit.
    #[arg(long)]
    pub no_ui: bool,

    /// Write diagnostics to this file.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn write_completions(shell: Shell) {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replay_options() {
        let cli = Cli::try_parse_from([
            "drbd-console",
            "--no-ui",
            "--events-file",
            "events.txt",
            "--config",
            "console.toml",
        ])
        .expect("valid arguments");
        assert!(cli.no_ui);
        assert_eq!(cli.events_file, Some(PathBuf::from("events.txt")));
        assert_eq!(cli.config, Some(PathBuf::from("console.toml")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn completions_subcommand_takes_a_shell() {
        let cli = Cli::try_parse_from(["drbd-console", "completions", "bash"]).expect("valid");
        assert!(matches!(
            cli.command,
            Some(Command::Completions { shell: Shell::Bash })
        ));
        assert!(Cli::try_parse_from(["drbd-console", "completions", "tcsh"]).is_err());
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
