//! Command-line interface definitions
//!
//! The CLI is a thin wrapper; all behavior lives in the library.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Workflow supervisor for phased AI-assisted development
#[derive(Debug, Parser)]
#[command(name = "ov", version, about)]
pub struct Cli {
    /// Project root to supervise (defaults to the current directory)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    /// Log level override (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the supervisor daemon in the background
    Start,

    /// Stop the running supervisor daemon
    Stop,

    /// Show supervisor and workflow status
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run the supervisor loop in the foreground (used by `start`)
    RunDaemon,

    /// Run health checks and print the report
    Health {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Inspect or clear the remediation queue
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },

    /// Print recent workflow log summaries
    Log {
        /// Number of entries to show
        #[arg(long, default_value_t = 20)]
        lines: usize,

        /// Keep following new entries
        #[arg(long, short)]
        follow: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// List live tasks in drain order
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Drop every live task
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["ov", "start"]);
        assert!(matches!(cli.command, Command::Start));

        let cli = Cli::parse_from(["ov", "queue", "list"]);
        assert!(matches!(
            cli.command,
            Command::Queue {
                command: QueueCommand::List { .. }
            }
        ));

        let cli = Cli::parse_from(["ov", "--project", "/tmp/p", "health", "--format", "json"]);
        assert_eq!(cli.project.as_deref(), Some(std::path::Path::new("/tmp/p")));
        assert!(matches!(
            cli.command,
            Command::Health {
                format: OutputFormat::Json
            }
        ));
    }

    #[test]
    fn test_log_defaults() {
        let cli = Cli::parse_from(["ov", "log"]);
        match cli.command {
            Command::Log { lines, follow } => {
                assert_eq!(lines, 20);
                assert!(!follow);
            }
            _ => panic!("expected log command"),
        }
    }
}
