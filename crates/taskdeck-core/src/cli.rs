use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::filter::{PrioritySelection, StatusFilter};
use crate::task::Priority;

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskdeck",
    version,
    about = "taskdeck: personal tasks backed by a hosted datastore"
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Run against an in-process table instead of the configured remote.
    #[arg(long = "memory", global = true)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show tasks matching the status and priority filters.
    List {
        #[arg(long, default_value = "all", value_parser = parse_status)]
        status: StatusFilter,

        /// Repeat to select several priorities; `all` clears the selection.
        #[arg(long = "priority", value_parser = parse_selection)]
        priorities: Vec<PrioritySelection>,
    },
    /// Create a task.
    Add {
        title: String,

        #[arg(long)]
        due: String,

        #[arg(long, default_value = "medium", value_parser = parse_priority)]
        priority: Priority,
    },
    /// Flip a task between open and completed.
    Toggle { id: String },
    /// Change fields of a task.
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,

        #[arg(long)]
        clear_due: bool,

        #[arg(long, value_parser = parse_priority)]
        priority: Option<Priority>,

        #[arg(long)]
        completed: Option<bool>,
    },
    /// Delete a task.
    Delete { id: String },
    /// Month view of due dates.
    Calendar {
        /// Month as YYYY-MM; defaults to the current month.
        #[arg(long)]
        month: Option<String>,
    },
    /// Sidebar counts per status.
    Counts,
    /// Print the list again after every realtime change until Ctrl-C.
    Watch,
}

fn parse_status(raw: &str) -> anyhow::Result<StatusFilter> {
    raw.parse()
}

fn parse_selection(raw: &str) -> anyhow::Result<PrioritySelection> {
    raw.parse()
}

fn parse_priority(raw: &str) -> anyhow::Result<Priority> {
    raw.parse()
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Command, GlobalCli};
    use crate::filter::{PrioritySelection, StatusFilter};
    use crate::task::Priority;

    #[test]
    fn parses_list_filters() {
        let cli = GlobalCli::parse_from([
            "taskdeck",
            "--memory",
            "list",
            "--status",
            "in-progress",
            "--priority",
            "high",
            "--priority",
            "low",
        ]);
        assert!(cli.memory);
        match cli.command {
            Some(Command::List { status, priorities }) => {
                assert_eq!(status, StatusFilter::InProgress);
                assert_eq!(
                    priorities,
                    vec![
                        PrioritySelection::Only(Priority::High),
                        PrioritySelection::Only(Priority::Low)
                    ]
                );
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_global_overrides_after_subcommand() {
        let cli = GlobalCli::parse_from([
            "taskdeck",
            "add",
            "Write report",
            "--due",
            "03/20/2024",
            "--rc",
            "remote.table=todos",
            "-vv",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.rc_overrides.len(), 1);
        assert_eq!(cli.rc_overrides[0].key, "remote.table");
        match cli.command {
            Some(Command::Add { title, due, priority }) => {
                assert_eq!(title, "Write report");
                assert_eq!(due, "03/20/2024");
                assert_eq!(priority, Priority::Medium);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn edit_rejects_due_and_clear_together() {
        let parsed = GlobalCli::try_parse_from([
            "taskdeck",
            "edit",
            "1",
            "--due",
            "2024-03-20",
            "--clear-due",
        ]);
        assert!(parsed.is_err());
    }
}
