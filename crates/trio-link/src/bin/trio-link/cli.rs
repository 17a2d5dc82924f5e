//! CLI definitions for trio-link.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "trio-link",
    version,
    about = "Trio controller management tool",
    infer_subcommands = true,
    after_help = "Examples:\n  trio-link --ip 192.168.0.250 ls\n  trio-link --ip 192.168.0.250 cmd ?VERSION\n  trio-link --controller cell1 ws trio.yaml check\n  trio-link ws trio.yaml upload --no-restart"
)]
pub struct Cli {
    #[command(flatten)]
    pub target: Target,
    /// Log every command sent and reply received.
    #[arg(long, global = true)]
    pub trace: bool,
    /// Show protocol details.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct Target {
    /// Controller IP/hostname, optionally with `:port`.
    #[arg(long, global = true)]
    pub ip: Option<String>,
    /// Configuration file (defaults to ./trio.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Controller name from the configuration file.
    #[arg(long, global = true, conflicts_with = "ip")]
    pub controller: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a controller command like ?VERSION or 'ETHERCAT(0,0)'.
    Cmd {
        /// Command words, joined with spaces.
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// List programs stored in the controller.
    Ls {
        /// Print the listing as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show processes and their CPU usage.
    Top,
    /// Show system errors and peak system load.
    Status,
    /// EtherCAT network commands.
    Ethercat {
        #[command(subcommand)]
        action: EthercatAction,
    },
    /// Display a program stored in the controller.
    Show {
        /// Program name, with or without file extension.
        program: String,
    },
    /// Halt running programs so the command channel is clean.
    Halt,
    /// Restart the controller.
    Restart {
        /// Do not wait for the controller to come back online.
        #[arg(long)]
        no_wait: bool,
    },
    /// Workspace management.
    Ws {
        /// Workspace manifest (YAML).
        wsfile: PathBuf,
        #[command(subcommand)]
        action: WsAction,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum EthercatAction {
    /// List slaves on the network.
    List,
    /// Print the network state.
    State,
    /// Switch the network to operational.
    Start,
    /// Stop the network.
    Stop,
    /// Reinitialize the network.
    Reinit,
    /// Switch the network to a given state.
    #[command(alias = "set_state")]
    SetState {
        /// initial, pre-op, safe-op or operational.
        state: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum WsAction {
    /// Create a workspace from the controller content.
    Create {
        /// Folder for program files (defaults to the manifest folder).
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Check that the workspace is in sync with the controller.
    Check {
        /// Do not report extra programs in the controller.
        #[arg(long)]
        no_extra: bool,
        /// List changed programs without showing their differences.
        #[arg(long)]
        no_diff: bool,
    },
    /// Upload the workspace to the controller.
    Upload {
        /// Erase every program in the controller first.
        #[arg(long)]
        clear: bool,
        /// Keep programs that are not in the workspace.
        #[arg(long)]
        keep_extra: bool,
        /// Do not restart the controller even when a change needs it.
        #[arg(long)]
        no_restart: bool,
    },
    /// Download changes from the controller into the workspace.
    Download {
        /// Accept every change without asking.
        #[arg(long, short)]
        yes: bool,
    },
}
