use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "kestrel",
    about = "Supervises interactive AI coding sessions running in tmux panes",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the daemon and monitor every registered session
    Run,

    /// Register a session for supervision
    Add {
        /// Session identifier, unique per daemon
        id: String,

        /// tmux pane id the session lives in (e.g. "%3")
        pane: String,

        /// Human label; defaults to the id
        #[arg(long)]
        name: Option<String>,
    },

    /// Type a message into a session's pane and submit it
    Send {
        /// Session identifier
        id: String,

        /// Text to type
        text: String,
    },

    /// List sessions in the registry
    Sessions,

    /// Show effective configuration
    Config,
}
