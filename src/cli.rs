use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    version,
    about = "Scenario-aware tmux workspace orchestrator",
    after_help = "EXAMPLES:
    # Pick a project interactively
    mngr

    # Open a project directly
    mngr -p thesis

    # Inspect what mngr would do from here
    mngr status

SCENARIOS:
    outside tmux, no session     create the session, usage and log windows, then the project window
    outside tmux, session exists add a project window to the session and attach
    inside tmux                  turn the current window into the project window"
)]
pub struct Cli {
    /// Open this project without prompting
    #[arg(short, long, value_name = "KEY")]
    pub project: Option<String>,

    /// List configured projects and exit
    #[arg(short, long)]
    pub list: bool,

    /// Show the configuration file location and exit
    #[arg(long)]
    pub config_info: bool,

    /// Do not write a debug log for this run
    #[arg(long)]
    pub no_debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the detected scenario and session inventory as JSON
    Status,
    /// View or modify configuration settings
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Display current configuration settings
    #[command(after_help = "CONFIG FILE LOCATION:
    $MNGR_CONFIG, or $XDG_CONFIG_HOME/tmux-mngr/config.toml
    or ~/.config/tmux-mngr/config.toml")]
    Show,

    /// Set a value in the [settings] table
    ///
    /// Comments and formatting elsewhere in the file are preserved.
    #[command(after_help = "EXAMPLES:
    mngr config set session_name work
    mngr config set layout three-pane
    mngr config set pane_height_bottom 30

AVAILABLE SETTINGS:
    session_name, editor, assistant_command, assistant_model, monitor_command,
    pane_height_bottom, base_dir, layout, placement, park_transformed_window,
    debug_log")]
    Set {
        /// Setting to change
        key: String,
        /// New value
        value: String,
    },

    /// Write an example configuration file if none exists
    Init,
}

impl Cli {
    /// Whether this invocation talks to tmux.
    pub fn needs_tmux(&self) -> bool {
        match &self.command {
            Some(Command::Config(_)) => false,
            Some(Command::Status) => true,
            None => !self.list && !self.config_info,
        }
    }
}
