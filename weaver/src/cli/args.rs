//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Weaver - stream and manage assistant sessions from the terminal
#[derive(Parser, Debug)]
#[command(name = "weaver")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Connection and storage options shared by every command
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// REST API base URL
    #[arg(long, global = true, env = "WEAVER_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket base URL
    #[arg(long, global = true, env = "WEAVER_WS_URL")]
    pub ws_url: Option<String>,

    /// Bearer token for the API and chat channel
    #[arg(long, global = true, env = "WEAVER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Directory for the session cache and drafts
    #[arg(long, global = true, env = "WEAVER_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a message to a session and stream the reply
    Chat {
        /// Session ID
        session: String,

        /// Message to send (falls back to the saved draft)
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
    },

    /// Manage sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Print the saved draft for a session
    Draft {
        /// Session ID
        session: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List a project's sessions from the server and cache them
    List {
        /// Project ID
        #[arg(short, long)]
        project: String,
    },

    /// Create a session
    New {
        /// Project ID
        #[arg(short, long)]
        project: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Rename a session
    Rename {
        /// Session ID
        id: String,

        /// New display name
        name: String,
    },

    /// Show cached sessions without contacting the server
    Cached,

    /// Drop expired entries from the cache
    Sweep,

    /// Remove a session from the cache only
    Forget {
        /// Session ID
        id: String,
    },

    /// Delete a session on the server and forget it locally
    Delete {
        /// Session ID
        id: String,
    },
}
