//! CLI command definitions
//!
//! Defines the clap commands for the debug-bridge CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Debug a program through a DAP adapter (lldb-dap, codelldb, debugpy, ...)
    Dap {
        /// Path to the program to debug
        program: PathBuf,

        /// Arguments to pass to the program
        #[arg(last = true)]
        args: Vec<String>,

        /// Debug adapter to use (default from config, else lldb-dap)
        #[arg(long)]
        adapter: Option<String>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Launch a Node.js script under the inspector and debug it over CDP
    Node {
        /// Script to run
        script: PathBuf,

        /// Arguments to pass to the script
        #[arg(last = true)]
        args: Vec<String>,

        /// Extra arguments for the node runtime (e.g. --runtime-arg=--no-warnings)
        #[arg(long = "runtime-arg")]
        runtime_args: Vec<String>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Attach to a running inspector endpoint (node --inspect, Chrome)
    Attach {
        /// Inspector host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Inspector port
        #[arg(long, default_value_t = 9229)]
        port: u16,

        /// WebSocket debugger URL; skips /json discovery
        #[arg(long)]
        ws_url: Option<String>,

        #[command(flatten)]
        session: SessionArgs,
    },
}

/// Options shared by every session command
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Breakpoint location (file:line or function name); repeatable
    #[arg(long = "break", short = 'b')]
    pub breakpoints: Vec<String>,

    /// Expression to evaluate at every stop; repeatable
    #[arg(long = "eval", short = 'e')]
    pub watches: Vec<String>,

    /// Stop at program entry point
    #[arg(long)]
    pub stop_on_entry: bool,

    /// Disconnect after this many stops
    #[arg(long, default_value_t = 10)]
    pub max_stops: usize,

    /// Seconds to wait for the next debug event
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,
}
