//! treewatch: keep a mirror directory in step with a watched source tree.
//!
//! # Usage
//!
//! ```text
//! treewatch watch  [--config <file>] [--source <dir>] [--mirror <dir>] [...]
//! treewatch sync   [--config <file>] [--source <dir>] [--mirror <dir>] [--json]
//! treewatch status
//! treewatch stop
//! treewatch logs   [--lines <n>]
//! treewatch config [--write] [...]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommandArgs, logs::LogsArgs, status::StatusArgs, sync::SyncArgs,
    watch::WatchArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "treewatch",
    version,
    about = "Watch a directory tree and keep a mirror synchronized",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the watcher in the foreground until Ctrl-C, SIGTERM or `treewatch stop`.
    Watch(WatchArgs),

    /// Run one full reconciliation and exit.
    Sync(SyncArgs),

    /// Query the running watcher over its control socket.
    Status(StatusArgs),

    /// Ask the running watcher to shut down gracefully.
    Stop,

    /// Print recent audit log lines.
    Logs(LogsArgs),

    /// Print the effective configuration, optionally saving it.
    Config(ConfigCommandArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Watch(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Stop => commands::stop::run(),
        Commands::Logs(args) => args.run(),
        Commands::Config(args) => args.run(),
    }
}
