//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

/// Daemon options used by depotd
#[derive(Clone, Debug, Parser)]
pub struct DaemonOpts {
    /// Bind address (host:port)
    #[arg(long, default_value = "0.0.0.0:9030")]
    pub bind: String,

    /// Directory where uploaded files are stored
    #[arg(long, default_value = "./files")]
    pub root: PathBuf,

    /// Registry metadata file
    #[arg(long, default_value = "file_metadata.json")]
    pub metadata: PathBuf,

    /// Append server events to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Connection options shared by every depot client subcommand
#[derive(Clone, Debug, Parser)]
pub struct ConnectOpts {
    /// Server address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:9030")]
    pub server: String,

    /// Username to identify as (must be unique among connected clients)
    #[arg(short, long)]
    pub user: String,
}
