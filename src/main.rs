//! Depot client CLI - upload, list, download, and delete files on a depot
//! server over the framed TCP protocol.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use depot::cli::ConnectOpts;
use depot::client::{Client, ConnectError};
use depot::protocol::display_name;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Depot client - talk to a depot file-registry server"
)]
struct Args {
    #[command(flatten)]
    connect: ConnectOpts,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Upload a local file under your username
    Upload {
        /// Path of the local file to upload
        file: PathBuf,
    },
    /// List every stored file and its owner
    List,
    /// Download any owner's file by name
    Download {
        /// Username of the file's owner
        owner: String,
        /// Filename as originally uploaded (without the owner prefix)
        filename: String,
        /// Where to write the downloaded content (defaults to the filename)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete one of your own files
    Delete {
        /// Filename as originally uploaded (without the owner prefix)
        filename: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut client = match Client::connect(&args.connect.server, &args.connect.user) {
        Ok(c) => c,
        Err(ConnectError::Rejected(reason)) => {
            anyhow::bail!("connection rejected: {}", reason);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("connect to {}", args.connect.server));
        }
    };
    client.on_notice(|msg| eprintln!("[server] {}", msg));

    match args.cmd {
        Cmd::Upload { file } => {
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("upload path has no usable filename")?
                .to_string();
            let content =
                std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            client.upload(&filename, &content)?;
            println!("uploaded {} ({} bytes)", filename, content.len());
        }
        Cmd::List => {
            let entries = client.list()?;
            if entries.is_empty() {
                println!("no files stored");
            } else {
                // Align the name column for readability
                let width = entries
                    .iter()
                    .map(|e| display_name(&e.filename).len())
                    .max()
                    .unwrap_or(0);
                for entry in &entries {
                    println!(
                        "{:<width$}  owner: {}",
                        display_name(&entry.filename),
                        entry.owner,
                        width = width
                    );
                }
            }
        }
        Cmd::Download {
            owner,
            filename,
            output,
        } => {
            let content = client.download(&owner, &filename)?;
            let out = output.unwrap_or_else(|| PathBuf::from(&filename));
            std::fs::write(&out, &content)
                .with_context(|| format!("write {}", out.display()))?;
            println!("downloaded {} ({} bytes) -> {}", filename, content.len(), out.display());
        }
        Cmd::Delete { filename } => {
            client.delete(&filename)?;
            println!("deleted {}", filename);
        }
    }

    client.close();
    Ok(())
}
