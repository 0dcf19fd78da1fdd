use anyhow::{Context, Result};
use clap::Parser;
use std::sync::mpsc;

use depot::cli::DaemonOpts;
use depot::logger::{EventLog, StderrLog, TextLog};
use depot::server;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    std::fs::create_dir_all(&opts.root)
        .with_context(|| format!("create files directory {}", opts.root.display()))?;
    let canonical_root = std::fs::canonicalize(&opts.root)
        .with_context(|| format!("canonicalize root path {}", opts.root.display()))?;

    println!("Starting depot daemon:");
    println!("  Root:     {}", canonical_root.display());
    println!("  Metadata: {}", opts.metadata.display());
    println!("  Bind:     {}", opts.bind);

    if opts.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: binding to 0.0.0.0 exposes the daemon to all interfaces");
        eprintln!("   This protocol is unencrypted; the username check is not authentication.");
        eprintln!("   Only use on trusted networks (LAN).");
    }

    let log: Box<dyn EventLog> = match &opts.log_file {
        Some(path) => Box::new(
            TextLog::new(path)
                .with_context(|| format!("open log file {}", path.display()))?,
        ),
        None => Box::new(StderrLog),
    };

    let handle = server::start(&opts.bind, &canonical_root, &opts.metadata, log)?;
    eprintln!("depot daemon listening on {}", handle.local_addr());

    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    let _ = rx.recv();
    eprintln!("shutting down...");
    handle.shutdown()?;
    eprintln!("depot daemon stopped");
    Ok(())
}
