// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

mod command;
mod config;
mod shell;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ramfs_core::RamFs;
use ramfs_logging::CliLoggingArgs;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use tracing::info;

use crate::config::ShellConfig;
use crate::shell::Shell;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run commands against a fresh in-memory RamFS instance"
)]
struct Cli {
    /// TOML file with filesystem and logging settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read commands from a file instead of stdin
    #[arg(long)]
    script: Option<PathBuf>,

    /// Attach specifier recorded in channel paths
    #[arg(long, default_value = "")]
    spec: String,

    /// Print the tree after the last command
    #[arg(long)]
    dump_tree: bool,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ShellConfig::load(path)?,
        None => ShellConfig::default(),
    };
    cli.logging
        .clone()
        .merged(config.logging.clone())
        .init("ramfs-shell")?;

    let fs = RamFs::new(config.fs).context("creating filesystem")?;
    let mut shell = Shell::new(fs, &cli.spec)?;
    let mut stdout = io::stdout().lock();

    let failures = match &cli.script {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("opening script {}", path.display()))?;
            info!(script = %path.display(), "running script");
            shell.run(BufReader::new(file), &mut stdout)?
        }
        None => shell.run(io::stdin().lock(), &mut stdout)?,
    };

    if cli.dump_tree {
        write!(stdout, "{}", shell.fs().dump_tree())?;
    }
    let stats = shell.fs().stats();
    info!(
        nodes = stats.nodes,
        blocks = stats.blocks,
        failures,
        "shell finished"
    );
    if failures > 0 {
        bail!("{failures} command(s) failed");
    }
    Ok(())
}
