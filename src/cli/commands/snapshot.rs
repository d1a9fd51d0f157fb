//! Snapshot command implementation.

use crate::storage::SnapshotFile;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Snapshot operations.
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommand,
}

/// Snapshot subcommands.
#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// Inspect a persisted snapshot.
    Inspect {
        /// Snapshot path.
        path: PathBuf,
    },
}

/// Run the snapshot command.
pub fn run_snapshot(args: SnapshotArgs) -> Result<()> {
    match args.command {
        SnapshotCommand::Inspect { path } => {
            print!("{}", inspect(&path)?);
            Ok(())
        }
    }
}

/// Describe a snapshot file. Fails if the digest does not verify.
fn inspect(path: &Path) -> Result<String> {
    let snapshot = SnapshotFile::read_from_file(path)?;
    let bitmaps = snapshot.bitmaps()?;
    let stats = bitmaps.stats();

    let mut out = String::new();
    writeln!(out, "snapshot:    {}", path.display())?;
    writeln!(out, "index:       {}", snapshot.meta.index)?;
    writeln!(out, "digest:      {:016x} (verified)", snapshot.meta.digest)?;
    writeln!(out, "created_at:  {} ms", snapshot.meta.created_at_ms)?;
    writeln!(out, "image_bytes: {}", snapshot.meta.size_bytes)?;
    writeln!(out, "collections: {}", stats.collections)?;
    writeln!(out, "values:      {}", stats.total_values)?;
    for name in bitmaps.names() {
        writeln!(out, "  {:<24} {}", name, bitmaps.cardinality(name))?;
    }
    Ok(out)
}
