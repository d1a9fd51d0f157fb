//! Persisted snapshot files.
//!
//! A node writes its leader's snapshot image to disk on shutdown and
//! restores from it on start. The file is a bincode [`SnapshotFile`]: the
//! image produced by the state machine plus metadata recording the log
//! index it covers and its digest, which is checked on every read.

use crate::bitmap::Bitmaps;
use crate::replica::image_digest;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Snapshot metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Last log index reflected in the image.
    pub index: u64,
    /// Digest of the image bytes.
    pub digest: u64,
    /// Creation timestamp.
    pub created_at_ms: u64,
    /// Image size in bytes.
    pub size_bytes: u64,
}

/// Snapshot image with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub meta: SnapshotMeta,
    pub image: Vec<u8>,
}

impl SnapshotFile {
    /// Wrap an image taken at `index`.
    pub fn new(index: u64, image: Vec<u8>) -> Self {
        Self {
            meta: SnapshotMeta {
                index,
                digest: image_digest(&image),
                created_at_ms: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64,
                size_bytes: image.len() as u64,
            },
            image,
        }
    }

    /// Check the recorded digest against the image.
    pub fn verify(&self) -> Result<()> {
        let actual = image_digest(&self.image);
        if actual != self.meta.digest {
            bail!(
                "snapshot digest mismatch: recorded {:016x}, computed {:016x}",
                self.meta.digest,
                actual
            );
        }
        Ok(())
    }

    /// Decode the image into a collection.
    pub fn bitmaps(&self) -> Result<Bitmaps> {
        Bitmaps::from_bytes(&self.image).context("failed to decode snapshot image")
    }

    /// Serialize the snapshot to bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("failed to serialize snapshot")
    }

    /// Deserialize a snapshot from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("failed to deserialize snapshot")
    }

    /// Write the snapshot to `path`, creating parent directories.
    ///
    /// The file is written beside its destination and renamed into place,
    /// so a crash never leaves a truncated snapshot behind.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create snapshot directory {}", parent.display())
            })?;
        }
        let tmp = path.with_extension("tmp");
        {
            let file = std::fs::File::create(&tmp).context("failed to create snapshot file")?;
            let mut writer = BufWriter::new(file);
            let bytes = self.serialize()?;
            writer.write_all(&bytes).context("failed to write snapshot")?;
            writer.flush().context("failed to flush snapshot")?;
            writer
                .get_ref()
                .sync_all()
                .context("failed to sync snapshot")?;
        }
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move snapshot into {}", path.display()))?;
        Ok(())
    }

    /// Read and verify a snapshot from `path`.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open snapshot file {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .context("failed to read snapshot")?;
        let snapshot = Self::deserialize(&bytes)?;
        snapshot.verify()?;
        Ok(snapshot)
    }

    /// Read `path` if it exists.
    pub fn load_if_present(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::read_from_file(path).map(Some)
    }
}
