//! Storage Module
//!
//! The persistence substrate underneath the engine.
//!
//! ## Responsibilities
//! - Locate (and create) the snapshot file for a database
//! - Hold an exclusive lock on it so only one manager owns the database
//! - Write committed state atomically (write → fsync → rename → fsync dir)
//! - Load and validate the last committed snapshot on open
//! - Enforce the configured size quota
//!
//! Secondary indexes never reach disk; they are rebuilt from records.

mod snapshot;

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{Config, Durability, StorageMode};
use crate::error::{Result, StoreError};

/// File extension of committed snapshots
const SNAPSHOT_EXT: &str = "qsdb";

/// File extension of the per-database lock file
const LOCK_EXT: &str = "lock";

/// Where a database's committed state lives
#[derive(Debug)]
pub(crate) struct Substrate {
    /// Snapshot path; `None` for in-memory databases
    path: Option<PathBuf>,
    durability: Durability,
    quota_bytes: Option<u64>,

    /// Exclusive lock, released when the substrate is dropped
    _lock_file: Option<File>,
}

impl Substrate {
    /// Prepare the substrate for `config`
    ///
    /// Creates the data directory, takes the database lock, and sweeps temp
    /// files left by an interrupted commit. Any failure here means the store
    /// cannot open.
    pub fn open(config: &Config) -> Result<Self> {
        Self::validate_name(&config.database_name)?;

        let (path, lock_file) = match &config.storage {
            StorageMode::InMemory => (None, None),
            StorageMode::Directory(dir) => {
                fs::create_dir_all(dir).map_err(|e| {
                    StoreError::Open(format!("cannot create {}: {}", dir.display(), e))
                })?;
                let lock_file = Self::lock(&dir.join(format!("{}.{}", config.database_name, LOCK_EXT)))?;
                let path = dir.join(format!("{}.{}", config.database_name, SNAPSHOT_EXT));
                Self::remove_stale_temp(&path)?;
                (Some(path), Some(lock_file))
            }
        };

        Ok(Self {
            path,
            durability: config.durability,
            quota_bytes: config.quota_bytes,
            _lock_file: lock_file,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load the committed snapshot, if one exists
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<(u32, T)>> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(None),
        };

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Open(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let (version, payload) = snapshot::decode(&bytes)?;
        let state = bincode::deserialize(payload)?;
        tracing::debug!(
            "Loaded snapshot {} (schema v{}, {} bytes)",
            path.display(),
            version,
            bytes.len()
        );
        Ok(Some((version, state)))
    }

    /// Commit `state` as the new snapshot
    ///
    /// Either the previous snapshot or the new one is on disk afterwards,
    /// never a mix.
    pub fn save<T: Serialize>(&self, version: u32, state: &T) -> Result<()> {
        if self.path.is_none() && self.quota_bytes.is_none() {
            return Ok(());
        }

        let payload = bincode::serialize(state)?;
        let frame = snapshot::encode(version, &payload);

        if let Some(quota) = self.quota_bytes {
            if frame.len() as u64 > quota {
                return Err(StoreError::QuotaExceeded {
                    required: frame.len() as u64,
                    quota,
                });
            }
        }

        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        let temp_path = Self::temp_path(path);

        // Step 1: Write the full frame to a temp file
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&frame)?;

        // Step 2: fsync the temp file
        if self.durability == Durability::Fsync {
            file.sync_all()?;
        }
        drop(file);

        // Step 3: Atomic rename over the previous snapshot
        fs::rename(&temp_path, path)?;

        // Step 4: fsync the directory so the rename survives a crash
        if self.durability == Durability::Fsync {
            if let Some(dir) = path.parent() {
                Self::sync_dir(dir)?;
            }
        }

        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Database names become file names inside the data directory
    fn validate_name(name: &str) -> Result<()> {
        let valid_chars = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if name.is_empty() || name.starts_with('.') || !valid_chars {
            return Err(StoreError::Open(format!("invalid database name {:?}", name)));
        }
        Ok(())
    }

    /// Take the exclusive lock at `path`, failing if anyone else holds it
    fn lock(path: &Path) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::Open(format!("cannot open lock file {}: {}", path.display(), e)))?;
        file.try_lock_exclusive().map_err(|_| {
            StoreError::Open(format!(
                "database lock {} is held by another manager or process",
                path.display()
            ))
        })?;
        Ok(file)
    }

    /// "market_data.qsdb" → ".market_data.qsdb.tmp"
    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.tmp", name))
    }

    fn remove_stale_temp(path: &Path) -> Result<()> {
        let temp = Self::temp_path(path);
        match fs::remove_file(&temp) {
            Ok(()) => {
                tracing::warn!("Removed stale snapshot temp file {}", temp.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Open(format!(
                "cannot remove {}: {}",
                temp.display(),
                e
            ))),
        }
    }

    #[cfg(unix)]
    fn sync_dir(dir: &Path) -> Result<()> {
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(_dir: &Path) -> Result<()> {
        Ok(())
    }
}
