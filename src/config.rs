//! Configuration for QuoteStore
//!
//! Centralized configuration with sensible defaults.

use std::path::{Path, PathBuf};

/// Main configuration for a QuoteStore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Where committed state lives
    /// Internal structure (directory mode):
    ///   {data_dir}/
    ///     ├── {database_name}.qsdb   (snapshot)
    ///     └── {database_name}.lock   (held while a manager has it loaded)
    pub storage: StorageMode,

    /// Logical database name, one physical snapshot per name
    ///
    /// ASCII letters, digits, `_`, `-` and `.`, not starting with `.`.
    pub database_name: String,

    /// How commits reach the disk
    pub durability: Durability,

    /// Upper bound on the encoded snapshot size (bytes)
    pub quota_bytes: Option<u64>,

    // -------------------------------------------------------------------------
    // Schema Configuration
    // -------------------------------------------------------------------------
    /// What happens to existing data when the schema version is bumped
    pub migration_policy: MigrationPolicy,

    // -------------------------------------------------------------------------
    // Bridge Configuration
    // -------------------------------------------------------------------------
    /// Max queued requests; further submissions fail with a bridge error
    pub request_queue_capacity: usize,
}

/// Persistence substrate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// Snapshot files under a directory
    Directory(PathBuf),

    /// Process memory only; nothing survives a restart
    InMemory,
}

/// Snapshot sync behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// fsync the snapshot and its directory on every commit
    Fsync,

    /// Rename into place without fsync (faster, host OS decides)
    Buffered,
}

/// Schema upgrade behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPolicy {
    /// Keep records, add new indexes/stores, drop undeclared indexes
    Additive,

    /// Drop every declared store and recreate it empty
    DestructiveReplace,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageMode::Directory(PathBuf::from("./quotestore_data")),
            database_name: "market_data".to_string(),
            durability: Durability::Fsync,
            quota_bytes: None,
            migration_policy: MigrationPolicy::Additive,
            request_queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Data directory, if the store is disk-backed
    pub fn data_dir(&self) -> Option<&Path> {
        match &self.storage {
            StorageMode::Directory(dir) => Some(dir),
            StorageMode::InMemory => None,
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Persist snapshots under `path`
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage = StorageMode::Directory(path.into());
        self
    }

    /// Keep everything in memory
    pub fn in_memory(mut self) -> Self {
        self.config.storage = StorageMode::InMemory;
        self
    }

    /// Set the logical database name
    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.config.database_name = name.into();
        self
    }

    /// Set the commit durability mode
    pub fn durability(mut self, durability: Durability) -> Self {
        self.config.durability = durability;
        self
    }

    /// Cap the encoded snapshot size (in bytes)
    pub fn quota_bytes(mut self, bytes: u64) -> Self {
        self.config.quota_bytes = Some(bytes);
        self
    }

    /// Set the schema migration policy
    pub fn migration_policy(mut self, policy: MigrationPolicy) -> Self {
        self.config.migration_policy = policy;
        self
    }

    /// Set the bridge request queue bound
    pub fn request_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.request_queue_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
