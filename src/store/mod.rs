//! Remote content store abstraction.
//!
//! The daemon only ever talks to the store through this narrow capability
//! set, so the synchronizer can be exercised against an in-memory fake.
//! The store is a versioned, path-addressed blob tree: reads return an
//! opaque version token and updates/deletes must present it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod github;
#[cfg(test)]
pub mod memory;

/// Directory holding store automation; never listed in the manifest.
pub const INFRA_DIR: &str = ".github";

/// Scheduled history-compaction workflow. Its presence is the sentinel
/// marking a store as already bootstrapped.
pub const COMPACTION_WORKFLOW_PATH: &str = ".github/workflows/squash-history.yml";

/// Actions secret the compaction workflow pushes with.
pub const BOOTSTRAP_SECRET_NAME: &str = "ACCESS_TOKEN";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("version conflict at {0}")]
    Conflict(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store returned {status} for {path}: {message}")]
    Api {
        status: u16,
        path: String,
        message: String,
    },

    #[error("could not seal secret value: {0}")]
    Secret(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// A blob read from the store together with its concurrency token.
#[derive(Debug, Clone)]
pub struct RemoteBlob {
    pub path: String,
    pub version: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry of a directory listing, in the store's own listing order.
#[derive(Debug, Clone)]
pub struct ListEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    /// Version token, usable to delete the blob without a separate read.
    pub version: String,
    /// Direct download reference for file entries.
    pub download_ref: Option<String>,
}

impl ListEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a blob. `StoreError::NotFound` signals absence; every other
    /// error is a genuine failure.
    async fn get_blob(&self, path: &str) -> Result<RemoteBlob, StoreError>;

    /// List a directory's entries. The empty path lists the store root.
    async fn list_dir(&self, path: &str) -> Result<Vec<ListEntry>, StoreError>;

    async fn create_blob(&self, path: &str, content: &[u8], message: &str)
        -> Result<(), StoreError>;

    /// Replace an existing blob. A token mismatch against a concurrent
    /// writer surfaces as `StoreError::Conflict`.
    async fn update_blob(
        &self,
        path: &str,
        content: &[u8],
        version: &str,
        message: &str,
    ) -> Result<(), StoreError>;

    async fn delete_blob(&self, path: &str, version: &str, message: &str)
        -> Result<(), StoreError>;

    /// Timestamp of the most recent change affecting `path`.
    async fn last_change(&self, path: &str) -> Result<DateTime<Utc>, StoreError>;

    /// Fetch raw blob bytes via a listing's `download_ref`.
    async fn download(&self, download_ref: &str) -> Result<Vec<u8>, StoreError>;
}

/// One-time side setup performed against an uninitialized store. Invoked at
/// most once, guarded by the absence of [`COMPACTION_WORKFLOW_PATH`].
#[async_trait]
pub trait StoreBootstrap: Send + Sync {
    /// Allow scheduled automation to write to the store.
    async fn grant_workflow_write(&self) -> Result<(), StoreError>;

    /// Provision a named secret for the automation to authenticate with.
    async fn provision_secret(&self, name: &str, value: &str) -> Result<(), StoreError>;

    /// Install the scheduled history-compaction job (writes the sentinel).
    async fn install_compaction_job(&self) -> Result<(), StoreError>;
}
