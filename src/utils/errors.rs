//! Custom error types for the backup daemon.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Archive entry escapes the destination directory: {0}")]
    UnsafeArchivePath(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CourierError>;
