//! Error types for BSA archive operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid archive data: {0}")]
    InvalidData(String),

    #[error("{count} file name hashes do not match their names")]
    InvalidHashes { count: usize },

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Cannot write to {path}: {source}")]
    AccessFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Source file missing: {0}")]
    SourceFileMissing(PathBuf),

    #[error("Extraction canceled")]
    Canceled,

    #[error("Worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidData(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
