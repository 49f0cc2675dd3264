//! Error types for compound file access.
use std::io;
use thiserror::Error;

use crate::common::binary::BinaryError;

/// Errors raised while reading or mutating a compound file.
///
/// Every variant is fatal for the operation that produced it. Write-path
/// failures may leave the container partially updated.
#[derive(Error, Debug)]
pub enum CfbError {
    /// IO error from the backing store
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Header field failed validation
    #[error("Malformed header ({field}): {detail}")]
    MalformedHeader { field: &'static str, detail: String },

    /// Directory record with an out-of-range type, color or link
    #[error("Invalid directory record #{stream_id}: {detail}")]
    InvalidRecord { stream_id: u32, detail: String },

    /// The store ended in the middle of a read
    #[error("Truncated store: {needed} bytes at offset {offset} are past the end")]
    TruncatedStore { offset: u64, needed: usize },

    /// An entry already exists at the path
    #[error("Path already exists: {0}")]
    PathConflict(String),

    /// Entry name exceeds 31 UTF-16 code units
    #[error("Name too long ({units} UTF-16 units, max 31): {name}")]
    NameTooLong { name: String, units: usize },

    /// A FAT/MiniFAT chain is broken or cyclic
    #[error("Chain integrity violation: {0}")]
    ChainIntegrity(String),

    /// No entry at the path or stream ID
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// Path is empty or contains an unusable segment
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Entry is not a stream
    #[error("Not a stream: {0}")]
    NotAStream(String),

    /// Entry is not a storage
    #[error("Not a storage: {0}")]
    NotAStorage(String),

    /// CLSID text is not a canonical GUID
    #[error("Invalid CLSID: {0}")]
    InvalidClsid(String),

    /// Rejected container options
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CfbError {
    pub(crate) fn malformed(field: &'static str, detail: impl Into<String>) -> Self {
        CfbError::MalformedHeader {
            field,
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_record(stream_id: u32, detail: impl Into<String>) -> Self {
        CfbError::InvalidRecord {
            stream_id,
            detail: detail.into(),
        }
    }
}

impl From<BinaryError> for CfbError {
    fn from(err: BinaryError) -> Self {
        CfbError::ChainIntegrity(err.to_string())
    }
}

impl From<CfbError> for io::Error {
    fn from(err: CfbError) -> Self {
        match err {
            CfbError::Io(e) => e,
            truncated @ CfbError::TruncatedStore { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, truncated)
            },
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Result type for compound file operations.
pub type CfbResult<T> = Result<T, CfbError>;
