//! Error and Result types for archive decoding and value queries.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A convenience `Result` type for statarc operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Broad classification of an [`ArchiveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The byte stream does not follow the archive format.
    Format,
    /// The caller asked for something inconsistent (bad filter, bad combination).
    Configuration,
    /// The operation is not supported by this source (e.g. updating a gzip archive).
    Capability,
    /// Underlying I/O failure.
    Io,
    /// An internal invariant was violated.
    Internal,
}

/// The error type for archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive version {version} is no longer supported (minimum {min})")]
    VersionTooOld { version: u8, min: u8 },

    #[error("archive version {version} is newer than this decoder supports (maximum {max})")]
    VersionTooNew { version: u8, max: u8 },

    #[error("unexpected token {token} at byte offset {offset}")]
    UnknownToken { token: u8, offset: u64 },

    #[error("archive does not start with a header")]
    MissingHeader,

    #[error("unknown stat type code {0}")]
    UnknownTypeCode(i8),

    #[error("sample references undeclared resource type {0}")]
    UnknownResourceType(i32),

    #[error("sample references undeclared resource instance {0}")]
    UnknownResourceInstance(i32),

    #[error("stat offset {offset} out of range for type with {stat_count} stats")]
    StatOffsetOutOfRange { offset: usize, stat_count: usize },

    #[error("bit series filled {filled} of {expected} requested values")]
    FillMismatch { expected: usize, filled: usize },

    #[error("invalid filter {0:?}, expected one of none, per-second, per-sample")]
    InvalidFilter(String),

    #[error("invalid combine type {0:?}, expected one of none, file, global")]
    InvalidCombineType(String),

    #[error("invalid name pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("cannot combine values: {0}")]
    IncompatibleCombination(String),

    #[error("trim window [{start}, {end}) ends before it starts")]
    InvalidTrimWindow { start: i64, end: i64 },

    #[error("archive {} cannot be updated: stream is not resumable", .0.display())]
    NotUpdatable(PathBuf),

    #[error("reader has been closed")]
    ReaderClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::VersionTooOld { .. }
            | ArchiveError::VersionTooNew { .. }
            | ArchiveError::UnknownToken { .. }
            | ArchiveError::MissingHeader
            | ArchiveError::UnknownTypeCode(_)
            | ArchiveError::UnknownResourceType(_)
            | ArchiveError::UnknownResourceInstance(_)
            | ArchiveError::StatOffsetOutOfRange { .. } => ErrorKind::Format,
            ArchiveError::FillMismatch { .. } | ArchiveError::InvalidTrimWindow { .. } => {
                ErrorKind::Internal
            }
            ArchiveError::InvalidFilter(_)
            | ArchiveError::InvalidCombineType(_)
            | ArchiveError::InvalidPattern { .. }
            | ArchiveError::IncompatibleCombination(_) => ErrorKind::Configuration,
            ArchiveError::NotUpdatable(_) | ArchiveError::ReaderClosed => ErrorKind::Capability,
            ArchiveError::Io(_) => ErrorKind::Io,
        }
    }
}
