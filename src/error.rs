//! Error types for archive operations.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ZipResult<T> = Result<T, ZipError>;

/// Errors produced while reading or writing archives.
///
/// Parsing and validation failures are always reported; the only silent
/// corrections are the documented fallbacks (filename charset fallback,
/// pre-1980 date clamping, dual check-byte acceptance on decrypt).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ZipError {
    /// The archive bytes do not form a valid single-disk ZIP file.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// The archive uses a feature outside STORED/DEFLATE × none/ZipCrypto.
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// An entry is encrypted and no password has been set.
    #[error("entry is encrypted and no password was set")]
    PasswordRequired,

    /// The decryption header check byte did not match.
    ///
    /// Almost certainly a wrong password, though a corrupted stream can
    /// also end up here; the legacy cipher verifies a single byte.
    #[error("check byte mismatch, the password is likely incorrect")]
    PasswordIncorrect,

    /// An entry's local header disagrees with its central directory record.
    #[error("local header mismatch for `{path}`")]
    HeaderMismatch { path: String },

    /// Duplicate archive path, or a file/folder kind clash while packing.
    #[error("path conflict: {0}")]
    PathConflict(String),

    /// Out-of-range index, empty path, existing output path, and similar.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An underlying file I/O operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
