//! Error taxonomy for index building and random access.

use std::io;

/// Errors surfaced by index building, lookup and random access.
///
/// Lookup failures (`NotFound`, `IndexOutOfRange`, `CursorConflict`) never
/// invalidate an index. `IndexStale` is recovered by a rebuild unless the
/// index was opened read-only. `Format` and `Gzip` during a build abort the
/// build and remove the partial index file.
#[derive(Debug, thiserror::Error)]
pub enum Error
{
    /// Unknown sequence or read name.
    #[error("sequence `{0}` not found")]
    NotFound(String),

    /// Numeric id outside the valid range, or an invalid interval.
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    /// Input is neither FASTA nor FASTQ, or violates record structure.
    #[error("format error: {0}")]
    Format(String),

    /// Truncated, corrupt or checkpoint-inconsistent compressed stream.
    #[error("gzip error: {0}")]
    Gzip(String),

    /// Persisted index disagrees with the source file or schema version.
    #[error("stale index: {0}")]
    IndexStale(String),

    /// Incompatible concurrent iteration and random access in one session.
    #[error("cursor conflict: {0}")]
    CursorConflict(String),

    /// Underlying filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Embedded index database failure.
    #[error("index store error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error
{
    /// True for conditions the open path recovers from by rebuilding the
    /// index: stale headers and store-level corruption.
    pub fn is_rebuildable(&self) -> bool
    {
        matches!(self, Error::IndexStale(_) | Error::Store(_))
    }
}
