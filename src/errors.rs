//! Error taxonomy (component C8). One enum covering every fatal condition
//! named in §7; recoverable conditions (hasher misses, unknown postfix
//! indices, disambiguation collisions) are logged via [`log`] at their call
//! sites instead of being threaded through `Result`, matching the spec's
//! "warn and keep going" policy for those cases.

use thiserror::Error;

pub type ElementMapResult<T> = Result<T, ElementMapError>;

#[derive(Debug, Error)]
pub enum ElementMapError {
    #[error("name {name:?} is already bound to a different element")]
    NameConflict { name: String },

    #[error("malformed restore stream at line {line}: {detail}")]
    StreamFormat { line: usize, detail: String },

    #[error("semantic consistency error at line {line}: {detail}")]
    SemanticConsistency { line: usize, detail: String },

    #[error("child record truncated at line {line}")]
    TruncatedChildRecord { line: usize },

    #[error("duplicate mapped child element after disambiguation")]
    DuplicateChildMap,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse integer field: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
}
