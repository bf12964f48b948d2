//! Error types for parsing and validating core types.

/// Errors raised when parsing or validating Kiln core types.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// A sector name did not match the `s-t0{miner}-{number}` grammar.
    #[error("invalid sector name: {0}")]
    InvalidSectorName(String),

    /// A string did not name a known sector file type.
    #[error("invalid sector file type: {0}")]
    InvalidFileType(String),

    /// A file-type set contained a flag with no overhead entry.
    #[error("no space overhead known for file type: {0}")]
    UnknownOverhead(crate::SectorFileType),

    /// A piece size failed validation.
    #[error("invalid piece size: {0}")]
    InvalidPieceSize(u64),
}
