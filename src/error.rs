//! Error taxonomy for the fallible edges of the composition core.
//!
//! Per spec §7 every *mutating* composition/predictor method is total: it
//! clamps, degrades or no-ops rather than returning `Result`. The only
//! genuinely fallible operations are loading a rewrite table and
//! persisting/loading the history store, so those are the only two error
//! enums in the crate.

use std::io;

/// Failures while parsing a §6.1 rewrite-table file.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("row {row}: expected 3 or 4 tab-separated fields, found {found}")]
    MalformedRow { row: usize, found: usize },
    #[error("row {row}: unknown attribute {attr:?}")]
    UnknownAttribute { row: usize, attr: String },
    #[error("io error reading table: {0}")]
    Io(#[from] io::Error),
}

/// Failures while persisting or loading the history store (spec §4.8, §7).
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("blob too short ({len} bytes)")]
    TooShort { len: usize },
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("corrupt WAL frame at offset {offset}")]
    CorruptWalFrame { offset: usize },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
