//! Crate-wide error type.
//!
//! Mirrors the five error kinds from the engine's error handling design:
//! query-semantic, logic (unrecoverable), I/O, arithmetic/type, and
//! interruption. Everything fallible in this crate returns `EngineResult<T>`.

use std::path::PathBuf;

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected at plan-preparation time: unknown variable in a projection,
    /// a property assigned two literals in the same pattern, an invalid
    /// `LIMIT`, etc. The query is rejected; nothing was executed.
    #[error("semantic error: {0}")]
    Semantic(String),

    /// Unhandled object-identifier kind, inconsistent page metadata, or any
    /// other condition the engine's own invariants rule out. Not locally
    /// recoverable.
    #[error("logic error: {0}")]
    Logic(String),

    /// Disk full, file missing, or any other I/O failure surfaced from the
    /// storage substrate.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 56-bit integer overflow, a mixed-type comparison inside an
    /// aggregate, or any other arithmetic/type mismatch. Per spec, the
    /// offending tuple is excluded rather than failing the whole query;
    /// this variant exists for the few call sites where that isn't
    /// possible (e.g. packing a value at insert time).
    #[error("arithmetic/type error: {0}")]
    Arithmetic(String),

    /// The per-query interruption flag was observed set. Operators unwind
    /// and release their pins; partial output already emitted is the
    /// caller's to discard.
    #[error("query interrupted")]
    Interrupted,
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io { path: path.into(), source }
    }

    pub fn semantic(msg: impl Into<String>) -> Self {
        EngineError::Semantic(msg.into())
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        EngineError::Logic(msg.into())
    }
}
