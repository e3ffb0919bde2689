//! Compiler error taxonomy (design §4.11 / §7).
//!
//! Every fallible core API returns `Result<T, CompileError>`. The CLI binary is
//! the only place these get wrapped into an `anyhow::Error` for top-level
//! reporting.

use thiserror::Error;

/// A line number, when the failing phase still has one available.
pub type Line = Option<u32>;

/// All error kinds the compiler can produce, matching design §7 one-for-one.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("usage: tc <input> <output> [--platform linux|windows|macos]")]
    Usage,

    #[error("could not open input file {path}: {source}")]
    IoOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read input file {path}: {source}")]
    IoRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write output file {path}: {source}")]
    IoWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("input file is empty or entirely whitespace")]
    EmptyInput,

    #[error("invalid character at line {line:?}")]
    LexInvalidChar { line: Line },

    #[error("unexpected token at line {line:?}: {what}")]
    ParseUnexpectedToken { line: Line, what: String },

    #[error("parser node pool exhausted (capacity {capacity})")]
    ParsePoolExhausted { capacity: usize },

    #[error("AST corrupt: poison sentinel kind observed at node {node_index}")]
    AstCorrupt { node_index: u16 },

    #[error("symbol table full (capacity {capacity})")]
    SymbolTableFull { capacity: usize },

    #[error("undefined symbol `{name}` at line {line:?}")]
    SymbolUndefined { name: String, line: Line },

    #[error("code buffer overflowed (capacity {capacity} bytes)")]
    CodegenBufferOverflow { capacity: usize },

    #[error("unsupported feature in codegen: {what}")]
    CodegenUnsupportedFeature { what: String },

    #[error("unsupported target platform: {what}")]
    PlatformUnsupported { what: String },

    #[error("temporal arena exhausted (capacity {capacity} bytes)")]
    ArenaExhausted { capacity: usize },

    #[error("RC heap exhausted even after a GC cycle")]
    HeapExhaustedPostGc,

    #[error("unresolved call fixup for function `{name}` at finalize")]
    FixupUnresolvedAtFinalize { name: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CompileError>;
