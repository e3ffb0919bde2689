//! Phase orchestration (pipeline component 2): owns every pool for the
//! duration of one compilation and runs lex → parse → codegen → container to
//! completion, in that order, with no phase re-entered.

use std::fs;
use std::str::FromStr;

use tracing::{debug, info_span};

use crate::ast::{AstPool, StringPool, DEFAULT_NODE_CAPACITY, DEFAULT_STRING_CAPACITY};
use crate::codegen::{self, CodegenOptions};
use crate::container;
use crate::error::{CompileError, Result};
use crate::lexer;
use crate::parser;
use crate::platform::Platform;

/// Driver-enforced input size cap (design §6).
pub const MAX_INPUT_BYTES: usize = 32 * 1024;

/// Every knob the driver needs, already resolved from CLI/env/default
/// precedence (see [`resolve_options`]).
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub platform: Platform,
    pub code_capacity: usize,
    pub arena_capacity: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        let defaults = CodegenOptions::default();
        Self {
            platform: Platform::Linux,
            code_capacity: defaults.code_capacity,
            arena_capacity: defaults.arena_capacity,
        }
    }
}

/// CLI flag > environment variable > built-in default, resolved once before
/// any phase runs (design §4.9).
pub fn resolve_options(
    cli_platform: Option<Platform>,
    cli_code_cap: Option<usize>,
    cli_arena_cap: Option<usize>,
) -> Result<CompileOptions> {
    let mut opts = CompileOptions::default();

    if let Some(p) = cli_platform {
        opts.platform = p;
    } else if let Ok(v) = std::env::var("TC_PLATFORM") {
        opts.platform = Platform::from_str(&v)?;
    }

    if let Some(c) = cli_code_cap {
        opts.code_capacity = c;
    } else if let Ok(v) = std::env::var("TC_CODE_CAP") {
        if let Ok(parsed) = v.parse() {
            opts.code_capacity = parsed;
        }
    }

    if let Some(a) = cli_arena_cap {
        opts.arena_capacity = a;
    } else if let Ok(v) = std::env::var("TC_ARENA_CAP") {
        if let Ok(parsed) = v.parse() {
            opts.arena_capacity = parsed;
        }
    }

    Ok(opts)
}

/// Read `input_path`, compile it per `options`, and write the finished
/// executable to `output_path`. Every phase below owns the pools it mutates
/// for its duration only, per design §5's single-writer-per-phase model.
pub fn compile(input_path: &str, output_path: &str, options: CompileOptions) -> Result<()> {
    let source = {
        let _span = info_span!("read", path = input_path).entered();
        read_source(input_path)?
    };

    if lexer::is_blank(&source) {
        return Err(CompileError::EmptyInput);
    }

    let tokens = {
        let _span = info_span!("lex").entered();
        let toks = lexer::lex(&source);
        debug!(token_count = toks.len(), "lexed source");
        toks
    };

    let mut ast = AstPool::with_capacity(DEFAULT_NODE_CAPACITY);
    let mut strings = StringPool::with_capacity(DEFAULT_STRING_CAPACITY);
    let root = {
        let _span = info_span!("parse").entered();
        let root = parser::parse(&tokens, &source, &mut ast, &mut strings)?;
        debug!(node_count = ast.len(), root, "parsed AST");
        root
    };
    ast.validate_reachable(root)?;

    let program = {
        let _span = info_span!("codegen", platform = ?options.platform).entered();
        let codegen_opts = CodegenOptions {
            code_capacity: options.code_capacity,
            arena_capacity: options.arena_capacity,
            ..CodegenOptions::default()
        };
        let program = codegen::emit_program(&ast, &strings, root, options.platform, codegen_opts)?;
        debug!(code_bytes = program.code.len(), "emitted machine code");
        program
    };

    let executable = {
        let _span = info_span!("container", platform = ?options.platform).entered();
        container::write(options.platform, &program.code, program.entry_offset)?
    };

    {
        let _span = info_span!("write", path = output_path).entered();
        write_executable(output_path, &executable.bytes)?;
    }

    Ok(())
}

fn read_source(path: &str) -> Result<Vec<u8>> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CompileError::IoOpen { path: path.to_string(), source: e }
        } else {
            CompileError::IoRead { path: path.to_string(), source: e }
        }
    })?;
    if bytes.len() > MAX_INPUT_BYTES {
        return Err(CompileError::IoRead {
            path: path.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("input exceeds {MAX_INPUT_BYTES} byte cap"),
            ),
        });
    }
    Ok(bytes)
}

/// Writes through [`crate::scalable::ScalableBuffer`]'s streaming mode
/// rather than a single `write_all`, so a very large generated executable
/// never needs the whole finished container resident twice (once in
/// `executable.bytes`, once again in the OS write buffer) — segments flush to
/// disk as they fill.
fn write_executable(path: &str, bytes: &[u8]) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let io_err = |e: std::io::Error| CompileError::IoWrite { path: path.to_string(), source: e };

    let mut out = crate::scalable::ScalableBuffer::with_streaming(
        crate::scalable::DEFAULT_SEGMENT_SIZE,
        path,
    )
    .map_err(io_err)?;
    out.push_bytes(bytes).map_err(io_err)?;
    out.finalize().map_err(io_err)?;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_rejected_before_lexing() {
        assert!(lexer::is_blank(b""));
    }

    #[test]
    fn cli_flag_overrides_env_var_for_code_cap() {
        std::env::set_var("TC_CODE_CAP", "4096");
        let opts = resolve_options(None, Some(8192), None).unwrap();
        assert_eq!(opts.code_capacity, 8192);
        std::env::remove_var("TC_CODE_CAP");
    }

    #[test]
    fn env_var_is_used_when_no_cli_flag_is_given() {
        std::env::set_var("TC_CODE_CAP", "2048");
        let opts = resolve_options(None, None, None).unwrap();
        assert_eq!(opts.code_capacity, 2048);
        std::env::remove_var("TC_CODE_CAP");
    }

    #[test]
    fn default_is_used_with_no_flag_or_env() {
        std::env::remove_var("TC_CODE_CAP");
        let opts = resolve_options(None, None, None).unwrap();
        assert_eq!(opts.code_capacity, CodegenOptions::default().code_capacity);
    }
}
