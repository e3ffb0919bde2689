//! End-to-end compiles: source text in, finished executable bytes out,
//! exercising the full lex → parse → codegen → container pipeline through
//! the one public entry point, [`tc::compile`].

use std::sync::atomic::{AtomicUsize, Ordering};

use tc::driver::CompileOptions;
use tc::platform::Platform;
use tc::{compile, CompileError};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A fresh pair of scratch paths under the system temp dir, unique per call
/// so parallel `#[test]` threads never collide.
fn scratch_paths(tag: &str) -> (String, String) {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir();
    let input = dir.join(format!("tc-e2e-{}-{}-{}.src", std::process::id(), tag, n));
    let output = dir.join(format!("tc-e2e-{}-{}-{}.out", std::process::id(), tag, n));
    (input.to_str().unwrap().to_string(), output.to_str().unwrap().to_string())
}

fn compile_source(tag: &str, src: &str) -> Result<Vec<u8>, CompileError> {
    let (input, output) = scratch_paths(tag);
    std::fs::write(&input, src).unwrap();
    let options = CompileOptions { platform: Platform::Linux, ..CompileOptions::default() };
    let result = compile(&input, &output, options);
    std::fs::remove_file(&input).ok();
    match result {
        Ok(()) => {
            let bytes = std::fs::read(&output).unwrap();
            std::fs::remove_file(&output).ok();
            Ok(bytes)
        }
        Err(e) => Err(e),
    }
}

fn assert_elf(bytes: &[u8]) {
    assert_eq!(&bytes[0..4], &[0x7f, b'E', b'L', b'F'], "expected an ELF64 image");
}

/// Compile `src`, actually execute the resulting image, and return what it
/// wrote to stdout. This is the round trip the compiler exists for — emit,
/// then run — so a miscompiled prologue or a bad relative displacement shows
/// up as a wrong or missing exit/crash here, not just a magic-number check.
fn run_compiled(tag: &str, src: &str) -> String {
    let (input, output) = scratch_paths(tag);
    std::fs::write(&input, src).unwrap();
    let options = CompileOptions { platform: Platform::Linux, ..CompileOptions::default() };
    compile(&input, &output, options).unwrap();
    std::fs::remove_file(&input).ok();

    let result = std::process::Command::new(&output).output().unwrap();
    std::fs::remove_file(&output).ok();
    assert!(result.status.success(), "{tag}: process exited with {:?}", result.status);
    String::from_utf8(result.stdout).unwrap()
}

#[test]
fn hello_world_print_compiles_to_an_elf_executable() {
    let bytes = compile_source("hello", r#"print/ "Hello World!" \"#).unwrap();
    assert_elf(&bytes);
}

#[test]
fn hello_world_print_runs_and_writes_its_literal_to_stdout() {
    // The string literal carries no trailing newline of its own, and `print`
    // emits exactly its (address, length) — no newline is appended.
    let stdout = run_compiled("hello-run", r#"print/ "Hello World!" \"#);
    assert_eq!(stdout, "Hello World!");
}

#[test]
fn variable_store_then_load_compiles() {
    let bytes = compile_source("store-load", "var.v-x-[5] \\ print/ x \\").unwrap();
    assert_elf(&bytes);
}

#[test]
fn variable_store_then_load_runs_and_prints_the_stored_value() {
    let stdout = run_compiled("store-load-run", "var.v-x-[5] \\ print/ x \\");
    assert_eq!(stdout, "5\n");
}

#[test]
fn arithmetic_precedence_expression_compiles() {
    let bytes = compile_source("precedence", "var.v-x-[2 + 3 * 4] \\ print/ x \\").unwrap();
    assert_elf(&bytes);
}

#[test]
fn arithmetic_precedence_expression_runs_and_prints_the_precedence_correct_result() {
    let stdout = run_compiled("precedence-run", "var.v-x-[2 + 3 * 4] \\ print/ x \\");
    assert_eq!(stdout, "14\n");
}

#[test]
fn forward_referenced_function_call_resolves_at_finalize() {
    // The call site precedes the definition; the function table's fixup
    // list must be empty by the time codegen finishes, or `compile` would
    // have returned `FixupUnresolvedAtFinalize`.
    let src = "^greet/ 1 \\ |greet| func.can< print/ \"fn called\" \\ : >";
    let bytes = compile_source("forward-ref", src).unwrap();
    assert_elf(&bytes);
}

#[test]
fn forward_referenced_function_call_runs_and_executes_the_call() {
    let src = "^greet/ 1 \\ |greet| func.can< print/ \"fn called\" \\ : >";
    let stdout = run_compiled("forward-ref-run", src);
    assert_eq!(stdout, "fn called");
}

#[test]
fn temporal_write_future_compiles_with_runtime_prelude() {
    let bytes = compile_source("temporal", "do/ 10 >> \\").unwrap();
    assert_elf(&bytes);
}

#[test]
fn action_block_runs_under_the_arena() {
    let bytes = compile_source("action-block", "do/ var.v-y-[1 + 1] \\ print/ y \\").unwrap();
    assert_elf(&bytes);
}

#[test]
fn action_block_runs_and_prints_the_value_computed_inside_it() {
    let stdout = run_compiled("action-block-run", "do/ var.v-y-[1 + 1] \\ print/ y \\");
    assert_eq!(stdout, "2\n");
}

#[test]
fn empty_input_is_a_fatal_error_before_any_phase_runs() {
    let err = compile_source("empty", "").unwrap_err();
    assert!(matches!(err, CompileError::EmptyInput));
}

#[test]
fn whitespace_only_input_is_also_empty() {
    let err = compile_source("blank", "   \n\t  ").unwrap_err();
    assert!(matches!(err, CompileError::EmptyInput));
}

#[test]
fn windows_target_produces_an_mz_image() {
    let (input, output) = scratch_paths("windows");
    std::fs::write(&input, r#"print/ "hi" \"#).unwrap();
    let options = CompileOptions { platform: Platform::Windows, ..CompileOptions::default() };
    compile(&input, &output, options).unwrap();
    let bytes = std::fs::read(&output).unwrap();
    assert_eq!(&bytes[0..2], b"MZ");
    std::fs::remove_file(&input).ok();
    std::fs::remove_file(&output).ok();
}

#[test]
fn macos_target_is_rejected_with_platform_unsupported() {
    let (input, output) = scratch_paths("macos");
    std::fs::write(&input, r#"print/ "hi" \"#).unwrap();
    let options = CompileOptions { platform: Platform::MacOs, ..CompileOptions::default() };
    let err = compile(&input, &output, options).unwrap_err();
    assert!(matches!(err, CompileError::PlatformUnsupported { .. }));
    std::fs::remove_file(&input).ok();
}

#[test]
fn temporal_operators_are_rejected_on_windows() {
    let (input, output) = scratch_paths("temporal-windows");
    std::fs::write(&input, "do/ 10 >> \\").unwrap();
    let options = CompileOptions { platform: Platform::Windows, ..CompileOptions::default() };
    let err = compile(&input, &output, options).unwrap_err();
    assert!(matches!(err, CompileError::PlatformUnsupported { .. }));
    std::fs::remove_file(&input).ok();
}
