//! CLI entry point. Typed `CompileError`s from the library are wrapped into
//! `anyhow::Error` only at this outermost frame (design §4.11).

use std::str::FromStr;

use clap::Parser as ClapParser;

use tc::driver::{self, CompileOptions};
use tc::platform::Platform;

/// Single-pass compiler emitting native ELF64/PE executables by hand.
#[derive(Debug, ClapParser)]
#[command(name = "tc", version, about)]
struct Cli {
    input_path: String,
    output_path: String,

    #[arg(long)]
    platform: Option<String>,

    /// Sugar for `--platform windows`, kept for compatibility with the
    /// original CLI surface.
    #[arg(long)]
    windows: bool,

    #[arg(long = "code-cap")]
    code_cap: Option<usize>,

    #[arg(long = "arena-cap")]
    arena_cap: Option<usize>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let cli_platform = if cli.windows {
        Some(Platform::Windows)
    } else {
        match cli.platform.as_deref() {
            Some(s) => Some(Platform::from_str(s)?),
            None => None,
        }
    };

    let options: CompileOptions = driver::resolve_options(cli_platform, cli.code_cap, cli.arena_cap)?;

    if let Err(err) = driver::compile(&cli.input_path, &cli.output_path, options) {
        tracing::error!(error = %err, "compilation failed");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }

    Ok(())
}
