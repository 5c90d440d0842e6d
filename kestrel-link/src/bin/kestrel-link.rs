//! Linker driver: reads serialized program units, links them, writes the
//! merged unit.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use kestrel_asm::Program;
use kestrel_link::{link, Config};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kestrel-link", about = "Merge compiled KestrelVM units")]
struct Args {
    /// Input program files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output path of the merged unit.
    #[arg(long, short, default_value = "out.kpf.json")]
    output: PathBuf,

    /// Record whose fields may be split across inputs; repeatable.
    #[arg(long)]
    partial: Vec<String>,

    /// Record allowed to stay unresolved; repeatable.
    #[arg(long = "remains-partial")]
    remains_partial: Vec<String>,

    /// Drop all debug info from the output.
    #[arg(long = "strip-debug-info")]
    strip_debug_info: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run(Args::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = Config {
        partial: args.partial.into_iter().collect::<BTreeSet<_>>(),
        remains_partial: args.remains_partial.into_iter().collect::<BTreeSet<_>>(),
        strip_debug_info: args.strip_debug_info,
    };
    let mut inputs = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let program: Program = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        inputs.push(program);
    }
    let result = link(&config, inputs);
    for error in &result.errors {
        eprintln!("error: {error}");
    }
    if !result.success() {
        return Ok(ExitCode::FAILURE);
    }
    let serialized =
        serde_json::to_string_pretty(&result.program).context("serializing output")?;
    fs::write(&args.output, serialized)
        .with_context(|| format!("writing {}", args.output.display()))?;
    Ok(ExitCode::SUCCESS)
}
